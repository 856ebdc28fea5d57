//! Value-level marshaling — concrete constant values instead of expression
//! text.
//!
//! Constants are the one place the generator itself converts values rather
//! than emitting code that converts them at runtime, so the enum/bitfield
//! decode rules live here as plain functions over the model. The expression
//! engine in `marshal` emits calls to the generated equivalents of these.

use anyhow::{Context, Result, bail};

use crate::model::{
    AnyType, Constant, ConstantValue, Member, Primitive, RegisteredType, ResolvedModel, TypeKind,
};

/// Strict enum decode: a native value maps to exactly one member or to
/// nothing. Unmatched values are an error at the boundary, never silently
/// coerced.
pub fn decode_enum(rt: &RegisteredType, value: i64) -> Option<&Member> {
    rt.members.iter().find(|m| m.value == value)
}

/// Lenient bitfield decode: collect the members whose bits are set and return
/// the leftover bits separately. Unknown bits are reported, not faulted on,
/// because native libraries routinely pass flags newer than the metadata.
pub fn decode_bitfield(rt: &RegisteredType, value: i64) -> (Vec<&Member>, i64) {
    let mut remaining = value;
    let mut matched = Vec::new();
    for m in &rt.members {
        // Zero-valued members (e.g. NONE) never participate in a nonzero set.
        if m.value != 0 && value & m.value == m.value {
            matched.push(m);
            remaining &= !m.value;
        }
    }
    (matched, remaining)
}

/// OR together a set of bitfield members.
pub fn encode_bitfield<'a>(members: impl IntoIterator<Item = &'a Member>) -> i64 {
    members.into_iter().fold(0, |bits, m| bits | m.value)
}

/// Render a namespace-level constant as the Rust constant item text.
pub fn constant_item(model: &ResolvedModel, c: &Constant) -> Result<String> {
    let (ty, expr) = constant_parts(model, c)
        .with_context(|| format!("constant `{}`", c.name))?;
    Ok(format!("pub const {}: {ty} = {expr};", c.name))
}

fn constant_parts(model: &ResolvedModel, c: &Constant) -> Result<(String, String)> {
    match &c.ty {
        AnyType::String => {
            let ConstantValue::Str(s) = &c.value else {
                bail!("string-typed constant with non-string value");
            };
            Ok(("&str".to_string(), format!("{s:?}")))
        }
        AnyType::Primitive { ty } => primitive_constant(*ty, &c.value),
        AnyType::Named { name, .. } => {
            let rt = model
                .lookup(name)
                .with_context(|| format!("references unknown type `{name}`"))?;
            registered_constant(model, rt, &c.value)
        }
        other => bail!("unsupported constant type {other:?}"),
    }
}

fn primitive_constant(p: Primitive, value: &ConstantValue) -> Result<(String, String)> {
    let ty = match p {
        Primitive::Bool => "bool",
        Primitive::I8 => "i8",
        Primitive::U8 => "u8",
        Primitive::I16 => "i16",
        Primitive::U16 => "u16",
        Primitive::I32 => "i32",
        Primitive::U32 => "u32",
        Primitive::I64 | Primitive::Long => "i64",
        Primitive::U64 | Primitive::ULong => "u64",
        Primitive::F32 => "f32",
        Primitive::F64 => "f64",
        Primitive::Void => bail!("void-typed constant"),
    };
    let expr = match (p, value) {
        (Primitive::Bool, ConstantValue::Bool(b)) => b.to_string(),
        // GIR writes boolean literals as 0/1 in some namespaces.
        (Primitive::Bool, ConstantValue::Signed(n)) => (*n != 0).to_string(),
        (Primitive::F32 | Primitive::F64, ConstantValue::Float(f)) => format!("{f:?}"),
        (Primitive::F32 | Primitive::F64, ConstantValue::Signed(n)) => format!("{}.0", n),
        (_, ConstantValue::Signed(n)) => n.to_string(),
        (_, ConstantValue::Unsigned(n)) => n.to_string(),
        (p, v) => bail!("value {v:?} does not fit primitive {p:?}"),
    };
    Ok((ty.to_string(), expr))
}

fn registered_constant(
    model: &ResolvedModel,
    rt: &RegisteredType,
    value: &ConstantValue,
) -> Result<(String, String)> {
    let raw = match value {
        ConstantValue::Signed(n) => *n,
        ConstantValue::Unsigned(n) => *n as i64,
        other => bail!("value {other:?} does not fit {} `{}`", kind_noun(rt.kind), rt.name),
    };
    match rt.kind {
        TypeKind::Enum => {
            // Constants are decoded strictly, and at generation time: a value
            // outside the member list is a model error, not a runtime fault.
            let member = decode_enum(rt, raw).with_context(|| {
                format!("value {raw} matches no member of enum `{}`", rt.qualified_name())
            })?;
            Ok((
                rt.name.clone(),
                format!("{}::{}", rt.name, crate::emit::camel_case(&member.name)),
            ))
        }
        TypeKind::Bitfield => {
            Ok((rt.name.clone(), format!("{}::from_bits_lenient({raw})", rt.name)))
        }
        TypeKind::Alias => match model.alias_primitive(rt) {
            Some(p) => {
                let (_, expr) = primitive_constant(p, value)?;
                Ok((rt.name.clone(), format!("{}({expr})", rt.name)))
            }
            None => bail!("alias `{}` does not wrap a primitive", rt.qualified_name()),
        },
        kind => bail!("constants of kind {kind:?} are not representable"),
    }
}

fn kind_noun(kind: TypeKind) -> &'static str {
    match kind {
        TypeKind::Enum => "enum",
        TypeKind::Bitfield => "bitfield",
        TypeKind::Alias => "alias",
        _ => "type",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> RegisteredType {
        RegisteredType {
            name: "EventMask".into(),
            namespace: "Gdk".into(),
            c_type: "GdkEventMask".into(),
            kind: TypeKind::Bitfield,
            parent: None,
            get_type_fn: None,
            ref_fn: None,
            unref_fn: None,
            copy_fn: None,
            free_fn: None,
            floating: false,
            members: vec![
                Member { name: "none".into(), value: 0 },
                Member { name: "pointer_motion".into(), value: 1 << 2 },
                Member { name: "button_press".into(), value: 1 << 8 },
            ],
            layout_size: None,
            aliased: None,
            signature: None,
            fields: Vec::new(),
            functions: Vec::new(),
        }
    }

    #[test]
    fn bitfield_decode_keeps_unknown_bits_separate() {
        let rt = flags();
        let (matched, rest) = decode_bitfield(&rt, (1 << 2) | (1 << 30));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "pointer_motion");
        assert_eq!(rest, 1 << 30);
    }

    #[test]
    fn bitfield_roundtrip_of_known_bits() {
        let rt = flags();
        let bits = (1 << 2) | (1 << 8);
        let (matched, rest) = decode_bitfield(&rt, bits);
        assert_eq!(rest, 0);
        assert_eq!(encode_bitfield(matched), bits);
    }

    #[test]
    fn enum_decode_is_strict() {
        let mut rt = flags();
        rt.kind = TypeKind::Enum;
        assert!(decode_enum(&rt, 4).is_some());
        assert!(decode_enum(&rt, 3).is_none());
    }
}
