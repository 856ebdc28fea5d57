//! Forward-call sequencer — renders one host method around a native call.
//!
//! The body follows a fixed order: platform guard, allocation arena,
//! preprocessing (out-slots, hidden length parameters, callback scopes), the
//! `unsafe` native call, error-slot check, out-slot reads, ownership
//! postprocessing, out write-backs, and finally the return conversion.

use std::fmt::Write as _;

use anyhow::Result;

use crate::carrier::carrier_of;
use crate::closure::{resolved_scope, scope_arena};
use crate::emit::ident;
use crate::marshal::Marshaler;
use crate::model::{AnyType, Direction, Function, Platform, Scope, TypedValue};
use crate::ownership::{self, PostAction};

/// Render a complete `pub fn` for `f`; instance functions get the `&self`
/// receiver form. `indent` is the leading indentation of every line.
pub fn render_function(m: &Marshaler, f: &Function, indent: usize) -> Result<String> {
    let pad = " ".repeat(indent);
    let mut out = String::new();
    let mut w = |line: &str| {
        if line.is_empty() {
            out.push('\n');
        } else {
            let _ = writeln!(out, "{pad}{line}");
        }
    };

    let fallible = f.throws || f.platform.is_some();
    let visible = visible_params(f);

    // Signature.
    let mut args: Vec<String> = Vec::new();
    if f.instance {
        args.push("&self".to_string());
    }
    for p in &visible {
        args.push(format!("{}: {}", ident(&p.name), param_type(m, p)));
    }
    let host_ret = if f.return_value.ty.is_void() {
        None
    } else {
        Some(m.host_type(&f.return_value))
    };
    let ret = match (&host_ret, fallible) {
        (None, false) => String::new(),
        (None, true) => " -> Result<(), GError>".to_string(),
        (Some(t), false) => format!(" -> {t}"),
        (Some(t), true) => format!(" -> Result<{t}, GError>"),
    };
    w(&format!("pub fn {}({}){ret} {{", f.name, args.join(", ")));

    // Non-nullable raw handles fail fast, before any native state exists.
    for p in &visible {
        if p.not_null() && raw_pointer_repr(m, &p.ty) {
            w(&format!(
                "    assert!(!{}.is_null(), \"{} must not be null\");",
                ident(&p.name),
                p.name
            ));
        }
    }

    if let Some(p) = f.platform {
        w(&format!("    interop::require_platform({:?})?;", platform_tag(p)));
    }
    w("    let _arena = Arena::confined();");

    // Preprocessing.
    for p in marshaled_params(f) {
        preprocess(m, f, p, &mut w);
    }
    if f.throws {
        w("    let _error = interop::alloc_out::<*mut core::ffi::c_void>(&_arena);");
    }

    // The native call.
    let mut native_args: Vec<String> = Vec::new();
    if f.instance {
        native_args.push("self.handle()".to_string());
    }
    for p in marshaled_params(f) {
        native_args.push(native_arg(m, f, p));
    }
    if f.throws {
        native_args.push("_error".to_string());
    }
    let call = format!("unsafe {{ ffi::{}({}) }}", f.c_identifier, native_args.join(", "));
    if f.return_value.ty.is_void() {
        w(&format!("    {call};"));
    } else {
        w(&format!("    let _result = {call};"));
    }

    // Error slot first: out values are unspecified on failure.
    if f.throws {
        w("    let _err = unsafe { *_error };");
        w("    if !_err.is_null() {");
        w("        return Err(GError::from_native(_err));");
        w("    }");
    }

    // Read out-slots into locals, length slots included, before any value
    // conversion that needs them.
    for p in marshaled_params(f) {
        if p.is_out() && uses_slot(&p.ty) {
            w(&format!("    let _{} = unsafe {{ *_{}_slot }};", p.name, p.name));
        }
    }

    // Ownership postprocessing.
    for (name, action) in ownership::call_actions(m.model(), f) {
        let expr = if name == f.return_value.name { "_result".to_string() } else { format!("_{name}") };
        postprocess(&expr, &action, &mut w);
    }

    // Write back visible out/inout parameters.
    for p in &visible {
        if p.is_out() {
            w(&format!(
                "    *{} = {};",
                ident(&p.name),
                m.to_host(p, &format!("_{}", p.name), false)
            ));
        }
    }

    // Return conversion.
    match (&host_ret, fallible) {
        (None, false) => {}
        (None, true) => w("    Ok(())"),
        (Some(_), false) => w(&format!("    {}", m.to_host(&f.return_value, "_result", false))),
        (Some(_), true) => {
            w(&format!("    Ok({})", m.to_host(&f.return_value, "_result", false)))
        }
    }
    w("}");
    Ok(out)
}

/// Parameters that appear in the host signature: everything except the
/// instance and the generator-derived hidden slots.
pub fn visible_params(f: &Function) -> Vec<&TypedValue> {
    let hidden = f.hidden_param_names();
    f.parameters
        .iter()
        .enumerate()
        .filter(|(i, p)| !(f.instance && *i == 0) && !hidden.contains(p.name.as_str()))
        .map(|(_, p)| p)
        .collect()
}

/// Parameters marshaled to native arguments, in declaration order, minus the
/// instance (passed as the receiver handle).
fn marshaled_params(f: &Function) -> impl Iterator<Item = &TypedValue> {
    f.parameters.iter().enumerate().filter(move |(i, _)| !(f.instance && *i == 0)).map(|(_, p)| p)
}

fn preprocess(m: &Marshaler, f: &Function, p: &TypedValue, w: &mut impl FnMut(&str)) {
    // Hidden length parameters are derived from their array sibling.
    if let Some(array) = f.array_for_length(&p.name) {
        if !p.is_out() {
            let carrier = carrier_of(m.model(), &p.ty, m.long_as_int()).rust_type();
            let len = if array.nullable() {
                format!("match {} {{ Some(_v) => _v.len(), None => 0 }}", ident(&array.name))
            } else {
                format!("{}.len()", ident(&array.name))
            };
            w(&format!("    let _{} = {len} as {carrier};", p.name));
            return;
        }
        // Out lengths fall through to the slot case below.
    }

    if p.is_out() && uses_slot(&p.ty) {
        let carrier = carrier_of(m.model(), &p.ty, m.long_as_int()).rust_type();
        w(&format!("    let _{}_slot = interop::alloc_out::<{carrier}>(&_arena);", p.name));
        if p.direction == Direction::Inout {
            w(&format!(
                "    unsafe {{ *_{}_slot = {} }};",
                p.name,
                m.to_native(p, &format!("*{}", ident(&p.name)))
            ));
        }
        return;
    }

    // Callback parameters cross as a (trampoline, user-data) pair. The
    // closure moves into the arena of its resolved scope; the data pointer
    // hands it back to the trampoline on every native invocation.
    if is_callback(m, p) {
        match resolved_scope(p, f.instance) {
            Scope::Async | Scope::Notified => {
                w(&format!("    let _{}_scope = Arena::shared();", p.name));
            }
            Scope::Call | Scope::Forever | Scope::Bound => {}
        }
        let arena = scope_arena(p, f.instance);
        let pair = if p.nullable() {
            format!(
                "match {} {{ Some(_v) => _v.to_callback({arena}), None => (std::ptr::null_mut(), std::ptr::null_mut()) }}",
                ident(&p.name)
            )
        } else {
            format!("{}.to_callback({arena})", ident(&p.name))
        };
        w(&format!("    let (_{}_fn, _{}_data) = {pair};", p.name, p.name));
    }
}

fn native_arg(m: &Marshaler, f: &Function, p: &TypedValue) -> String {
    // Hidden slots first: they are passed by derived value, not marshaled
    // from a host argument.
    if f.array_for_length(&p.name).is_some() && !p.is_out() {
        return format!("_{}", p.name);
    }
    if p.is_out() && uses_slot(&p.ty) {
        return format!("_{}_slot", p.name);
    }
    if let Some(owner) =
        f.parameters.iter().find(|q| q.closure_param.as_deref() == Some(p.name.as_str()))
    {
        // The closure travels through the user-data slot; preprocessing bound
        // the pair.
        return format!("_{}_data", owner.name);
    }
    if let Some(owner) = f.parameters.iter().find(|q| q.destroy_param.as_deref() == Some(&p.name)) {
        return format!("interop::destroy_notify({})", destroy_arena(owner, f.instance));
    }
    if is_callback(m, p) {
        return format!("_{}_fn", p.name);
    }
    m.to_native(p, &ident(&p.name))
}

/// Arena whose teardown fires the destroy notification. Scopes that never
/// close hand native code a notifier on the global arena, which never runs.
fn destroy_arena(owner: &TypedValue, instance: bool) -> String {
    match resolved_scope(owner, instance) {
        Scope::Async | Scope::Notified => format!("&_{}_scope", owner.name),
        Scope::Call => "&_arena".to_string(),
        Scope::Forever | Scope::Bound => "Arena::global()".to_string(),
    }
}

fn postprocess(expr: &str, action: &PostAction, w: &mut impl FnMut(&str)) {
    match action {
        PostAction::Ref { ref_fn } | PostAction::Sink { sink_fn: ref_fn } => {
            w(&format!("    unsafe {{ ffi::{ref_fn}({expr}.cast()) }};"));
        }
        PostAction::TakeOwnership { free_fn } => {
            w(&format!("    MemoryCleaner::take_ownership({expr});"));
            if let Some(free_fn) = free_fn {
                w(&format!("    MemoryCleaner::set_free_fn({expr}, {free_fn:?});"));
            }
        }
        PostAction::CopyAndOwn { copy_fn, free_fn } => {
            w(&format!("    let {expr} = unsafe {{ ffi::{copy_fn}({expr}.cast()) }};"));
            w(&format!("    MemoryCleaner::take_ownership({expr});"));
            if let Some(free_fn) = free_fn {
                w(&format!("    MemoryCleaner::set_free_fn({expr}, {free_fn:?});"));
            }
        }
        PostAction::ByteCopyAndOwn { size } => {
            w(&format!("    let {expr} = interop::copy_bytes({expr}, {size});"));
            w(&format!("    MemoryCleaner::take_ownership({expr});"));
        }
        PostAction::ReturnBorrowed => {
            w(&format!("    // {expr} is borrowed from the native side; do not free."));
        }
        PostAction::RefEachElement { ref_fn } => {
            w(&format!(
                "    interop::ref_each({expr}, |_p| unsafe {{ ffi::{ref_fn}(_p) }});"
            ));
        }
        PostAction::CloseScope { param } => {
            w(&format!("    // `{param}` lives in _arena; released on return."));
        }
    }
}

/// Out-values passed through a caller-allocated slot: everything whose host
/// representation is not already an address the callee writes through.
fn uses_slot(ty: &AnyType) -> bool {
    !matches!(ty, AnyType::Pointer { .. })
}

/// Host representations that can actually be null: raw pointer shapes and
/// unresolved references. Wrapper types express nullability as `Option`
/// instead, so they need no runtime check.
fn raw_pointer_repr(m: &Marshaler, ty: &AnyType) -> bool {
    match ty {
        AnyType::Pointer { .. } => true,
        AnyType::Named { .. } => m.model().resolve(ty).is_none(),
        _ => false,
    }
}

fn is_callback(m: &Marshaler, p: &TypedValue) -> bool {
    m.model()
        .resolve(&p.ty)
        .is_some_and(|rt| rt.kind == crate::model::TypeKind::Callback)
}

fn platform_tag(p: Platform) -> &'static str {
    match p {
        Platform::Linux => "linux",
        Platform::Windows => "windows",
        Platform::Macos => "macos",
    }
}

/// Host-side spelling of an input parameter: borrowed forms for strings,
/// arrays and wrapper handles, by-value for everything else.
fn param_type(m: &Marshaler, p: &TypedValue) -> String {
    if p.is_out() {
        return format!("&mut {}", m.host_type(p));
    }
    let base = borrowed_type(m, p);
    if p.nullable() { format!("Option<{base}>") } else { base }
}

fn borrowed_type(m: &Marshaler, p: &TypedValue) -> String {
    use crate::model::TypeKind;
    match &p.ty {
        AnyType::String => "&str".to_string(),
        AnyType::Array { element, .. } => {
            let elem = TypedValue { ty: (**element).clone(), nullability: Default::default(), ..p.clone() };
            format!("&[{}]", m.host_type(&elem))
        }
        AnyType::Named { .. } => match m.model().resolve(&p.ty) {
            Some(rt) => match rt.kind {
                TypeKind::Enum | TypeKind::Bitfield => rt.name.clone(),
                TypeKind::Alias if m.model().alias_primitive(rt).is_some() => rt.name.clone(),
                TypeKind::Callback => rt.name.clone(),
                _ => format!("&{}", rt.name),
            },
            None => "*mut core::ffi::c_void".to_string(),
        },
        _ => {
            let owned = TypedValue { nullability: Default::default(), ..p.clone() };
            m.host_type(&owned)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Nullability, Primitive, Role, Transfer};

    fn slot(name: &str, ty: AnyType) -> TypedValue {
        TypedValue {
            name: name.into(),
            ty,
            role: Role::Parameter,
            direction: Direction::In,
            transfer: Transfer::None,
            nullability: Nullability::Unspecified,
            scope: None,
            closure_param: None,
            destroy_param: None,
        }
    }

    #[test]
    fn hidden_length_and_instance_are_not_visible() {
        let f = Function {
            name: "set_items".into(),
            c_identifier: "thing_set_items".into(),
            parameters: vec![
                slot("self", AnyType::Named { name: "T.Thing".into(), args: vec![] }),
                slot(
                    "items",
                    AnyType::Array {
                        element: Box::new(AnyType::Primitive { ty: Primitive::I32 }),
                        length_param: Some("n_items".into()),
                        fixed_size: None,
                        zero_terminated: false,
                    },
                ),
                slot("n_items", AnyType::Primitive { ty: Primitive::U64 }),
            ],
            return_value: TypedValue::void_return(),
            throws: false,
            instance: true,
            platform: None,
        };
        let names: Vec<_> = visible_params(&f).iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["items".to_string()]);
    }
}
