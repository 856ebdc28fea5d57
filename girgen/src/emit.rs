//! Emitter — model types → generated Rust binding source.
//!
//! One `emit_*` function per registered-type kind, plus the extern block and
//! constants. Everything funnels into [`emit_namespace`], which renders one
//! source file per namespace.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::Result;
use tracing::{debug, warn};

use crate::call;
use crate::carrier::{Carrier, carrier_of};
use crate::closure;
use crate::marshal::Marshaler;
use crate::model::{
    AnyType, Function, Namespace, Primitive, RegisteredType, TypeKind, TypedValue,
};
use crate::values;

/// Render the complete binding source for one namespace.
pub fn emit_namespace(m: &Marshaler, ns: &Namespace) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "//! Bindings for the `{}` namespace. Generated file, do not edit.", ns.name)?;
    writeln!(out)?;
    writeln!(
        out,
        "use girgen_rt::{{Arena, Arenas, GError, InstanceCache, MemoryCleaner, Transfer, interop}};"
    )?;
    writeln!(out)?;

    out.push_str(&emit_extern_block(m, ns)?);

    if !ns.constants.is_empty() {
        writeln!(out)?;
        for c in &ns.constants {
            // An unrepresentable constant is dropped, not fatal: the rest of
            // the namespace is still useful.
            match values::constant_item(m.model(), c) {
                Ok(item) => writeln!(out, "{item}")?,
                Err(e) => warn!(name = %c.name, error = %format!("{e:#}"), "skipping constant"),
            }
        }
        debug!(namespace = %ns.name, constants = ns.constants.len(), "emitted constants");
    }

    for rt in &ns.types {
        writeln!(out)?;
        let text = match rt.kind {
            TypeKind::Enum => emit_enum(rt)?,
            TypeKind::Bitfield => emit_bitfield(rt)?,
            TypeKind::Alias => emit_alias(m, rt)?,
            TypeKind::Record | TypeKind::Union => emit_record(m, rt)?,
            TypeKind::Class | TypeKind::Interface => emit_class(m, rt)?,
            TypeKind::Callback => emit_callback(m, rt)?,
        };
        out.push_str(&text);
        debug!(name = %rt.qualified_name(), kind = ?rt.kind, "emitted type");
    }

    if !ns.functions.is_empty() {
        writeln!(out)?;
        for f in &ns.functions {
            out.push_str(&call::render_function(m, f, 0)?);
        }
        debug!(namespace = %ns.name, functions = ns.functions.len(), "emitted functions");
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// Extern declarations
// ---------------------------------------------------------------------------

/// The `ffi` module: one extern declaration per native symbol reachable from
/// this namespace, signatures spelled in carrier types.
fn emit_extern_block(m: &Marshaler, ns: &Namespace) -> Result<String> {
    // BTreeMap for deterministic output; lifecycle symbols are shared across
    // types (g_object_ref and friends) and must be declared once.
    let mut decls: BTreeMap<String, String> = BTreeMap::new();

    let mut add_function = |f: &Function| {
        let mut args: Vec<String> = f
            .parameters
            .iter()
            .map(|p| format!("{}: {}", ident(&p.name), native_param_carrier(m, p)))
            .collect();
        if f.throws {
            args.push("error: *mut *mut core::ffi::c_void".to_string());
        }
        let ret = match carrier_of(m.model(), &f.return_value.ty, m.long_as_int()) {
            Carrier::Void => String::new(),
            c => format!(" -> {}", c.rust_type()),
        };
        decls.insert(
            f.c_identifier.clone(),
            format!("    pub fn {}({}){ret};", f.c_identifier, args.join(", ")),
        );
    };

    for f in &ns.functions {
        add_function(f);
    }
    for rt in &ns.types {
        for f in &rt.functions {
            add_function(f);
        }
    }

    for rt in &ns.types {
        let ptr = "*mut core::ffi::c_void";
        if let Some(get_type) = &rt.get_type_fn {
            decls.entry(get_type.clone()).or_insert_with(|| {
                format!("    pub fn {get_type}() -> usize;")
            });
        }
        if let Some(ref_fn) = &rt.ref_fn {
            decls.entry(ref_fn.clone()).or_insert_with(|| {
                format!("    pub fn {ref_fn}(self_: {ptr}) -> {ptr};")
            });
        }
        if let Some(copy_fn) = &rt.copy_fn {
            decls.entry(copy_fn.clone()).or_insert_with(|| {
                format!("    pub fn {copy_fn}(self_: {ptr}) -> {ptr};")
            });
        }
        for release in [&rt.unref_fn, &rt.free_fn].into_iter().flatten() {
            decls.entry(release.clone()).or_insert_with(|| {
                format!("    pub fn {release}(self_: {ptr});")
            });
        }
    }

    let mut out = String::new();
    writeln!(out, "pub mod ffi {{")?;
    writeln!(out, "    #[link(name = {:?})]", link_name(&ns.shared_library))?;
    writeln!(out, "    unsafe extern \"C\" {{")?;
    for decl in decls.values() {
        writeln!(out, "    {decl}")?;
    }
    writeln!(out, "    }}")?;
    writeln!(out, "}}")?;
    Ok(out)
}

/// `#[link(name = ...)]` wants the bare library name; model metadata carries
/// the platform soname (`libdemo.so.1`, `demo.dll`).
fn link_name(shared_library: &str) -> &str {
    let base = shared_library.rsplit('/').next().unwrap_or(shared_library);
    let base = base.strip_prefix("lib").unwrap_or(base);
    if let Some(i) = base.find(".so") {
        &base[..i]
    } else if let Some(s) = base.strip_suffix(".dylib").or_else(|| base.strip_suffix(".dll")) {
        s
    } else {
        base
    }
}

/// Carrier spelling of one native parameter. Out-values and the error slot
/// pass by slot address, one indirection above their value carrier.
fn native_param_carrier(m: &Marshaler, p: &TypedValue) -> String {
    if p.is_out() && !p.ty.is_pointer() {
        return format!("*mut {}", carrier_of(m.model(), &p.ty, m.long_as_int()).rust_type());
    }
    carrier_of(m.model(), &p.ty, m.long_as_int()).rust_type().to_string()
}

// ---------------------------------------------------------------------------
// Enums and bitfields
// ---------------------------------------------------------------------------

fn emit_enum(rt: &RegisteredType) -> Result<String> {
    let mut out = String::new();
    let name = &rt.name;
    writeln!(out, "#[derive(Clone, Copy, Debug, PartialEq, Eq)]")?;
    writeln!(out, "pub enum {name} {{")?;
    for member in &rt.members {
        writeln!(out, "    {},", camel_case(&member.name))?;
    }
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "impl {name} {{")?;

    // Strict decode: an unmatched native value is a fault at the boundary,
    // not a silently invented member.
    writeln!(out, "    pub fn of(value: i32) -> {name} {{")?;
    writeln!(out, "        match value {{")?;
    for member in &rt.members {
        writeln!(out, "            {} => {name}::{},", member.value, camel_case(&member.name))?;
    }
    writeln!(
        out,
        "            other => panic!(\"no {name} member with value {{other}}\"),"
    )?;
    writeln!(out, "        }}")?;
    writeln!(out, "    }}")?;
    writeln!(out)?;
    writeln!(out, "    pub fn value(self) -> i32 {{")?;
    writeln!(out, "        match self {{")?;
    for member in &rt.members {
        writeln!(out, "            {name}::{} => {},", camel_case(&member.name), member.value)?;
    }
    writeln!(out, "        }}")?;
    writeln!(out, "    }}")?;
    writeln!(out, "}}")?;
    Ok(out)
}

fn emit_bitfield(rt: &RegisteredType) -> Result<String> {
    let mut out = String::new();
    let name = &rt.name;
    let all: i64 = rt.members.iter().fold(0, |bits, m| bits | m.value);
    writeln!(out, "#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]")?;
    writeln!(out, "pub struct {name}(i32);")?;
    writeln!(out)?;
    writeln!(out, "impl {name} {{")?;
    for member in &rt.members {
        writeln!(
            out,
            "    pub const {}: {name} = {name}({});",
            upper_snake_case(&member.name),
            member.value
        )?;
    }
    writeln!(out)?;
    // Lenient decode: unknown bits are dropped, never faulted on.
    writeln!(out, "    pub fn from_bits_lenient(bits: i32) -> {name} {{")?;
    writeln!(out, "        {name}(bits & {all})")?;
    writeln!(out, "    }}")?;
    writeln!(out)?;
    writeln!(out, "    pub fn bits(self) -> i32 {{")?;
    writeln!(out, "        self.0")?;
    writeln!(out, "    }}")?;
    writeln!(out)?;
    writeln!(out, "    pub fn contains(self, other: {name}) -> bool {{")?;
    writeln!(out, "        self.0 & other.0 == other.0")?;
    writeln!(out, "    }}")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "impl std::ops::BitOr for {name} {{")?;
    writeln!(out, "    type Output = {name};")?;
    writeln!(out, "    fn bitor(self, rhs: {name}) -> {name} {{")?;
    writeln!(out, "        {name}(self.0 | rhs.0)")?;
    writeln!(out, "    }}")?;
    writeln!(out, "}}")?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Aliases
// ---------------------------------------------------------------------------

fn emit_alias(m: &Marshaler, rt: &RegisteredType) -> Result<String> {
    let mut out = String::new();
    let name = &rt.name;
    match m.model().flattened_alias(&rt.qualified_name()) {
        // Primitive alias: a transparent newtype with value access.
        Some(AnyType::Primitive { ty }) => {
            let prim = host_primitive_name(*ty);
            writeln!(out, "#[derive(Clone, Copy, Debug, Default, PartialEq)]")?;
            writeln!(out, "pub struct {name}(pub {prim});")?;
            writeln!(out)?;
            writeln!(out, "impl {name} {{")?;
            writeln!(out, "    pub fn value(self) -> {prim} {{")?;
            writeln!(out, "        self.0")?;
            writeln!(out, "    }}")?;
            writeln!(out, "}}")?;
        }
        // Alias of another registered type: a plain re-export.
        Some(AnyType::Named { name: target, .. }) => {
            if let Some(target_rt) = m.model().lookup(target) {
                writeln!(out, "pub type {name} = {};", target_rt.name)?;
            } else {
                writeln!(out, "pub type {name} = *mut core::ffi::c_void;")?;
            }
        }
        _ => {
            writeln!(out, "pub type {name} = *mut core::ffi::c_void;")?;
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Records, unions, classes and interfaces
// ---------------------------------------------------------------------------

fn emit_record(m: &Marshaler, rt: &RegisteredType) -> Result<String> {
    let mut out = String::new();
    out.push_str(&emit_handle_wrapper(rt)?);
    writeln!(out)?;
    writeln!(out, "impl {} {{", rt.name)?;
    out.push_str(&emit_handle_accessors(rt)?);
    out.push_str(&emit_field_accessors(m, rt)?);
    for f in &rt.functions {
        writeln!(out)?;
        out.push_str(&call::render_function(m, f, 4)?);
    }
    writeln!(out, "}}")?;
    Ok(out)
}

fn emit_class(m: &Marshaler, rt: &RegisteredType) -> Result<String> {
    let mut out = String::new();
    out.push_str(&emit_handle_wrapper(rt)?);
    writeln!(out)?;
    writeln!(out, "impl {} {{", rt.name)?;
    out.push_str(&emit_handle_accessors(rt)?);
    if let Some(get_type) = &rt.get_type_fn {
        writeln!(out)?;
        writeln!(out, "    pub fn type_() -> usize {{")?;
        writeln!(out, "        unsafe {{ ffi::{get_type}() }}")?;
        writeln!(out, "    }}")?;
    }
    for f in &rt.functions {
        writeln!(out)?;
        out.push_str(&call::render_function(m, f, 4)?);
    }
    writeln!(out, "}}")?;

    // Upcasting follows the class hierarchy: wrappers are layout-compatible,
    // so the parent view is a reinterpretation of the same handle.
    if let Some(parent) = rt.parent.as_deref().and_then(|p| m.model().lookup(p)) {
        writeln!(out)?;
        writeln!(out, "impl std::ops::Deref for {} {{", rt.name)?;
        writeln!(out, "    type Target = {};", parent.name)?;
        writeln!(out, "    fn deref(&self) -> &{} {{", parent.name)?;
        writeln!(
            out,
            "        unsafe {{ &*(self as *const {} as *const {}) }}",
            rt.name, parent.name
        )?;
        writeln!(out, "    }}")?;
        writeln!(out, "}}")?;
    }
    Ok(out)
}

fn emit_handle_wrapper(rt: &RegisteredType) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "/// `{}`", rt.c_type)?;
    writeln!(out, "#[repr(transparent)]")?;
    writeln!(out, "#[derive(Debug)]")?;
    writeln!(out, "pub struct {} {{", rt.name)?;
    writeln!(out, "    handle: *mut core::ffi::c_void,")?;
    writeln!(out, "}}")?;
    Ok(out)
}

fn emit_handle_accessors(rt: &RegisteredType) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "    pub fn from_handle(handle: *mut core::ffi::c_void) -> {} {{", rt.name)?;
    writeln!(out, "        {} {{ handle }}", rt.name)?;
    writeln!(out, "    }}")?;
    writeln!(out)?;
    writeln!(out, "    pub fn handle(&self) -> *mut core::ffi::c_void {{")?;
    writeln!(out, "        self.handle")?;
    writeln!(out, "    }}")?;
    Ok(out)
}

/// Getter/setter pairs for the introspectable fields of a record. Offsets
/// follow natural alignment of the field carriers; fields whose offset cannot
/// be computed that way (strings, nested arrays) get no accessor.
fn emit_field_accessors(m: &Marshaler, rt: &RegisteredType) -> Result<String> {
    let mut out = String::new();
    for (field, offset) in field_offsets(m, rt) {
        let carrier = carrier_of(m.model(), &field.ty, m.long_as_int());
        if !accessor_friendly(m, &field.ty) {
            continue;
        }
        let host = m.host_type(&field);
        writeln!(out)?;
        writeln!(out, "    pub fn {}(&self) -> {host} {{", ident(&field.name))?;
        writeln!(
            out,
            "        let _raw = unsafe {{ interop::read::<{}>(self.handle(), {offset}) }};",
            carrier.rust_type()
        )?;
        writeln!(out, "        {}", m.to_host(&field, "_raw", false))?;
        writeln!(out, "    }}")?;
        writeln!(out)?;
        writeln!(out, "    pub fn set_{}(&self, value: {host}) {{", field.name)?;
        writeln!(
            out,
            "        unsafe {{ interop::write::<{}>(self.handle(), {offset}, {}) }};",
            carrier.rust_type(),
            m.to_native(&field, "value")
        )?;
        writeln!(out, "    }}")?;
    }
    Ok(out)
}

/// Natural-alignment layout of a record's fields in carrier representation.
fn field_offsets(m: &Marshaler, rt: &RegisteredType) -> Vec<(TypedValue, usize)> {
    let mut offsets = Vec::new();
    let mut offset = 0usize;
    for field in &rt.fields {
        let size = carrier_size(carrier_of(m.model(), &field.ty, m.long_as_int()));
        if size == 0 {
            continue;
        }
        offset = offset.next_multiple_of(size);
        offsets.push((field.clone(), offset));
        offset += size;
    }
    offsets
}

fn carrier_size(c: Carrier) -> usize {
    match c {
        Carrier::Void => 0,
        Carrier::I8 | Carrier::U8 => 1,
        Carrier::I16 | Carrier::U16 => 2,
        Carrier::I32 | Carrier::U32 | Carrier::F32 => 4,
        Carrier::I64 | Carrier::U64 | Carrier::F64 | Carrier::Pointer => 8,
    }
}

/// Field types with value-level accessors: primitives, enums, bitfields and
/// primitive aliases. Reference-typed fields need ownership decisions a plain
/// read cannot make.
fn accessor_friendly(m: &Marshaler, ty: &AnyType) -> bool {
    match ty {
        AnyType::Primitive { ty } => *ty != Primitive::Void,
        AnyType::Named { .. } => m.model().resolve(ty).is_some_and(|rt| {
            matches!(rt.kind, TypeKind::Enum | TypeKind::Bitfield)
                || m.model().alias_primitive(rt).is_some()
        }),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

fn emit_callback(m: &Marshaler, rt: &RegisteredType) -> Result<String> {
    let mut out = String::new();
    let name = &rt.name;
    let Some(sig) = &rt.signature else {
        writeln!(out, "pub type {name} = *mut core::ffi::c_void;")?;
        return Ok(out);
    };

    // The host-facing closure signature, hidden parameters elided.
    let carrier_fn = Function {
        name: String::new(),
        c_identifier: String::new(),
        parameters: sig.parameters.clone(),
        return_value: sig.return_value.clone(),
        throws: sig.throws,
        instance: false,
        platform: None,
    };
    let hidden: Vec<String> =
        carrier_fn.hidden_param_names().into_iter().map(str::to_string).collect();
    let params: Vec<String> = sig
        .parameters
        .iter()
        .filter(|p| !hidden.iter().any(|h| h == &p.name))
        .map(|p| m.host_type(p))
        .collect();
    let ret = if sig.return_value.ty.is_void() {
        if sig.throws { "Result<(), GError>".to_string() } else { String::new() }
    } else if sig.throws {
        format!("Result<{}, GError>", m.host_type(&sig.return_value))
    } else {
        m.host_type(&sig.return_value)
    };
    let arrow = if ret.is_empty() { String::new() } else { format!(" -> {ret}") };

    writeln!(out, "/// `{}`", rt.c_type)?;
    writeln!(out, "pub struct {name}(pub Box<dyn Fn({}){arrow}>);", params.join(", "))?;
    writeln!(out)?;
    let tramp = closure::trampoline_name(rt);
    writeln!(out, "impl {name} {{")?;
    // The closure moves into the arena; the returned data pointer is the
    // stable address the trampoline reads it back from.
    writeln!(
        out,
        "    pub fn to_callback(self, arena: &Arena) -> (*mut core::ffi::c_void, *mut core::ffi::c_void) {{"
    )?;
    writeln!(out, "        let data = interop::register_upcall(arena, {tramp} as *const (), self);")?;
    writeln!(out, "        ({tramp} as *const () as *mut core::ffi::c_void, data)")?;
    writeln!(out, "    }}")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    out.push_str(&closure::upcall(m, rt)?);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Name helpers
// ---------------------------------------------------------------------------

/// Spell a metadata name as a valid Rust identifier. Keywords get the raw
/// prefix; the few names raw identifiers cannot express get a trailing
/// underscore.
pub(crate) fn ident(name: &str) -> String {
    match name {
        "self" | "Self" | "crate" | "super" => format!("{name}_"),
        kw if is_keyword(kw) => format!("r#{kw}"),
        _ => name.to_string(),
    }
}

fn is_keyword(name: &str) -> bool {
    matches!(
        name,
        "as" | "async"
            | "await"
            | "box"
            | "break"
            | "const"
            | "continue"
            | "dyn"
            | "else"
            | "enum"
            | "extern"
            | "false"
            | "fn"
            | "for"
            | "if"
            | "impl"
            | "in"
            | "let"
            | "loop"
            | "match"
            | "mod"
            | "move"
            | "mut"
            | "pub"
            | "ref"
            | "return"
            | "static"
            | "struct"
            | "trait"
            | "true"
            | "type"
            | "unsafe"
            | "use"
            | "where"
            | "while"
            | "yield"
    )
}

/// `DrawingArea` / `drawing-area` / `drawing_area` → `drawing_area`.
pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '-' || c == ' ' {
            out.push('_');
            prev_lower = false;
        } else if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// `pointer_motion` / `pointer-motion` → `PointerMotion`.
pub(crate) fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for c in name.chars() {
        if c == '_' || c == '-' || c == ' ' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `pointer_motion` → `POINTER_MOTION`.
pub(crate) fn upper_snake_case(name: &str) -> String {
    snake_case(name).to_ascii_uppercase()
}

fn host_primitive_name(p: Primitive) -> &'static str {
    match p {
        Primitive::Void => "()",
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
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_helpers() {
        assert_eq!(snake_case("DrawingArea"), "drawing_area");
        assert_eq!(snake_case("GtkCSSProvider"), "gtk_cssprovider");
        assert_eq!(camel_case("pointer_motion"), "PointerMotion");
        assert_eq!(upper_snake_case("pointer-motion"), "POINTER_MOTION");
    }

    #[test]
    fn link_names_drop_the_soname_decoration() {
        assert_eq!(link_name("libdemo.so"), "demo");
        assert_eq!(link_name("libgtk-4.so.1"), "gtk-4");
        assert_eq!(link_name("libdemo.dylib"), "demo");
        assert_eq!(link_name("demo.dll"), "demo");
        assert_eq!(link_name("/usr/lib/libdemo.so"), "demo");
    }

    #[test]
    fn keywords_become_valid_identifiers() {
        assert_eq!(ident("type"), "r#type");
        assert_eq!(ident("ref"), "r#ref");
        assert_eq!(ident("self"), "self_");
        assert_eq!(ident("items"), "items");
    }
}
