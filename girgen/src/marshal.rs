//! Marshaling engine — expression text for crossing the FFI boundary.
//!
//! `to_native` and `to_host` produce the Rust expression that converts one
//! typed value between its host wrapper representation and its FFI carrier.
//! Dispatch is on the shape of the `AnyType`, then on the registered-type
//! kind when the shape is a reference. Both functions are total: shapes the
//! engine has no rule for produce an explicit [`UNSUPPORTED`] sentinel in the
//! output rather than a plausible-looking wrong conversion.

use crate::model::{
    AnyType, ArraySize, Primitive, RegisteredType, ResolvedModel, Role, Transfer, TypeKind,
    TypedValue,
};

/// Marker appended to conversions the engine cannot express. A generation-time
/// diagnostic, not a runtime error: the generated code compiles but visibly
/// carries the sentinel.
pub const UNSUPPORTED: &str = "/* unsupported */";

/// Expression generator for one model, parameterized over the ABI switches
/// that affect conversions.
pub struct Marshaler<'a> {
    model: &'a ResolvedModel,
    long_as_int: bool,
}

impl<'a> Marshaler<'a> {
    pub fn new(model: &'a ResolvedModel, long_as_int: bool) -> Self {
        Marshaler { model, long_as_int }
    }

    pub fn model(&self) -> &'a ResolvedModel {
        self.model
    }

    pub fn long_as_int(&self) -> bool {
        self.long_as_int
    }

    // -----------------------------------------------------------------------
    // Host → native
    // -----------------------------------------------------------------------

    /// Convert `host_expr` to its native representation.
    pub fn to_native(&self, v: &TypedValue, host_expr: &str) -> String {
        match &v.ty {
            AnyType::Primitive { ty } => primitive_to_native(*ty, host_expr),
            AnyType::String => self.nullable_to_native(v, host_expr, |expr| {
                if v.transfer == Transfer::Full {
                    // Ownership transfers to the callee: allocate outside the
                    // call arena so teardown does not free the callee's memory.
                    format!("interop::allocate_unowned_string({expr})")
                } else {
                    format!("interop::allocate_native_string({expr}, &_arena)")
                }
            }),
            AnyType::Pointer { target } => match target.as_ref() {
                // Raw out-box or address-valued parameter: take the raw handle.
                AnyType::Primitive { .. } => host_expr.to_string(),
                // Pointer-to-pointer and deeper: no rule.
                _ => format!("std::ptr::null_mut() {UNSUPPORTED}"),
            },
            AnyType::Array { element, zero_terminated, .. } => {
                self.array_to_native(v, element, *zero_terminated, host_expr)
            }
            AnyType::Named { .. } => match self.model.resolve(&v.ty) {
                Some(target) => self.registered_to_native(v, target, host_expr),
                // Unresolved reference: the value is already a raw address.
                None => host_expr.to_string(),
            },
        }
    }

    fn registered_to_native(
        &self,
        v: &TypedValue,
        target: &RegisteredType,
        host_expr: &str,
    ) -> String {
        match target.kind {
            TypeKind::Enum => format!("{host_expr}.value()"),
            // Bitfields are host-side sets; the stored bits are the OR of the
            // member values.
            TypeKind::Bitfield => format!("{host_expr}.bits()"),
            TypeKind::Alias => {
                match self.model.flattened_alias(&target.qualified_name()) {
                    Some(AnyType::Primitive { .. }) => format!("{host_expr}.value()"),
                    // Alias of a record/object: behaves like its target.
                    _ => self.nullable_to_native(v, host_expr, |e| format!("{e}.handle()")),
                }
            }
            // Callbacks cross as a (trampoline, user-data) pair the call
            // sequencer binds in preprocessing; there is no single-expression
            // form.
            TypeKind::Callback => format!("std::ptr::null_mut() {UNSUPPORTED}"),
            TypeKind::Class | TypeKind::Interface | TypeKind::Record | TypeKind::Union => {
                self.nullable_to_native(v, host_expr, |e| format!("{e}.handle()"))
            }
        }
    }

    fn array_to_native(
        &self,
        v: &TypedValue,
        element: &AnyType,
        zero_terminated: bool,
        host_expr: &str,
    ) -> String {
        // Nested arrays have no rule.
        if matches!(element, AnyType::Array { .. }) {
            return format!("std::ptr::null_mut() {UNSUPPORTED}");
        }

        // When ownership of the buffer transfers, allocate globally so the
        // call arena's teardown leaves it alone.
        let alloc = if v.transfer != Transfer::None { "Arena::global()" } else { "&_arena" };

        self.nullable_to_native(v, host_expr, |expr| {
            let elem_value = self.element_value(element);
            let buffer = match elem_value {
                // Elements already in carrier representation.
                None => expr.to_string(),
                Some(map) => {
                    format!("&{expr}.iter().map(|_e| {map}).collect::<Vec<_>>()")
                }
            };
            format!("interop::allocate_native_array({buffer}, {zero_terminated}, {alloc})")
        })
    }

    /// Per-element host → carrier expression over `_e`, or `None` when the
    /// element is already its own carrier (primitives, strings handled by the
    /// interop array helper).
    fn element_value(&self, element: &AnyType) -> Option<String> {
        match element {
            AnyType::Primitive { .. } | AnyType::String => None,
            AnyType::Named { .. } => {
                let target = self.model.resolve(element)?;
                Some(match target.kind {
                    TypeKind::Enum => "_e.value()".to_string(),
                    TypeKind::Bitfield => "_e.bits()".to_string(),
                    TypeKind::Alias => match self.model.alias_primitive(target) {
                        Some(_) => "_e.value()".to_string(),
                        None => "_e.handle()".to_string(),
                    },
                    _ => "_e.handle()".to_string(),
                })
            }
            _ => None,
        }
    }

    /// Wrap a host → native conversion of a nullable value in a null
    /// short-circuit. The converter never runs for `None`.
    fn nullable_to_native(
        &self,
        v: &TypedValue,
        host_expr: &str,
        convert: impl Fn(&str) -> String,
    ) -> String {
        if v.nullable() {
            format!(
                "match {host_expr} {{ Some(_v) => {}, None => std::ptr::null_mut() }}",
                convert("_v")
            )
        } else {
            convert(host_expr)
        }
    }

    // -----------------------------------------------------------------------
    // Native → host
    // -----------------------------------------------------------------------

    /// Convert `native_expr` to its host representation. `upcall` selects the
    /// argument naming conventions of trampoline bodies (sibling length
    /// parameters are carrier arguments there, not pre-read locals).
    pub fn to_host(&self, v: &TypedValue, native_expr: &str, upcall: bool) -> String {
        match &v.ty {
            AnyType::Primitive { ty } => primitive_to_host(*ty, native_expr),
            AnyType::String => self.nullable_to_host(v, native_expr, |expr| {
                format!("interop::get_string_from({expr}, Transfer::{:?})", v.transfer)
            }),
            AnyType::Pointer { target } => match target.as_ref() {
                // Wrap a raw pointer read into a boxed holder; the call
                // sequencer dereferences it.
                AnyType::Primitive { .. } => native_expr.to_string(),
                _ => format!("None {UNSUPPORTED}"),
            },
            AnyType::Array { element, .. } => self.array_to_host(v, element, native_expr, upcall),
            AnyType::Named { args, .. } => match self.model.resolve(&v.ty) {
                Some(target) => self.registered_to_host(v, target, args, native_expr),
                None => native_expr.to_string(),
            },
        }
    }

    fn registered_to_host(
        &self,
        v: &TypedValue,
        target: &RegisteredType,
        args: &[AnyType],
        native_expr: &str,
    ) -> String {
        let host = &target.name;
        match target.kind {
            // Closed mapping: `of` faults on an unmatched value.
            TypeKind::Enum => format!("{host}::of({native_expr})"),
            // Lenient decode: unmatched bits are dropped.
            TypeKind::Bitfield => format!("{host}::from_bits_lenient({native_expr})"),
            TypeKind::Alias => match self.model.flattened_alias(&target.qualified_name()) {
                Some(AnyType::Primitive { .. }) => format!("{host}({native_expr})"),
                _ => self.nullable_to_host(v, native_expr, |e| {
                    format!("{host}::from_handle({e})")
                }),
            },
            // Upcall parameters of callback type are already host closures;
            // there is no forward-direction rule.
            TypeKind::Callback => format!("None {UNSUPPORTED}"),
            TypeKind::Record | TypeKind::Union => {
                if let Some(container) = self.container_to_host(v, target, args, native_expr) {
                    return container;
                }
                self.nullable_to_host(v, native_expr, |e| format!("{host}::from_handle({e})"))
            }
            // Proxy objects go through the de-duplicating instance cache so a
            // native address always maps to the same host wrapper.
            TypeKind::Class | TypeKind::Interface => {
                self.nullable_to_host(v, native_expr, |e| {
                    format!("InstanceCache::get({e}, {host}::from_handle)")
                })
            }
        }
    }

    /// Generic containers (GList/GSList/GHashTable) wrap the native structure
    /// with per-occurrence element constructor/destructor closures derived
    /// from the element types.
    fn container_to_host(
        &self,
        v: &TypedValue,
        target: &RegisteredType,
        args: &[AnyType],
        native_expr: &str,
    ) -> Option<String> {
        match target.c_type.as_str() {
            "GList" | "GSList" => {
                let elem = args.first()?;
                let ctor = self.element_ctor(elem);
                let dtor = self.element_dtor(elem);
                Some(format!(
                    "{}::from_native({native_expr}, {ctor}, {dtor}, Transfer::{:?})",
                    target.name, v.transfer
                ))
            }
            "GHashTable" => {
                let key = args.first()?;
                let value = args.get(1)?;
                let key_ctor = self.element_ctor(key);
                let value_ctor = self.element_ctor(value);
                Some(format!(
                    "{}::from_native({native_expr}, {key_ctor}, {value_ctor})",
                    target.name
                ))
            }
            _ => None,
        }
    }

    fn element_ctor(&self, elem: &AnyType) -> String {
        match elem {
            AnyType::String => "|_p| interop::get_string_from(_p, Transfer::Full)".to_string(),
            AnyType::Primitive { ty } => {
                format!("|_p| interop::get_{}_from(_p)", primitive_tag(*ty))
            }
            AnyType::Pointer { .. } => "|_p| _p".to_string(),
            AnyType::Named { .. } => match self.model.resolve(elem) {
                Some(t) if matches!(t.kind, TypeKind::Enum) => {
                    format!("|_p| {}::of(interop::get_i32_from(_p))", t.name)
                }
                Some(t) if matches!(t.kind, TypeKind::Bitfield) => {
                    format!("|_p| {}::from_bits_lenient(interop::get_i32_from(_p))", t.name)
                }
                Some(t) => format!("{}::from_handle", t.name),
                None => format!("|_p| _p {UNSUPPORTED}"),
            },
            AnyType::Array { .. } => format!("|_p| _p {UNSUPPORTED}"),
        }
    }

    fn element_dtor(&self, elem: &AnyType) -> String {
        match elem {
            // Strings and primitives are copied out; nothing to free per node.
            AnyType::String | AnyType::Primitive { .. } => "None".to_string(),
            AnyType::Pointer { .. } => "Some(interop::free)".to_string(),
            AnyType::Named { .. } => match self.model.resolve(elem) {
                Some(t) => match t.free_fn.as_deref().or(t.unref_fn.as_deref()) {
                    Some(f) => format!("Some(|_p| unsafe {{ ffi::{f}(_p.cast()) }})"),
                    None => "None".to_string(),
                },
                None => "None".to_string(),
            },
            AnyType::Array { .. } => format!("None {UNSUPPORTED}"),
        }
    }

    fn array_to_host(
        &self,
        v: &TypedValue,
        element: &AnyType,
        native_expr: &str,
        upcall: bool,
    ) -> String {
        if matches!(element, AnyType::Array { .. }) {
            return format!("Vec::new() {UNSUPPORTED}");
        }

        let elem_value = self.element_typed_value(v, element);
        let elem_from = self.to_host(&elem_value, "_p", upcall);

        let size = v.ty.array_size().unwrap_or(ArraySize::Unknown);
        self.nullable_to_host(v, native_expr, |expr| match &size {
            ArraySize::ZeroTerminated => {
                format!("interop::get_zero_terminated_array_from({expr}, |_p| {elem_from})")
            }
            ArraySize::Fixed(n) => {
                format!("interop::get_array_from({expr}, {n}, |_p| {elem_from})")
            }
            ArraySize::LengthParam(name) => {
                // In an upcall the length is a carrier argument; in a forward
                // call the sequencer has read it into a `_name` local.
                let len = if upcall {
                    format!("{} as usize", crate::emit::ident(name))
                } else {
                    format!("_{name} as usize")
                };
                format!("interop::get_array_from({expr}, {len}, |_p| {elem_from})")
            }
            ArraySize::Unknown => format!("{expr} {UNSUPPORTED}"),
        })
    }

    /// Synthesize the element slot of an array: element ownership follows the
    /// array's transfer, except `Container` which transfers only the outer
    /// buffer.
    fn element_typed_value(&self, v: &TypedValue, element: &AnyType) -> TypedValue {
        TypedValue {
            name: format!("{}_elem", v.name),
            ty: element.clone(),
            role: Role::Parameter,
            direction: Default::default(),
            transfer: match v.transfer {
                Transfer::Full => Transfer::Full,
                Transfer::Container | Transfer::None => Transfer::None,
            },
            nullability: Default::default(),
            scope: None,
            closure_param: None,
            destroy_param: None,
        }
    }

    /// Wrap a native → host conversion of a nullable value in a NULL
    /// short-circuit. The converter never runs for NULL.
    fn nullable_to_host(
        &self,
        v: &TypedValue,
        native_expr: &str,
        convert: impl Fn(&str) -> String,
    ) -> String {
        if v.nullable() {
            format!(
                "if {native_expr}.is_null() {{ None }} else {{ Some({}) }}",
                convert(native_expr)
            )
        } else {
            convert(native_expr)
        }
    }

    // -----------------------------------------------------------------------
    // Host type spelling
    // -----------------------------------------------------------------------

    /// Rich host-side type of a value, as spelled in generated signatures.
    pub fn host_type(&self, v: &TypedValue) -> String {
        let base = self.host_base_type(&v.ty, v);
        if v.nullable() { format!("Option<{base}>") } else { base }
    }

    fn host_base_type(&self, ty: &AnyType, v: &TypedValue) -> String {
        match ty {
            AnyType::Primitive { ty } => host_primitive(*ty).to_string(),
            AnyType::String => "String".to_string(),
            AnyType::Pointer { target } => {
                format!("*mut {}", self.host_base_type(target, v))
            }
            AnyType::Array { element, .. } => {
                format!("Vec<{}>", self.host_base_type(element, v))
            }
            AnyType::Named { name, .. } => match self.model.lookup(name) {
                Some(target) => target.name.clone(),
                None => "*mut core::ffi::c_void".to_string(),
            },
        }
    }
}

fn primitive_to_native(p: Primitive, host_expr: &str) -> String {
    match p {
        Primitive::Bool => format!("if {host_expr} {{ 1 }} else {{ 0 }}"),
        _ => host_expr.to_string(),
    }
}

fn primitive_to_host(p: Primitive, native_expr: &str) -> String {
    match p {
        Primitive::Bool => format!("{native_expr} != 0"),
        _ => native_expr.to_string(),
    }
}

fn host_primitive(p: Primitive) -> &'static str {
    match p {
        Primitive::Void => "()",
        Primitive::Bool => "bool",
        Primitive::I8 => "i8",
        Primitive::U8 => "u8",
        Primitive::I16 => "i16",
        Primitive::U16 => "u16",
        Primitive::I32 => "i32",
        Primitive::U32 => "u32",
        Primitive::I64 => "i64",
        Primitive::U64 => "u64",
        // Host code is width-independent; the carrier narrows when needed.
        Primitive::Long => "i64",
        Primitive::ULong => "u64",
        Primitive::F32 => "f32",
        Primitive::F64 => "f64",
    }
}

fn primitive_tag(p: Primitive) -> &'static str {
    match p {
        Primitive::Void => "pointer",
        Primitive::Bool => "bool",
        Primitive::I8 => "i8",
        Primitive::U8 => "u8",
        Primitive::I16 => "i16",
        Primitive::U16 => "u16",
        Primitive::I32 => "i32",
        Primitive::U32 => "u32",
        Primitive::I64 => "i64",
        Primitive::U64 => "u64",
        Primitive::Long => "long",
        Primitive::ULong => "ulong",
        Primitive::F32 => "f32",
        Primitive::F64 => "f64",
    }
}
