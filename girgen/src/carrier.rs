//! Carrier type resolver — semantic type → the low-level representation used
//! at the FFI boundary.
//!
//! The carrier underlies both the native function-signature description and
//! the variable declaration holding a raw call result before marshaling. It
//! is deliberately independent of the rich host wrapper type.

use crate::model::{AnyType, Primitive, RegisteredType, ResolvedModel, TypeKind};

/// Low-level FFI representation of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    Void,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Pointer,
}

impl Carrier {
    /// Rust spelling of the carrier, as used in generated extern signatures
    /// and raw-result declarations.
    pub fn rust_type(&self) -> &'static str {
        match self {
            Carrier::Void => "()",
            Carrier::I8 => "i8",
            Carrier::U8 => "u8",
            Carrier::I16 => "i16",
            Carrier::U16 => "u16",
            Carrier::I32 => "i32",
            Carrier::U32 => "u32",
            Carrier::I64 => "i64",
            Carrier::U64 => "u64",
            Carrier::F32 => "f32",
            Carrier::F64 => "f64",
            Carrier::Pointer => "*mut core::ffi::c_void",
        }
    }
}

/// Map a semantic type to its FFI carrier.
///
/// Total over the model grammar: every `AnyType` has exactly one carrier, and
/// unresolvable references degrade to `Pointer` rather than failing.
/// `long_as_int` selects the 32-bit carrier for platform-width `long`
/// (Windows/LLP64 ABIs).
pub fn carrier_of(model: &ResolvedModel, ty: &AnyType, long_as_int: bool) -> Carrier {
    match ty {
        AnyType::Array { .. } => Carrier::Pointer,
        AnyType::Pointer { .. } => Carrier::Pointer,
        AnyType::String => Carrier::Pointer,
        AnyType::Primitive { ty } => primitive_carrier(*ty, long_as_int),
        AnyType::Named { .. } => match model.resolve(ty) {
            Some(target) => registered_carrier(model, target, long_as_int),
            // Unresolved reference: pointer-level representation.
            None => Carrier::Pointer,
        },
    }
}

fn primitive_carrier(p: Primitive, long_as_int: bool) -> Carrier {
    match p {
        Primitive::Void => Carrier::Void,
        // Native booleans are integers.
        Primitive::Bool => Carrier::I32,
        Primitive::I8 => Carrier::I8,
        Primitive::U8 => Carrier::U8,
        Primitive::I16 => Carrier::I16,
        Primitive::U16 => Carrier::U16,
        Primitive::I32 => Carrier::I32,
        Primitive::U32 => Carrier::U32,
        Primitive::I64 => Carrier::I64,
        Primitive::U64 => Carrier::U64,
        Primitive::Long => {
            if long_as_int {
                Carrier::I32
            } else {
                Carrier::I64
            }
        }
        Primitive::ULong => {
            if long_as_int {
                Carrier::U32
            } else {
                Carrier::U64
            }
        }
        Primitive::F32 => Carrier::F32,
        Primitive::F64 => Carrier::F64,
    }
}

fn registered_carrier(
    model: &ResolvedModel,
    target: &RegisteredType,
    long_as_int: bool,
) -> Carrier {
    match target.kind {
        // Underlying storage of enums and bitfields is a 32-bit integer.
        TypeKind::Enum | TypeKind::Bitfield => Carrier::I32,
        TypeKind::Alias => match model.flattened_alias(&target.qualified_name()) {
            Some(AnyType::Primitive { ty }) => primitive_carrier(*ty, long_as_int),
            Some(other) => carrier_of(model, other, long_as_int),
            None => Carrier::Pointer,
        },
        // Structs, unions, objects, interfaces and callbacks all cross the
        // boundary by address.
        TypeKind::Class
        | TypeKind::Interface
        | TypeKind::Record
        | TypeKind::Union
        | TypeKind::Callback => Carrier::Pointer,
    }
}
