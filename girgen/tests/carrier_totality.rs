//! Carrier resolution must be total: every semantic type maps to exactly one
//! FFI carrier, including unresolved references.

use girgen::carrier::{Carrier, carrier_of};
use girgen::model::*;

fn registered(name: &str, kind: TypeKind) -> RegisteredType {
    RegisteredType {
        name: name.into(),
        namespace: "Demo".into(),
        c_type: format!("Demo{name}"),
        kind,
        parent: None,
        get_type_fn: None,
        ref_fn: None,
        unref_fn: None,
        copy_fn: None,
        free_fn: None,
        floating: false,
        members: Vec::new(),
        layout_size: None,
        aliased: None,
        signature: None,
        fields: Vec::new(),
        functions: Vec::new(),
    }
}

fn model() -> ResolvedModel {
    let mut ns = Namespace {
        name: "Demo".into(),
        shared_library: "libdemo.so".into(),
        types: Vec::new(),
        functions: Vec::new(),
        constants: Vec::new(),
    };
    ns.types.push(registered("Orientation", TypeKind::Enum));
    ns.types.push(registered("EventMask", TypeKind::Bitfield));
    ns.types.push(registered("Window", TypeKind::Class));
    ns.types.push(registered("Rectangle", TypeKind::Record));
    ns.types.push(registered("CompareFunc", TypeKind::Callback));
    let mut id = registered("Id", TypeKind::Alias);
    id.aliased = Some(AnyType::Primitive { ty: Primitive::I64 });
    ns.types.push(id);
    // Alias-of-alias: must flatten down to the primitive.
    let mut handle = registered("Handle", TypeKind::Alias);
    handle.aliased = Some(AnyType::Named { name: "Demo.Id".into(), args: vec![] });
    ns.types.push(handle);
    ResolvedModel::link(Model { namespaces: vec![ns] }).expect("link")
}

fn named(name: &str) -> AnyType {
    AnyType::Named { name: name.into(), args: vec![] }
}

#[test]
fn shapes_map_to_their_carriers() {
    let m = model();
    assert_eq!(carrier_of(&m, &AnyType::String, false), Carrier::Pointer);
    assert_eq!(
        carrier_of(
            &m,
            &AnyType::Array {
                element: Box::new(AnyType::Primitive { ty: Primitive::F64 }),
                length_param: None,
                fixed_size: None,
                zero_terminated: true,
            },
            false
        ),
        Carrier::Pointer
    );
    assert_eq!(
        carrier_of(
            &m,
            &AnyType::Pointer { target: Box::new(AnyType::Primitive { ty: Primitive::I32 }) },
            false
        ),
        Carrier::Pointer
    );
}

#[test]
fn booleans_cross_as_integers() {
    let m = model();
    assert_eq!(carrier_of(&m, &AnyType::Primitive { ty: Primitive::Bool }, false), Carrier::I32);
}

#[test]
fn platform_long_width_follows_the_switch() {
    let m = model();
    let long = AnyType::Primitive { ty: Primitive::Long };
    let ulong = AnyType::Primitive { ty: Primitive::ULong };
    assert_eq!(carrier_of(&m, &long, false), Carrier::I64);
    assert_eq!(carrier_of(&m, &long, true), Carrier::I32);
    assert_eq!(carrier_of(&m, &ulong, false), Carrier::U64);
    assert_eq!(carrier_of(&m, &ulong, true), Carrier::U32);
}

#[test]
fn registered_kinds_map_by_kind() {
    let m = model();
    assert_eq!(carrier_of(&m, &named("Demo.Orientation"), false), Carrier::I32);
    assert_eq!(carrier_of(&m, &named("Demo.EventMask"), false), Carrier::I32);
    assert_eq!(carrier_of(&m, &named("Demo.Window"), false), Carrier::Pointer);
    assert_eq!(carrier_of(&m, &named("Demo.Rectangle"), false), Carrier::Pointer);
    assert_eq!(carrier_of(&m, &named("Demo.CompareFunc"), false), Carrier::Pointer);
}

#[test]
fn alias_chains_flatten_to_the_ultimate_carrier() {
    let m = model();
    assert_eq!(carrier_of(&m, &named("Demo.Id"), false), Carrier::I64);
    assert_eq!(carrier_of(&m, &named("Demo.Handle"), false), Carrier::I64);
}

#[test]
fn unresolved_references_degrade_to_pointer() {
    let m = model();
    assert_eq!(carrier_of(&m, &named("Gtk.Unknown"), false), Carrier::Pointer);
}

#[test]
fn carrier_spellings() {
    assert_eq!(Carrier::Pointer.rust_type(), "*mut core::ffi::c_void");
    assert_eq!(Carrier::I32.rust_type(), "i32");
    assert_eq!(Carrier::Void.rust_type(), "()");
}
