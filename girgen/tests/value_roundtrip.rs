//! Value-level marshaling: constant rendering, the enum/bitfield decode
//! properties it is built on, and the direction pairs of the expression
//! engine for primitives, strings and arrays.

use girgen::marshal::Marshaler;
use girgen::model::*;
use girgen::values::{constant_item, decode_bitfield, decode_enum, encode_bitfield};

fn model() -> ResolvedModel {
    let orientation = RegisteredType {
        name: "Orientation".into(),
        namespace: "Demo".into(),
        c_type: "DemoOrientation".into(),
        kind: TypeKind::Enum,
        parent: None,
        get_type_fn: None,
        ref_fn: None,
        unref_fn: None,
        copy_fn: None,
        free_fn: None,
        floating: false,
        members: vec![
            Member { name: "horizontal".into(), value: 0 },
            Member { name: "vertical".into(), value: 1 },
        ],
        layout_size: None,
        aliased: None,
        signature: None,
        fields: Vec::new(),
        functions: Vec::new(),
    };
    let mut mask = derive_type(&orientation, "EventMask", TypeKind::Bitfield);
    mask.members = vec![
        Member { name: "pointer_motion".into(), value: 4 },
        Member { name: "button_press".into(), value: 256 },
    ];
    let mut id = derive_type(&orientation, "Id", TypeKind::Alias);
    id.members.clear();
    id.aliased = Some(AnyType::Primitive { ty: Primitive::I64 });

    let ns = Namespace {
        name: "Demo".into(),
        shared_library: "libdemo.so".into(),
        types: vec![orientation, mask, id],
        functions: Vec::new(),
        constants: Vec::new(),
    };
    ResolvedModel::link(Model { namespaces: vec![ns] }).expect("link")
}

fn derive_type(base: &RegisteredType, name: &str, kind: TypeKind) -> RegisteredType {
    RegisteredType {
        name: name.into(),
        c_type: format!("Demo{name}"),
        kind,
        namespace: base.namespace.clone(),
        parent: None,
        get_type_fn: None,
        ref_fn: None,
        unref_fn: None,
        copy_fn: None,
        free_fn: None,
        floating: false,
        members: base.members.clone(),
        layout_size: None,
        aliased: None,
        signature: None,
        fields: Vec::new(),
        functions: Vec::new(),
    }
}

fn constant(name: &str, ty: AnyType, value: ConstantValue) -> Constant {
    Constant { name: name.into(), ty, value }
}

fn named(name: &str) -> AnyType {
    AnyType::Named { name: name.into(), args: vec![] }
}

#[test]
fn primitive_constants_render_directly() {
    let m = model();
    let c = constant("MAX", AnyType::Primitive { ty: Primitive::I32 }, ConstantValue::Signed(256));
    assert_eq!(constant_item(&m, &c).unwrap(), "pub const MAX: i32 = 256;");

    let c = constant("PI", AnyType::Primitive { ty: Primitive::F64 }, ConstantValue::Float(3.5));
    assert_eq!(constant_item(&m, &c).unwrap(), "pub const PI: f64 = 3.5;");

    // Some namespaces spell booleans as 0/1.
    let c = constant("ON", AnyType::Primitive { ty: Primitive::Bool }, ConstantValue::Signed(1));
    assert_eq!(constant_item(&m, &c).unwrap(), "pub const ON: bool = true;");
}

#[test]
fn string_constants_are_escaped() {
    let m = model();
    let c = constant("GREETING", AnyType::String, ConstantValue::Str("say \"hi\"".into()));
    assert_eq!(
        constant_item(&m, &c).unwrap(),
        "pub const GREETING: &str = \"say \\\"hi\\\"\";"
    );
}

#[test]
fn enum_constants_decode_to_a_member() {
    let m = model();
    let c = constant("DEFAULT", named("Demo.Orientation"), ConstantValue::Signed(1));
    assert_eq!(
        constant_item(&m, &c).unwrap(),
        "pub const DEFAULT: Orientation = Orientation::Vertical;"
    );
}

#[test]
fn enum_constants_reject_unmatched_values() {
    let m = model();
    let c = constant("BROKEN", named("Demo.Orientation"), ConstantValue::Signed(7));
    let err = constant_item(&m, &c).unwrap_err();
    assert!(format!("{err:#}").contains("matches no member"), "unexpected error: {err:#}");
}

#[test]
fn bitfield_constants_stay_lenient() {
    let m = model();
    let c = constant("MASK", named("Demo.EventMask"), ConstantValue::Signed(260));
    assert_eq!(
        constant_item(&m, &c).unwrap(),
        "pub const MASK: EventMask = EventMask::from_bits_lenient(260);"
    );
}

#[test]
fn alias_constants_wrap_the_primitive() {
    let m = model();
    let c = constant("ROOT", named("Demo.Id"), ConstantValue::Signed(1));
    assert_eq!(constant_item(&m, &c).unwrap(), "pub const ROOT: Id = Id(1);");
}

#[test]
fn bitfield_roundtrip_through_decode_and_encode() {
    let m = model();
    let mask = m.lookup("Demo.EventMask").expect("EventMask");
    let bits = 4 | 256;
    let (members, rest) = decode_bitfield(mask, bits);
    assert_eq!(rest, 0);
    assert_eq!(encode_bitfield(members), bits);

    // Unknown bits survive the split but never re-encode.
    let (members, rest) = decode_bitfield(mask, bits | (1 << 20));
    assert_eq!(rest, 1 << 20);
    assert_eq!(encode_bitfield(members), bits);
}

#[test]
fn enum_decode_matches_exact_values_only() {
    let m = model();
    let orientation = m.lookup("Demo.Orientation").expect("Orientation");
    assert_eq!(decode_enum(orientation, 1).map(|mm| mm.name.as_str()), Some("vertical"));
    assert!(decode_enum(orientation, 2).is_none());
}

fn value(name: &str, ty: AnyType) -> TypedValue {
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
fn bool_crosses_the_boundary_as_an_integer() {
    let m = model();
    let ms = Marshaler::new(&m, false);
    let flag = value("flag", AnyType::Primitive { ty: Primitive::Bool });
    assert_eq!(ms.to_native(&flag, "flag"), "if flag { 1 } else { 0 }");
    assert_eq!(ms.to_host(&flag, "_result", false), "_result != 0");

    // Other primitives pass through untouched in both directions.
    let count = value("count", AnyType::Primitive { ty: Primitive::I32 });
    assert_eq!(ms.to_native(&count, "count"), "count");
    assert_eq!(ms.to_host(&count, "_result", false), "_result");
}

#[test]
fn string_conversions_pair_up_by_transfer() {
    let m = model();
    let ms = Marshaler::new(&m, false);
    let name = value("name", AnyType::String);
    assert_eq!(ms.to_native(&name, "name"), "interop::allocate_native_string(name, &_arena)");
    assert_eq!(
        ms.to_host(&name, "_result", false),
        "interop::get_string_from(_result, Transfer::None)"
    );

    let mut owned = value("name", AnyType::String);
    owned.transfer = Transfer::Full;
    assert_eq!(ms.to_native(&owned, "name"), "interop::allocate_unowned_string(name)");
    assert_eq!(
        ms.to_host(&owned, "_result", false),
        "interop::get_string_from(_result, Transfer::Full)"
    );
}

#[test]
fn array_reads_follow_the_size_source() {
    let m = model();
    let ms = Marshaler::new(&m, false);
    let elem = Box::new(AnyType::Primitive { ty: Primitive::I32 });

    // Zero-terminated: the helper walks to the terminator, so an immediate
    // terminator yields an empty collection.
    let zt = value(
        "items",
        AnyType::Array {
            element: elem.clone(),
            length_param: None,
            fixed_size: None,
            zero_terminated: true,
        },
    );
    assert_eq!(
        ms.to_host(&zt, "_result", false),
        "interop::get_zero_terminated_array_from(_result, |_p| _p)"
    );

    // Fixed size: exactly N elements, no terminator scan.
    let fixed = value(
        "items",
        AnyType::Array {
            element: elem.clone(),
            length_param: None,
            fixed_size: Some(8),
            zero_terminated: false,
        },
    );
    assert_eq!(
        ms.to_host(&fixed, "_result", false),
        "interop::get_array_from(_result, 8, |_p| _p)"
    );

    // Length parameter: the sibling value bounds the read, so zero length
    // yields an empty collection without touching the buffer.
    let sized = value(
        "items",
        AnyType::Array {
            element: elem,
            length_param: Some("n_items".into()),
            fixed_size: None,
            zero_terminated: false,
        },
    );
    assert_eq!(
        ms.to_host(&sized, "_result", false),
        "interop::get_array_from(_result, _n_items as usize, |_p| _p)"
    );
    // Trampoline bodies read the length straight off the carrier argument.
    assert_eq!(
        ms.to_host(&sized, "items", true),
        "interop::get_array_from(items, n_items as usize, |_p| _p)"
    );
}
