//! Callback scope rules: each scope binds the trampoline registration to a
//! different allocation arena, and annotations that cannot be honored degrade
//! to a longer lifetime, never a shorter one.

use girgen::call::render_function;
use girgen::closure::scope_arena;
use girgen::marshal::Marshaler;
use girgen::model::*;

fn model() -> ResolvedModel {
    let callback = RegisteredType {
        name: "SourceFunc".into(),
        namespace: "Demo".into(),
        c_type: "DemoSourceFunc".into(),
        kind: TypeKind::Callback,
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
        signature: Some(Signature {
            parameters: Vec::new(),
            return_value: TypedValue::void_return(),
            throws: false,
        }),
        fields: Vec::new(),
        functions: Vec::new(),
    };
    let ns = Namespace {
        name: "Demo".into(),
        shared_library: "libdemo.so".into(),
        types: vec![callback],
        functions: Vec::new(),
        constants: Vec::new(),
    };
    ResolvedModel::link(Model { namespaces: vec![ns] }).expect("link")
}

fn callback_param(scope: Option<Scope>, destroy: Option<&str>) -> TypedValue {
    TypedValue {
        name: "func".into(),
        ty: AnyType::Named { name: "Demo.SourceFunc".into(), args: vec![] },
        role: Role::Parameter,
        direction: Direction::In,
        transfer: Transfer::None,
        nullability: Nullability::Unspecified,
        scope,
        closure_param: Some("user_data".into()),
        destroy_param: destroy.map(str::to_string),
    }
}

fn pointer_param(name: &str) -> TypedValue {
    TypedValue {
        name: name.into(),
        ty: AnyType::Pointer { target: Box::new(AnyType::Primitive { ty: Primitive::Void }) },
        role: Role::Parameter,
        direction: Direction::In,
        transfer: Transfer::None,
        nullability: Nullability::Unspecified,
        scope: None,
        closure_param: None,
        destroy_param: None,
    }
}

/// `demo_watch(func, user_data[, notify])`.
fn watch(cb: TypedValue) -> Function {
    let mut parameters = vec![cb.clone(), pointer_param("user_data")];
    if let Some(d) = &cb.destroy_param {
        parameters.push(pointer_param(d));
    }
    Function {
        name: "watch".into(),
        c_identifier: "demo_watch".into(),
        parameters,
        return_value: TypedValue::void_return(),
        throws: false,
        instance: false,
        platform: None,
    }
}

#[test]
fn call_scope_binds_to_the_call_arena() {
    let p = callback_param(Some(Scope::Call), None);
    assert_eq!(scope_arena(&p, false), "&_arena");
}

#[test]
fn async_and_notified_get_their_own_scope_arena() {
    for scope in [Scope::Async, Scope::Notified] {
        let p = callback_param(Some(scope), Some("notify"));
        assert_eq!(scope_arena(&p, false), "&_func_scope");
    }
}

#[test]
fn notified_without_destroy_degrades_to_forever() {
    let p = callback_param(Some(Scope::Notified), None);
    assert_eq!(scope_arena(&p, false), "Arena::global()");
}

#[test]
fn forever_scope_uses_the_global_arena() {
    let p = callback_param(Some(Scope::Forever), None);
    assert_eq!(scope_arena(&p, false), "Arena::global()");
}

#[test]
fn unannotated_callbacks_default_by_receiver() {
    let p = callback_param(None, None);
    assert_eq!(scope_arena(&p, false), "Arena::global()");
    assert_eq!(scope_arena(&p, true), "Arenas::attach(Arena::confined(), self)");
}

#[test]
fn callback_crosses_as_a_trampoline_and_data_pair() {
    let m = model();
    let ms = Marshaler::new(&m, false);
    let f = watch(callback_param(Some(Scope::Call), None));
    let text = render_function(&ms, &f, 0).expect("render");
    assert!(
        text.contains("let (_func_fn, _func_data) = func.to_callback(&_arena);"),
        "missing pair binding:\n{text}"
    );
    assert!(
        text.contains("ffi::demo_watch(_func_fn, _func_data)"),
        "the user-data slot must carry the closure state:\n{text}"
    );
    assert!(!text.contains("std::ptr::null_mut()"), "no argument may be nulled out:\n{text}");
}

#[test]
fn notified_scope_allocates_a_shared_arena_and_wires_destroy() {
    let m = model();
    let ms = Marshaler::new(&m, false);
    let f = watch(callback_param(Some(Scope::Notified), Some("notify")));
    let text = render_function(&ms, &f, 0).expect("render");
    assert!(text.contains("let _func_scope = Arena::shared();"), "missing scope arena:\n{text}");
    assert!(text.contains("func.to_callback(&_func_scope)"));
    assert!(text.contains("interop::destroy_notify(&_func_scope)"));
}

#[test]
fn destroy_without_scope_annotation_stays_off_the_scope_local() {
    // No annotation resolves to forever; the destroy argument must follow the
    // same resolution instead of naming a local that was never declared.
    let m = model();
    let ms = Marshaler::new(&m, false);
    let f = watch(callback_param(None, Some("notify")));
    let text = render_function(&ms, &f, 0).expect("render");
    assert!(!text.contains("_func_scope"), "undeclared scope local referenced:\n{text}");
    assert!(text.contains("func.to_callback(Arena::global())"));
    assert!(text.contains("interop::destroy_notify(Arena::global())"));
}
