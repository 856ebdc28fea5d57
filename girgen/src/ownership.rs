//! Ownership tracker — decides what the generated code must do with a value
//! after the native call returns.
//!
//! Decisions are data ([`PostAction`]), not emitted text, so the transfer ×
//! kind table is testable on its own. The call sequencer renders each action
//! into the postprocessing block of the generated method.

use crate::model::{
    AnyType, Function, RegisteredType, ResolvedModel, Transfer, TypeKind, TypedValue,
};

/// One postprocessing obligation attached to a marshaled value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Acquire a strong reference on an unowned refcounted wrapper.
    Ref { ref_fn: String },
    /// Sink a floating reference; the wrapper then owns it.
    Sink { sink_fn: String },
    /// The wrapper owns the native memory; register its destructor.
    TakeOwnership { free_fn: Option<String> },
    /// No ownership was transferred and the type has a copy function: copy,
    /// then own the copy.
    CopyAndOwn { copy_fn: String, free_fn: Option<String> },
    /// No copy function, but the memory layout is fully known: clone the
    /// bytes into host-owned memory.
    ByteCopyAndOwn { size: usize },
    /// Neither copy nor layout available. The wrapper stays borrowed and its
    /// validity is tied to the native side.
    ReturnBorrowed,
    /// Full transfer of an array of refcounted elements: each element gets
    /// its own reference.
    RefEachElement { ref_fn: String },
    /// Close the allocation scope of a call-scoped callback parameter.
    CloseScope { param: String },
}

/// All postprocessing obligations of one call: the return value's, then one
/// per parameter that needs cleanup, in declaration order.
pub fn call_actions(model: &ResolvedModel, f: &Function) -> Vec<(String, PostAction)> {
    let mut actions = Vec::new();
    if let Some(action) = value_action(model, f, &f.return_value) {
        actions.push((f.return_value.name.clone(), action));
    }
    for p in &f.parameters {
        if p.is_out() {
            if let Some(action) = value_action(model, f, p) {
                actions.push((p.name.clone(), action));
            }
        }
        if matches!(p.scope, Some(crate::model::Scope::Call)) {
            actions.push((p.name.clone(), PostAction::CloseScope { param: p.name.clone() }));
        }
    }
    actions
}

/// The ownership obligation of a single returned or out-marshaled value, if
/// any. Values that are not registered-type references never carry one.
pub fn value_action(model: &ResolvedModel, f: &Function, v: &TypedValue) -> Option<PostAction> {
    if let AnyType::Array { element, .. } = &v.ty {
        if v.transfer == Transfer::Full {
            let elem = model.resolve(element)?;
            if elem.is_refcounted() {
                let ref_fn = ref_function(elem)?;
                return Some(PostAction::RefEachElement { ref_fn });
            }
        }
        return None;
    }

    let target = model.resolve(&v.ty)?;

    if target.is_refcounted() {
        return refcounted_action(f, target, v);
    }
    if target.is_plain_layout() {
        return plain_action(f, target, v);
    }
    None
}

fn refcounted_action(
    f: &Function,
    target: &RegisteredType,
    v: &TypedValue,
) -> Option<PostAction> {
    match v.transfer {
        Transfer::Full => Some(PostAction::TakeOwnership {
            free_fn: unref_function(target),
        }),
        Transfer::None | Transfer::Container => {
            // The ref/sink functions themselves must not re-ref their own
            // return value; the native side already balanced the count.
            if is_ref_function(f, target) {
                return Some(PostAction::TakeOwnership {
                    free_fn: unref_function(target),
                });
            }
            if target.floating {
                let sink_fn = target
                    .ref_fn
                    .clone()
                    .or_else(|| gobject_default(target, "g_object_ref_sink"))?;
                return Some(PostAction::Sink { sink_fn });
            }
            let ref_fn = ref_function(target)?;
            Some(PostAction::Ref { ref_fn })
        }
    }
}

/// Reference function of a refcounted type. Classes and interfaces without an
/// explicit annotation use the GObject default; an unowned object must still
/// be reffed.
fn ref_function(target: &RegisteredType) -> Option<String> {
    target.ref_fn.clone().or_else(|| gobject_default(target, "g_object_ref"))
}

fn unref_function(target: &RegisteredType) -> Option<String> {
    target.unref_fn.clone().or_else(|| gobject_default(target, "g_object_unref"))
}

fn gobject_default(target: &RegisteredType, name: &str) -> Option<String> {
    matches!(target.kind, TypeKind::Class | TypeKind::Interface).then(|| name.to_string())
}

fn plain_action(f: &Function, target: &RegisteredType, v: &TypedValue) -> Option<PostAction> {
    match v.transfer {
        Transfer::Full | Transfer::Container => Some(PostAction::TakeOwnership {
            free_fn: target.free_fn.clone(),
        }),
        Transfer::None => {
            // A copy function must not copy its own result.
            if is_copy_function(f, target) {
                return Some(PostAction::TakeOwnership {
                    free_fn: target.free_fn.clone(),
                });
            }
            if let Some(copy_fn) = &target.copy_fn {
                return Some(PostAction::CopyAndOwn {
                    copy_fn: copy_fn.clone(),
                    free_fn: target.free_fn.clone(),
                });
            }
            if let Some(size) = target.layout_size {
                return Some(PostAction::ByteCopyAndOwn { size });
            }
            Some(PostAction::ReturnBorrowed)
        }
    }
}

/// Whether `f` is the ref (or ref_sink) function of `target`.
fn is_ref_function(f: &Function, target: &RegisteredType) -> bool {
    target.ref_fn.as_deref() == Some(f.c_identifier.as_str())
        || (f.instance && matches!(f.name.as_str(), "ref" | "ref_sink"))
}

/// Whether `f` is the copy function of `target`.
fn is_copy_function(f: &Function, target: &RegisteredType) -> bool {
    target.copy_fn.as_deref() == Some(f.c_identifier.as_str())
        || (f.instance && f.name == "copy")
}
