//! Callback bridge — scope resolution and upcall trampoline generation.
//!
//! A host closure crossing into native code needs a trampoline: an
//! `extern "C"` function that receives carrier arguments, converts them to
//! host values, invokes the closure, and converts the result back. How long
//! the trampoline (and the closure it captures) must stay alive is the
//! parameter's scope; annotations that cannot be honored degrade to a longer
//! lifetime, never a shorter one.

use std::collections::HashSet;

use anyhow::{Context, Result};

use crate::carrier::{Carrier, carrier_of};
use crate::emit::{ident, snake_case};
use crate::marshal::Marshaler;
use crate::model::{AnyType, ArraySize, RegisteredType, Scope, Signature, TypedValue};

/// Effective scope of a callback-typed parameter.
///
/// `Notified` without a destroy-notify sibling cannot be released safely, so
/// it degrades to `Forever`. An unannotated callback defaults to `Bound` on
/// instance methods (freed with the instance) and `Forever` elsewhere.
pub fn resolved_scope(v: &TypedValue, in_instance_method: bool) -> Scope {
    match v.scope {
        Some(Scope::Notified) if v.destroy_param.is_none() => Scope::Forever,
        Some(s) => s,
        None => {
            if in_instance_method {
                Scope::Bound
            } else {
                Scope::Forever
            }
        }
    }
}

/// Arena expression the trampoline registration of a callback parameter is
/// bound to, per its resolved scope. The call sequencer evaluates this once
/// when it binds the (trampoline, user-data) pair.
pub fn scope_arena(v: &TypedValue, in_instance_method: bool) -> String {
    match resolved_scope(v, in_instance_method) {
        Scope::Call => "&_arena".to_string(),
        Scope::Bound => "Arenas::attach(Arena::confined(), self)".to_string(),
        Scope::Async | Scope::Notified => format!("&_{}_scope", v.name),
        Scope::Forever => "Arena::global()".to_string(),
    }
}

/// Name of the generated trampoline for a callback type.
pub fn trampoline_name(rt: &RegisteredType) -> String {
    format!("{}_upcall", snake_case(&rt.name))
}

/// Generate the upcall trampoline for a callback type: the `extern "C"`
/// function whose address is handed to native code.
pub fn upcall(m: &Marshaler, rt: &RegisteredType) -> Result<String> {
    let sig = rt
        .signature
        .as_ref()
        .with_context(|| format!("callback `{}` has no signature", rt.qualified_name()))?;

    let model = m.model();
    let ret_carrier = carrier_of(model, &sig.return_value.ty, m.long_as_int());
    let hidden = hidden_names(sig);

    let mut out = String::new();
    let mut w = |line: &str| {
        out.push_str(line);
        out.push('\n');
    };

    // Carrier signature: every declared parameter plus the user-data slot
    // that carries the closure, plus the error slot for throwing callbacks.
    let mut args: Vec<String> = sig
        .parameters
        .iter()
        .map(|p| {
            format!("{}: {}", ident(&p.name), carrier_of(model, &p.ty, m.long_as_int()).rust_type())
        })
        .collect();
    args.push("_data: *mut core::ffi::c_void".to_string());
    if sig.throws {
        args.push("_error: *mut *mut core::ffi::c_void".to_string());
    }
    let ret = match ret_carrier {
        Carrier::Void => String::new(),
        c => format!(" -> {}", c.rust_type()),
    };
    w(&format!(
        "unsafe extern \"C\" fn {}({}){ret} {{",
        trampoline_name(rt),
        args.join(", ")
    ));

    // The closure travels through the user-data pointer.
    w(&format!("    let _cb = unsafe {{ &*(_data as *const {}) }};", rt.name));

    // Convert carrier arguments to host values, arrays after everything else
    // so their length siblings are already in scope as plain carriers.
    let (plain, arrays): (Vec<_>, Vec<_>) = sig
        .parameters
        .iter()
        .filter(|p| !hidden.contains(p.name.as_str()))
        .partition(|p| !matches!(p.ty, AnyType::Array { .. }));
    for p in plain.iter().chain(arrays.iter()) {
        w(&format!("    let _{} = {};", p.name, m.to_host(p, &ident(&p.name), true)));
    }

    // Invoke the host closure inside a panic guard: unwinding across the
    // native frame would abort the process.
    let call_args: Vec<String> = sig
        .parameters
        .iter()
        .filter(|p| !hidden.contains(p.name.as_str()))
        .map(|p| format!("_{}", p.name))
        .collect();
    w(&format!(
        "    let _result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (_cb.0)({})));",
        call_args.join(", ")
    ));

    w("    match _result {");
    if sig.throws {
        // A throwing callback reports failure by populating the error slot
        // and returning the default carrier value.
        w("        Ok(Ok(_r)) => {");
        w(&format!("            {}", result_expr(m, sig)));
        w("        }");
        w("        Ok(Err(_e)) => {");
        w("            unsafe { *_error = _e.into_native() };");
        w(&format!("            {}", default_return(ret_carrier)));
        w("        }");
    } else {
        w("        Ok(_r) => {");
        w(&format!("            {}", result_expr(m, sig)));
        w("        }");
    }
    // Safety net: a panic in user code is logged, never propagated into
    // native stack frames.
    w("        Err(_) => {");
    w(&format!(
        "            interop::log_upcall_panic({:?});",
        rt.qualified_name()
    ));
    w(&format!("            {}", default_return(ret_carrier)));
    w("        }");
    w("    }");
    w("}");
    Ok(out)
}

fn result_expr(m: &Marshaler, sig: &Signature) -> String {
    if sig.return_value.ty.is_void() {
        "let _ = _r;".to_string()
    } else {
        m.to_native(&sig.return_value, "_r")
    }
}

fn default_return(c: Carrier) -> &'static str {
    match c {
        Carrier::Void => "",
        Carrier::F32 => "0.0f32",
        Carrier::F64 => "0.0f64",
        Carrier::Pointer => "std::ptr::null_mut()",
        _ => "0",
    }
}

/// Parameters of a callback signature that the host closure never sees:
/// array lengths and the nested user-data slot.
fn hidden_names(sig: &Signature) -> HashSet<&str> {
    let mut hidden = HashSet::new();
    for p in &sig.parameters {
        if let Some(ArraySize::LengthParam(len)) = p.ty.array_size() {
            if let Some(q) = sig.parameters.iter().find(|q| q.name == len) {
                hidden.insert(q.name.as_str());
            }
        }
        if let Some(ud) = &p.closure_param {
            hidden.insert(ud.as_str());
        }
        if let Some(d) = &p.destroy_param {
            hidden.insert(d.as_str());
        }
    }
    hidden
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, Nullability, Primitive, Role, Transfer};

    fn callback_param(scope: Option<Scope>, destroy: Option<&str>) -> TypedValue {
        TypedValue {
            name: "callback".into(),
            ty: AnyType::Named { name: "GLib.SourceFunc".into(), args: vec![] },
            role: Role::Parameter,
            direction: Direction::In,
            transfer: Transfer::None,
            nullability: Nullability::Unspecified,
            scope,
            closure_param: Some("user_data".into()),
            destroy_param: destroy.map(str::to_string),
        }
    }

    #[test]
    fn notified_without_destroy_degrades_to_forever() {
        let p = callback_param(Some(Scope::Notified), None);
        assert_eq!(resolved_scope(&p, false), Scope::Forever);
    }

    #[test]
    fn notified_with_destroy_is_kept() {
        let p = callback_param(Some(Scope::Notified), Some("destroy"));
        assert_eq!(resolved_scope(&p, false), Scope::Notified);
    }

    #[test]
    fn unannotated_defaults_depend_on_receiver() {
        let p = callback_param(None, None);
        assert_eq!(resolved_scope(&p, true), Scope::Bound);
        assert_eq!(resolved_scope(&p, false), Scope::Forever);
    }

    #[test]
    fn explicit_scopes_pass_through() {
        for s in [Scope::Call, Scope::Async, Scope::Forever, Scope::Bound] {
            let p = callback_param(Some(s), None);
            assert_eq!(resolved_scope(&p, false), s);
        }
    }
}
