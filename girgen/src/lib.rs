//! girgen — resolved GObject-Introspection model → Rust binding generator.
//!
//! Consumes a model document (the output of a GIR front-end) and emits one
//! Rust source file per namespace: type wrappers, method bodies with full
//! marshaling and ownership handling, callback trampolines and constants.
//!
//! # Quick start
//!
//! Generate binding sources from a config (suitable for `build.rs`):
//!
//! ```no_run
//! use std::path::Path;
//!
//! // Reads config TOML, links the model, writes one .rs file per namespace.
//! girgen::run(Path::new("girgen.toml"), None).unwrap();
//! ```
//!
//! Or get the sources without writing to disk:
//!
//! ```no_run
//! use std::path::Path;
//!
//! let sources = girgen::generate(Path::new("girgen.toml")).unwrap();
//! for (namespace, text) in &sources {
//!     println!("{namespace}: {} bytes", text.len());
//! }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

pub mod call;
pub mod carrier;
pub mod closure;
pub mod config;
pub mod emit;
pub mod marshal;
pub mod model;
pub mod ownership;
pub mod values;

use marshal::Marshaler;
use model::{AnyType, Namespace, ResolvedModel, TypeKind};

/// Run the full pipeline: load config, link the model document, generate
/// binding sources and write one file per namespace.
///
/// `config_path` is the path to a `girgen.toml` configuration file.
/// `output` optionally overrides the output directory from the config.
///
/// Returns the paths of the written files.
pub fn run(config_path: &Path, output: Option<&Path>) -> Result<Vec<PathBuf>> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let sources = generate_from_config(&cfg, base_dir)?;

    let out_dir = match output {
        Some(p) => p.to_path_buf(),
        None => base_dir.join(&cfg.output.dir),
    };
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;

    let mut written = Vec::new();
    for (namespace, text) in &sources {
        let path = out_dir.join(format!("{}.rs", emit::snake_case(namespace)));
        std::fs::write(&path, text)
            .with_context(|| format!("writing output to {}", path.display()))?;
        info!(path = %path.display(), size = text.len(), "wrote bindings");
        written.push(path);
    }

    Ok(written)
}

/// Parse a `girgen.toml` config file, link the referenced model document and
/// return `(namespace, source)` pairs without writing to disk.
pub fn generate(config_path: &Path) -> Result<Vec<(String, String)>> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    generate_from_config(&cfg, base_dir)
}

/// Generate binding sources from an already-loaded [`config::Config`].
///
/// `base_dir` is the directory relative to which the model document path in
/// the config is resolved (typically the parent directory of the TOML file).
pub fn generate_from_config(cfg: &config::Config, base_dir: &Path) -> Result<Vec<(String, String)>> {
    let model_path = base_dir.join(&cfg.model);
    let document = config::load_model(&model_path)
        .with_context(|| format!("loading model from {}", model_path.display()))?;

    info!(
        namespaces = document.namespaces.len(),
        long_as_int = cfg.long_as_int,
        "loaded model document"
    );

    let resolved = ResolvedModel::link(document).context("linking model")?;

    // Validate references before emitting: a missing namespace surfaces here
    // with usage context instead of as pointer-level fallbacks scattered
    // through the output.
    validate_type_references(&resolved, cfg.allow_unresolved)?;

    let marshaler = Marshaler::new(&resolved, cfg.long_as_int);

    let mut sources = Vec::new();
    for ns in resolved.namespaces() {
        if !cfg.namespaces.is_empty() && !cfg.namespaces.contains(&ns.name) {
            continue;
        }
        let text = emit::emit_namespace(&marshaler, ns)
            .with_context(|| format!("emitting namespace `{}`", ns.name))?;
        info!(namespace = %ns.name, types = ns.types.len(), "generated bindings");
        sources.push((ns.name.clone(), text));
    }

    Ok(sources)
}

// ---------------------------------------------------------------------------
// Type-reference validation
// ---------------------------------------------------------------------------

/// A single unresolved type reference with context about where it was found.
struct UnresolvedRef {
    type_name: String,
    namespace: String,
    context: String,
}

/// Walk every `AnyType` tree in the model and verify that each `Named`
/// reference resolves to a registered type.
///
/// With `allow_unresolved`, unresolved references are logged and left to the
/// carrier resolver's pointer-level fallback instead of failing the run.
fn validate_type_references(model: &ResolvedModel, allow_unresolved: bool) -> Result<()> {
    let mut unresolved: Vec<UnresolvedRef> = Vec::new();

    for ns in model.namespaces() {
        collect_namespace(model, ns, &mut unresolved);
    }

    if unresolved.is_empty() {
        return Ok(());
    }

    // Deduplicate by type name for a concise summary, but keep the first
    // usage context for each name.
    let mut seen = std::collections::HashSet::new();
    let mut unique: Vec<&UnresolvedRef> = Vec::new();
    for r in &unresolved {
        if seen.insert(&r.type_name) {
            unique.push(r);
        }
    }

    if allow_unresolved {
        for r in &unique {
            warn!(
                name = %r.type_name,
                context = %r.context,
                "unresolved type reference; degrading to pointer-level marshaling"
            );
        }
        return Ok(());
    }

    let mut msg = format!(
        "{} unresolved type reference(s) found.\n\
         Hint: add the namespace that defines each type to the model document, \
         or set `allow_unresolved = true` to degrade them to raw pointers.\n",
        unique.len()
    );
    for r in &unique {
        msg.push_str(&format!(
            "\n  • `{}` — referenced in {} (namespace `{}`)",
            r.type_name, r.context, r.namespace,
        ));
    }

    anyhow::bail!("{msg}");
}

fn collect_namespace(model: &ResolvedModel, ns: &Namespace, out: &mut Vec<UnresolvedRef>) {
    for rt in &ns.types {
        for field in &rt.fields {
            collect_unresolved(
                model,
                &field.ty,
                &ns.name,
                &format!("field `{}` of `{}`", field.name, rt.name),
                out,
            );
        }
        if let Some(aliased) = &rt.aliased {
            collect_unresolved(model, aliased, &ns.name, &format!("alias `{}`", rt.name), out);
        }
        if let Some(parent) = &rt.parent {
            if rt.kind == TypeKind::Class && model.lookup(parent).is_none() {
                out.push(UnresolvedRef {
                    type_name: parent.clone(),
                    namespace: ns.name.clone(),
                    context: format!("parent of class `{}`", rt.name),
                });
            }
        }
        if let Some(sig) = &rt.signature {
            for p in &sig.parameters {
                collect_unresolved(
                    model,
                    &p.ty,
                    &ns.name,
                    &format!("param `{}` of callback `{}`", p.name, rt.name),
                    out,
                );
            }
            collect_unresolved(
                model,
                &sig.return_value.ty,
                &ns.name,
                &format!("return type of callback `{}`", rt.name),
                out,
            );
        }
        for f in &rt.functions {
            collect_function(model, f, &ns.name, &format!("{}.{}", rt.name, f.name), out);
        }
    }
    for f in &ns.functions {
        collect_function(model, f, &ns.name, &f.name, out);
    }
    for c in &ns.constants {
        collect_unresolved(model, &c.ty, &ns.name, &format!("constant `{}`", c.name), out);
    }
}

fn collect_function(
    model: &ResolvedModel,
    f: &model::Function,
    ns: &str,
    label: &str,
    out: &mut Vec<UnresolvedRef>,
) {
    collect_unresolved(
        model,
        &f.return_value.ty,
        ns,
        &format!("return type of `{label}`"),
        out,
    );
    for p in &f.parameters {
        collect_unresolved(model, &p.ty, ns, &format!("param `{}` of `{label}`", p.name), out);
    }
}

/// Recursively walk an `AnyType` and collect any `Named` reference that is
/// not registered in the model.
fn collect_unresolved(
    model: &ResolvedModel,
    ty: &AnyType,
    namespace: &str,
    context: &str,
    out: &mut Vec<UnresolvedRef>,
) {
    match ty {
        AnyType::Named { name, args } => {
            if model.lookup(name).is_none() {
                out.push(UnresolvedRef {
                    type_name: name.clone(),
                    namespace: namespace.to_string(),
                    context: context.to_string(),
                });
            }
            for arg in args {
                collect_unresolved(model, arg, namespace, context, out);
            }
        }
        AnyType::Pointer { target } => {
            collect_unresolved(model, target, namespace, context, out);
        }
        AnyType::Array { element, .. } => {
            collect_unresolved(model, element, namespace, context, out);
        }
        // Primitives and strings — nothing to check.
        _ => {}
    }
}
