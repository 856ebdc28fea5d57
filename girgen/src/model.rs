//! Type model — the bridge between the (out-of-scope) GIR front-end and the
//! code generators.
//!
//! These types are introspection-format-independent: the front-end hands over
//! a fully resolved object graph, and every generator in this crate treats it
//! as read-only input. `ResolvedModel::link` is the only construction path;
//! after linking, nothing mutates the model.

use std::collections::{HashMap, HashSet};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Alias chains longer than this are treated as a model-construction error.
const MAX_ALIAS_DEPTH: usize = 16;

/// A top-level model document: one or more namespaces, already merged and
/// cross-linked by the front-end.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
}

/// A single introspected namespace.
#[derive(Debug, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    /// Shared library the generated bindings link against (e.g. `libgtk-4.so`).
    pub shared_library: String,
    #[serde(default)]
    pub types: Vec<RegisteredType>,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub constants: Vec<Constant>,
}

/// Kind tag of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Class,
    Interface,
    Record,
    Union,
    Enum,
    Bitfield,
    Alias,
    Callback,
}

/// A named type registered in a namespace.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisteredType {
    pub name: String,
    pub namespace: String,
    /// Native (C) type name.
    pub c_type: String,
    pub kind: TypeKind,
    /// Qualified name of the parent type. Classes only.
    #[serde(default)]
    pub parent: Option<String>,
    /// GType registration function, when the type participates in the
    /// GObject type system.
    #[serde(default)]
    pub get_type_fn: Option<String>,
    #[serde(default)]
    pub ref_fn: Option<String>,
    #[serde(default)]
    pub unref_fn: Option<String>,
    #[serde(default)]
    pub copy_fn: Option<String>,
    #[serde(default)]
    pub free_fn: Option<String>,
    /// Objects constructed with a floating reference (e.g. GInitiallyUnowned).
    #[serde(default)]
    pub floating: bool,
    /// Enum/bitfield members.
    #[serde(default)]
    pub members: Vec<Member>,
    /// Statically known memory layout size in bytes, for records/unions whose
    /// fields are all introspectable. `None` for opaque types.
    #[serde(default)]
    pub layout_size: Option<usize>,
    /// The aliased type. Aliases only.
    #[serde(default)]
    pub aliased: Option<AnyType>,
    /// Callback signature. Callbacks only.
    #[serde(default)]
    pub signature: Option<Signature>,
    /// Record/union fields.
    #[serde(default)]
    pub fields: Vec<TypedValue>,
    /// Methods and constructors of this type.
    #[serde(default)]
    pub functions: Vec<Function>,
}

impl RegisteredType {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Reference-counted types get ref/unref postprocessing; plain structs
    /// and unions get copy/free postprocessing instead.
    pub fn is_refcounted(&self) -> bool {
        matches!(self.kind, TypeKind::Class | TypeKind::Interface) || self.ref_fn.is_some()
    }

    /// True for record/union types without reference counting.
    pub fn is_plain_layout(&self) -> bool {
        matches!(self.kind, TypeKind::Record | TypeKind::Union) && !self.is_refcounted()
    }

    pub fn member_value(&self, member: &str) -> Option<i64> {
        self.members.iter().find(|m| m.name == member).map(|m| m.value)
    }
}

/// A single enum or bitfield member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub value: i64,
}

/// Primitive value types crossing the FFI boundary directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    Void,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    /// C `long` — 32-bit on Windows/LLP64, 64-bit on LP64 platforms.
    Long,
    /// C `unsigned long`.
    ULong,
    F32,
    F64,
}

/// A semantic type — the value the marshaling engine dispatches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum AnyType {
    Primitive {
        ty: Primitive,
    },
    String,
    /// Pointer to another type, used for out-boxes and raw addresses.
    Pointer {
        target: Box<AnyType>,
    },
    /// An array. Exactly one of `length_param`, `fixed_size` and
    /// `zero_terminated` should be resolvable; when none is, only
    /// pointer-level marshaling is possible.
    Array {
        element: Box<AnyType>,
        /// Name of the sibling parameter holding the runtime length.
        #[serde(default)]
        length_param: Option<String>,
        #[serde(default)]
        fixed_size: Option<usize>,
        #[serde(default)]
        zero_terminated: bool,
    },
    /// Reference to a registered type by qualified name. Generic containers
    /// (GList, GHashTable) carry their element types in `args`.
    Named {
        name: String,
        #[serde(default)]
        args: Vec<AnyType>,
    },
}

impl AnyType {
    pub fn is_pointer(&self) -> bool {
        matches!(self, AnyType::Pointer { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, AnyType::Primitive { ty: Primitive::Void })
    }
}

/// How the array size is determined at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArraySize {
    /// Sibling parameter with the given name holds the length.
    LengthParam(String),
    Fixed(usize),
    ZeroTerminated,
    /// No size information — pointer-level marshaling only.
    Unknown,
}

impl AnyType {
    /// Resolve the size source of an array type. `length_param` wins over a
    /// fixed size, matching how GIR attributes are prioritized.
    pub fn array_size(&self) -> Option<ArraySize> {
        let AnyType::Array { length_param, fixed_size, zero_terminated, .. } = self else {
            return None;
        };
        Some(if let Some(p) = length_param {
            ArraySize::LengthParam(p.clone())
        } else if let Some(n) = fixed_size {
            ArraySize::Fixed(*n)
        } else if *zero_terminated {
            ArraySize::ZeroTerminated
        } else {
            ArraySize::Unknown
        })
    }
}

/// Role of a typed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Parameter,
    Return,
    Field,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    In,
    Out,
    Inout,
}

/// Transfer-ownership annotation: who owns the value after the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transfer {
    /// Native side retains ownership; the host must not free or unref.
    #[default]
    None,
    /// Only the outer container is transferred.
    Container,
    /// Ownership passes to the receiver.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nullability {
    #[default]
    Unspecified,
    Nullable,
    NotNull,
}

/// Lifetime scope of a callback-typed parameter (see the closure bridge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Call,
    Async,
    Notified,
    Forever,
    Bound,
}

/// A named, typed slot: parameter, return value, field or constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedValue {
    pub name: String,
    pub ty: AnyType,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub transfer: Transfer,
    #[serde(default)]
    pub nullability: Nullability,
    /// Scope annotation for callback-typed parameters.
    #[serde(default)]
    pub scope: Option<Scope>,
    /// Name of the sibling user-data parameter for a callback parameter.
    #[serde(default)]
    pub closure_param: Option<String>,
    /// Name of the sibling destroy-notify parameter for a callback parameter.
    #[serde(default)]
    pub destroy_param: Option<String>,
}

impl TypedValue {
    /// A void return-value slot.
    pub fn void_return() -> Self {
        TypedValue {
            name: "return".into(),
            ty: AnyType::Primitive { ty: Primitive::Void },
            role: Role::Return,
            direction: Direction::default(),
            transfer: Transfer::default(),
            nullability: Nullability::default(),
            scope: None,
            closure_param: None,
            destroy_param: None,
        }
    }

    pub fn is_out(&self) -> bool {
        matches!(self.direction, Direction::Out | Direction::Inout)
    }

    pub fn nullable(&self) -> bool {
        self.nullability == Nullability::Nullable
    }

    pub fn not_null(&self) -> bool {
        self.nullability == Nullability::NotNull
    }
}

/// A callback signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default)]
    pub parameters: Vec<TypedValue>,
    #[serde(default = "TypedValue::void_return")]
    pub return_value: TypedValue,
    /// Reports errors through a trailing error-slot out-parameter.
    #[serde(default)]
    pub throws: bool,
}

/// Platform restriction on a function's availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Windows,
    Macos,
}

/// A function, method or constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Native symbol name.
    pub c_identifier: String,
    #[serde(default)]
    pub parameters: Vec<TypedValue>,
    #[serde(default = "TypedValue::void_return")]
    pub return_value: TypedValue,
    /// Reports errors through a trailing error-slot out-parameter.
    #[serde(default)]
    pub throws: bool,
    /// First parameter is the instance.
    #[serde(default)]
    pub instance: bool,
    /// Symbol only available on this platform.
    #[serde(default)]
    pub platform: Option<Platform>,
}

impl Function {
    /// Parameters that are derived by the generator and hidden from the host
    /// API: array lengths, callback user-data and destroy-notify slots.
    pub fn hidden_param_names(&self) -> HashSet<&str> {
        let mut hidden = HashSet::new();
        for p in &self.parameters {
            if let Some(ArraySize::LengthParam(len)) = p.ty.array_size() {
                // Borrow from the parameter that names it, not the local.
                if let Some(q) = self.parameters.iter().find(|q| q.name == len) {
                    hidden.insert(q.name.as_str());
                }
            }
            if let Some(ud) = &p.closure_param {
                hidden.insert(ud.as_str());
            }
            if let Some(destroy) = &p.destroy_param {
                hidden.insert(destroy.as_str());
            }
        }
        hidden
    }

    pub fn is_hidden(&self, param: &TypedValue) -> bool {
        self.hidden_param_names().contains(param.name.as_str())
    }

    /// The array parameter whose length is carried by `length_param`, if any.
    pub fn array_for_length<'a>(&'a self, length_param: &str) -> Option<&'a TypedValue> {
        self.parameters.iter().find(|p| {
            matches!(p.ty.array_size(), Some(ArraySize::LengthParam(ref l)) if l == length_param)
        })
    }
}

/// A namespace-level constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constant {
    pub name: String,
    pub ty: AnyType,
    pub value: ConstantValue,
}

/// Literal value of a constant, as parsed by the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Str(String),
    Bool(bool),
}

/// The linked, read-only model context passed to every generator.
///
/// Replaces what would otherwise be process-wide lookup tables (name → type,
/// alias → ultimate target) with an explicitly constructed object: built once
/// by [`ResolvedModel::link`], read-only afterwards.
#[derive(Debug)]
pub struct ResolvedModel {
    namespaces: Vec<Namespace>,
    /// Qualified name → (namespace index, type index).
    index: HashMap<String, (usize, usize)>,
    /// Alias qualified name → the ultimate non-alias type it wraps.
    flattened: HashMap<String, AnyType>,
}

impl ResolvedModel {
    /// Link a model: index every registered type by qualified name, flatten
    /// alias chains, and reject duplicates and alias cycles.
    pub fn link(model: Model) -> Result<Self> {
        let mut index = HashMap::new();
        for (ni, ns) in model.namespaces.iter().enumerate() {
            for (ti, rt) in ns.types.iter().enumerate() {
                let qualified = rt.qualified_name();
                if index.insert(qualified.clone(), (ni, ti)).is_some() {
                    bail!("duplicate registered type `{qualified}`");
                }
            }
        }

        let mut resolved = ResolvedModel {
            namespaces: model.namespaces,
            index,
            flattened: HashMap::new(),
        };

        // Flatten alias chains eagerly so no generator needs unbounded
        // recursion later. A chain longer than MAX_ALIAS_DEPTH is a cycle.
        let alias_names: Vec<String> = resolved
            .index
            .keys()
            .filter(|q| {
                resolved.lookup(q).is_some_and(|rt| rt.kind == TypeKind::Alias)
            })
            .cloned()
            .collect();
        for qualified in alias_names {
            let ultimate = resolved.flatten_alias(&qualified)?;
            resolved.flattened.insert(qualified, ultimate);
        }

        Ok(resolved)
    }

    fn flatten_alias(&self, qualified: &str) -> Result<AnyType> {
        let mut current = qualified.to_string();
        for _ in 0..MAX_ALIAS_DEPTH {
            let rt = match self.lookup(&current) {
                Some(rt) => rt,
                None => bail!("alias `{qualified}` references unknown type `{current}`"),
            };
            let Some(aliased) = &rt.aliased else {
                bail!("alias `{current}` has no aliased type");
            };
            match aliased {
                AnyType::Named { name, .. } => {
                    match self.lookup(name) {
                        Some(next) if next.kind == TypeKind::Alias => {
                            current = name.clone();
                        }
                        // Alias of a non-alias registered type: stop here.
                        _ => return Ok(aliased.clone()),
                    }
                }
                other => return Ok(other.clone()),
            }
        }
        bail!("alias chain starting at `{qualified}` exceeds depth {MAX_ALIAS_DEPTH} (cycle?)");
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn lookup(&self, qualified: &str) -> Option<&RegisteredType> {
        let (ni, ti) = *self.index.get(qualified)?;
        Some(&self.namespaces[ni].types[ti])
    }

    /// Resolve a `Named` reference to its registered type.
    pub fn resolve<'a>(&'a self, ty: &AnyType) -> Option<&'a RegisteredType> {
        match ty {
            AnyType::Named { name, .. } => self.lookup(name),
            _ => None,
        }
    }

    /// The ultimate non-alias type behind an alias, flattened at link time.
    pub fn flattened_alias(&self, qualified: &str) -> Option<&AnyType> {
        self.flattened.get(qualified)
    }

    /// Follow an alias reference down to the primitive it wraps, if it wraps
    /// one.
    pub fn alias_primitive(&self, rt: &RegisteredType) -> Option<Primitive> {
        if rt.kind != TypeKind::Alias {
            return None;
        }
        match self.flattened_alias(&rt.qualified_name())? {
            AnyType::Primitive { ty } => Some(*ty),
            _ => None,
        }
    }
}
