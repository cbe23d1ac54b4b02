use serde_json::Value as Json;
use std::sync::{Arc, OnceLock};

use crate::error::{ApiError, Result};
use crate::model::{
    AggregateRow, ConfigAttribute, DomainPath, Entity, ListLink, ScalarKind,
};

/// Reference to a type: a scalar, a named descriptor resolved through the
/// registry, or a list of either. Named references keep descriptors
/// acyclic in memory while the domain graph may be cyclic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Scalar(ScalarKind),
    Named(String),
    List(Box<TypeRef>),
}

impl TypeRef {
    pub fn string() -> Self {
        TypeRef::Scalar(ScalarKind::String)
    }

    pub fn int() -> Self {
        TypeRef::Scalar(ScalarKind::Int)
    }

    pub fn boolean() -> Self {
        TypeRef::Scalar(ScalarKind::Bool)
    }

    pub fn json() -> Self {
        TypeRef::Scalar(ScalarKind::Json)
    }

    pub fn list(inner: TypeRef) -> Self {
        TypeRef::List(Box::new(inner))
    }

    pub fn named(descriptor: &TypeDescriptor) -> Self {
        TypeRef::Named(descriptor.name().to_string())
    }
}

/// The shapes the registry knows how to build for a domain path. The pair
/// `(path, variant)` seeds exactly one descriptor; its derived name must be
/// unique across the whole registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeVariant {
    Output,
    Input,
    TreeOutput,
    SearchOutput,
    SearchTreeOutput,
    AggregateOutput,
    ConfigOutput,
    ListsOutput,
    ListsInput,
    ListsRefOutput(String),
    ListsRefInput(String),
}

impl TypeVariant {
    /// Derived type name, e.g. `productOutput`, `productlistsrefOutput`,
    /// `productlistsmediaInput`, `searchCatalogTreeOutput`.
    pub fn derive_name(&self, path: &DomainPath) -> String {
        let flat = path.flat_name();
        match self {
            TypeVariant::Output => format!("{}Output", flat),
            TypeVariant::Input => format!("{}Input", flat),
            TypeVariant::TreeOutput => format!("{}TreeOutput", flat),
            TypeVariant::SearchOutput => format!("search{}Output", path.camel_name()),
            TypeVariant::SearchTreeOutput => format!("search{}TreeOutput", path.camel_name()),
            TypeVariant::AggregateOutput => format!("{}AggregateOutput", flat),
            TypeVariant::ConfigOutput => format!("{}ConfigOutput", flat),
            TypeVariant::ListsOutput => format!("{}refOutput", flat),
            TypeVariant::ListsInput => format!("{}refInput", flat),
            TypeVariant::ListsRefOutput(domain) => {
                format!("{}{}Output", flat, domain.replace('/', ""))
            }
            TypeVariant::ListsRefInput(domain) => {
                format!("{}{}Input", flat, domain.replace('/', ""))
            }
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(
            self,
            TypeVariant::Input | TypeVariant::ListsInput | TypeVariant::ListsRefInput(_)
        )
    }
}

/// Value a resolver produced, before rendering. Object-shaped values are
/// walked further through their descriptor's fields; scalars terminate.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Scalar(Json),
    Item(Entity),
    Link(ListLink),
    Config(ConfigAttribute),
    Aggregate(AggregateRow),
    Search { items: Vec<Entity>, total: u64 },
    List(Vec<Value>),
}

impl Value {
    pub fn items(items: Vec<Entity>) -> Self {
        Value::List(items.into_iter().map(Value::Item).collect())
    }
}

/// Arguments passed to an operation or to a single field, as a JSON map
/// with typed accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(serde_json::Map<String, Json>);

impl Args {
    pub fn new(map: serde_json::Map<String, Json>) -> Self {
        Self(map)
    }

    pub fn from_value(value: &Json) -> Result<Self> {
        match value {
            Json::Null => Ok(Self::default()),
            Json::Object(map) => Ok(Self(map.clone())),
            other => Err(ApiError::InvalidInput(format!(
                "arguments must be an object, got {}",
                other
            ))),
        }
    }

    pub fn is_set(&self, name: &str) -> bool {
        matches!(self.0.get(name), Some(v) if !v.is_null())
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn value(&self, name: &str) -> Option<&Json> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    /// Sets an argument if the caller did not supply it.
    pub fn set_default(&mut self, name: &str, value: Json) {
        self.0.entry(name.to_string()).or_insert(value);
    }

    pub fn str(&self, name: &str) -> Result<Option<String>> {
        match self.value(name) {
            None => Ok(None),
            Some(Json::String(s)) => Ok(Some(s.clone())),
            Some(Json::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(ApiError::InvalidInput(format!(
                "argument \"{}\" must be a string, got {}",
                name, other
            ))),
        }
    }

    pub fn str_required(&self, name: &str) -> Result<String> {
        self.str(name)?.ok_or_else(|| {
            ApiError::InvalidInput(format!("Parameter \"{}\" must not be empty", name))
        })
    }

    pub fn str_list(&self, name: &str) -> Result<Vec<String>> {
        match self.value(name) {
            None => Ok(Vec::new()),
            Some(Json::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Json::String(s) => Ok(s.clone()),
                    Json::Number(n) => Ok(n.to_string()),
                    other => Err(ApiError::InvalidInput(format!(
                        "argument \"{}\" must be a list of strings, got {}",
                        name, other
                    ))),
                })
                .collect(),
            Some(Json::String(s)) => Ok(vec![s.clone()]),
            Some(other) => Err(ApiError::InvalidInput(format!(
                "argument \"{}\" must be a list of strings, got {}",
                name, other
            ))),
        }
    }

    pub fn usize(&self, name: &str, default: usize) -> Result<usize> {
        match self.value(name) {
            None => Ok(default),
            Some(Json::Number(n)) => n.as_u64().map(|v| v as usize).ok_or_else(|| {
                ApiError::InvalidInput(format!(
                    "argument \"{}\" must be a non-negative integer",
                    name
                ))
            }),
            Some(other) => Err(ApiError::InvalidInput(format!(
                "argument \"{}\" must be an integer, got {}",
                name, other
            ))),
        }
    }
}

/// Resolves one field against the value its parent resolver produced.
pub type FieldResolver = Arc<dyn Fn(&Value, &Args) -> Result<Value> + Send + Sync>;

/// One field of a type descriptor. Input fields carry no resolver.
#[derive(Clone)]
pub struct FieldDef {
    pub name: String,
    pub description: String,
    pub ty: TypeRef,
    pub args: Vec<ArgDef>,
    pub resolver: Option<FieldResolver>,
}

impl std::fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish()
    }
}

impl FieldDef {
    /// Output field resolved by a closure over the parent value.
    pub fn resolved(
        name: &str,
        description: &str,
        ty: TypeRef,
        resolver: impl Fn(&Value, &Args) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            ty,
            args: Vec::new(),
            resolver: Some(Arc::new(resolver)),
        }
    }

    /// Input field; only its name and type matter.
    pub fn input(name: &str, description: &str, ty: TypeRef) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            ty,
            args: Vec::new(),
            resolver: None,
        }
    }

    pub fn with_args(mut self, args: Vec<ArgDef>) -> Self {
        self.args = args;
        self
    }
}

/// One argument a field or operation accepts.
#[derive(Debug, Clone)]
pub struct ArgDef {
    pub name: String,
    pub ty: TypeRef,
    pub default: Option<Json>,
    pub description: String,
}

impl ArgDef {
    pub fn new(name: &str, ty: TypeRef, description: &str) -> Self {
        Self {
            name: name.to_string(),
            ty,
            default: None,
            description: description.to_string(),
        }
    }

    pub fn with_default(mut self, default: Json) -> Self {
        self.default = Some(default);
        self
    }
}

/// A named, immutable type built by the registry. Created as a placeholder
/// first so fields referencing the type by name can be built while it is
/// still empty; populated exactly once afterwards.
pub struct TypeDescriptor {
    name: String,
    variant: TypeVariant,
    path: DomainPath,
    fields: OnceLock<Vec<FieldDef>>,
}

impl TypeDescriptor {
    pub(crate) fn placeholder(name: String, variant: TypeVariant, path: DomainPath) -> Arc<Self> {
        Arc::new(Self {
            name,
            variant,
            path,
            fields: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variant(&self) -> &TypeVariant {
        &self.variant
    }

    pub fn path(&self) -> &DomainPath {
        &self.path
    }

    pub fn fields(&self) -> &[FieldDef] {
        self.fields.get().map(|f| f.as_slice()).unwrap_or(&[])
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields().iter().find(|f| f.name == name)
    }

    pub(crate) fn populate(&self, fields: Vec<FieldDef>) {
        // A second populate can only happen when two threads raced the
        // same build; both computed identical fields, keep the first.
        let _ = self.fields.set(fields);
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("variant", &self.variant)
            .field("path", &self.path)
            .field("fields", &self.fields().len())
            .finish()
    }
}
