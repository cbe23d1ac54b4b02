pub mod types;

pub use types::*;

use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ApiError, Result};
use crate::model::{unqualify, AttributeDescriptor, DomainPath, Entity, ScalarKind};
use crate::store::ManagerFactory;

/// Whether a search wrapper carries plain items or assembled trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchItemKind {
    Plain,
    Tree,
}

/// Builds and memoizes the type descriptors of every domain, keyed by
/// derived type name.
///
/// Construction is two-phase: the descriptor is registered under its name
/// before its fields are built, so a field referencing the type being
/// built (tree children, mutual lists references) resolves to the
/// placeholder instead of recursing. Two different `(path, variant)` seeds
/// deriving the same name abort with an integrity error.
pub struct Registry {
    factory: Arc<dyn ManagerFactory>,
    lists_domains: Vec<String>,
    cache: Mutex<HashMap<String, Arc<TypeDescriptor>>>,
}

impl Registry {
    pub fn new(factory: Arc<dyn ManagerFactory>, lists_domains: Vec<String>) -> Self {
        Self {
            factory,
            lists_domains,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &Arc<dyn ManagerFactory> {
        &self.factory
    }

    pub fn lists_domains(&self) -> &[String] {
        &self.lists_domains
    }

    /// Full output shape of a domain: attribute fields plus the
    /// sub-collection fields its capabilities enable.
    pub fn output_type(&self, path: &DomainPath) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(path, TypeVariant::Output)
    }

    pub fn input_type(&self, path: &DomainPath) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(path, TypeVariant::Input)
    }

    /// Output shape of a hierarchical domain, with a self-referential
    /// `children` field.
    pub fn tree_output_type(&self, path: &DomainPath) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(path, TypeVariant::TreeOutput)
    }

    pub fn address_output_type(&self, path: &DomainPath) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(&path.join("address")?, TypeVariant::Output)
    }

    pub fn address_input_type(&self, path: &DomainPath) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(&path.join("address")?, TypeVariant::Input)
    }

    pub fn property_output_type(&self, path: &DomainPath) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(&path.join("property")?, TypeVariant::Output)
    }

    pub fn property_input_type(&self, path: &DomainPath) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(&path.join("property")?, TypeVariant::Input)
    }

    /// Fan-out container with one field per configured lists domain.
    pub fn lists_output_type(&self, path: &DomainPath) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(&path.join("lists")?, TypeVariant::ListsOutput)
    }

    pub fn lists_input_type(&self, path: &DomainPath) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(&path.join("lists")?, TypeVariant::ListsInput)
    }

    /// Link record shape for one target domain, with an `item` field
    /// carrying the referenced entity.
    pub fn lists_ref_output_type(
        &self,
        lists_path: &DomainPath,
        domain: &str,
    ) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(lists_path, TypeVariant::ListsRefOutput(domain.to_string()))
    }

    pub fn lists_ref_input_type(
        &self,
        lists_path: &DomainPath,
        domain: &str,
    ) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(lists_path, TypeVariant::ListsRefInput(domain.to_string()))
    }

    /// `{items, total}` wrapper around plain or tree items.
    pub fn search_output_type(
        &self,
        path: &DomainPath,
        kind: SearchItemKind,
    ) -> Result<Arc<TypeDescriptor>> {
        let variant = match kind {
            SearchItemKind::Plain => TypeVariant::SearchOutput,
            SearchItemKind::Tree => TypeVariant::SearchTreeOutput,
        };
        self.descriptor(path, variant)
    }

    /// `{key, value}` row shape of aggregation results.
    pub fn aggregate_output_type(&self, path: &DomainPath) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(path, TypeVariant::AggregateOutput)
    }

    /// Fixed `{code, label, type, required, default}` shape of provider
    /// configuration options.
    pub fn config_output_type(&self, path: &DomainPath) -> Result<Arc<TypeDescriptor>> {
        self.descriptor(path, TypeVariant::ConfigOutput)
    }

    /// Finds an already built descriptor by derived name.
    pub fn lookup(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.cache.lock().get(name).cloned()
    }

    fn descriptor(&self, path: &DomainPath, variant: TypeVariant) -> Result<Arc<TypeDescriptor>> {
        let name = variant.derive_name(path);

        let placeholder = {
            let mut cache = self.cache.lock();
            if let Some(existing) = cache.get(&name) {
                if existing.path() != path || existing.variant() != &variant {
                    return Err(ApiError::Integrity(format!(
                        "derived type name \"{}\" for \"{}\" already seeded by \"{}\"",
                        name,
                        path,
                        existing.path()
                    )));
                }
                return Ok(existing.clone());
            }
            let placeholder =
                TypeDescriptor::placeholder(name.clone(), variant.clone(), path.clone());
            cache.insert(name.clone(), placeholder.clone());
            placeholder
        };

        // Build outside the lock: field construction re-enters the
        // registry for referenced types.
        match self.build_fields(path, &variant) {
            Ok(fields) => {
                placeholder.populate(fields);
                log::debug!("built type {}", name);
                Ok(placeholder)
            }
            Err(err) => {
                self.cache.lock().remove(&name);
                Err(err)
            }
        }
    }

    fn build_fields(&self, path: &DomainPath, variant: &TypeVariant) -> Result<Vec<FieldDef>> {
        match variant {
            TypeVariant::Output => self.entity_fields(path, false),
            TypeVariant::Input => self.entity_fields(path, true),
            TypeVariant::TreeOutput => {
                let mut fields = self.entity_fields(path, false)?;
                let name = TypeVariant::TreeOutput.derive_name(path);
                fields.push(FieldDef::resolved(
                    "children",
                    "Child nodes of this node",
                    TypeRef::list(TypeRef::Named(name)),
                    |parent, _| match parent {
                        Value::Item(entity) => Ok(Value::items(entity.children.clone())),
                        _ => Ok(Value::Null),
                    },
                ));
                Ok(fields)
            }
            TypeVariant::SearchOutput => self.search_fields(path, SearchItemKind::Plain),
            TypeVariant::SearchTreeOutput => self.search_fields(path, SearchItemKind::Tree),
            TypeVariant::AggregateOutput => Ok(aggregate_fields()),
            TypeVariant::ConfigOutput => Ok(config_fields()),
            TypeVariant::ListsOutput => self.lists_container_fields(path, false),
            TypeVariant::ListsInput => self.lists_container_fields(path, true),
            TypeVariant::ListsRefOutput(domain) => self.lists_ref_fields(path, domain, false),
            TypeVariant::ListsRefInput(domain) => self.lists_ref_fields(path, domain, true),
        }
    }

    /// Attribute fields plus capability fields, for output or input.
    fn entity_fields(&self, path: &DomainPath, input: bool) -> Result<Vec<FieldDef>> {
        let manager = self.factory.manager(path)?;
        let caps = manager.capabilities();
        let mut fields = attribute_fields(path, &manager.search_attributes(), input);

        if caps.address {
            let ty = if input {
                self.address_input_type(path)?
            } else {
                self.address_output_type(path)?
            };
            let ty = TypeRef::list(TypeRef::named(&ty));
            if input {
                fields.push(FieldDef::input("address", "Address entries", ty));
            } else {
                fields.push(FieldDef::resolved(
                    "address",
                    "Associated address items",
                    ty,
                    |parent, _| match parent {
                        Value::Item(entity) => Ok(Value::items(entity.addresses.clone())),
                        _ => Ok(Value::Null),
                    },
                ));
            }
        }

        if caps.property {
            let ty = if input {
                self.property_input_type(path)?
            } else {
                self.property_output_type(path)?
            };
            let ty = TypeRef::list(TypeRef::named(&ty));
            if input {
                fields.push(FieldDef::input("property", "Property entries", ty));
            } else {
                fields.push(
                    FieldDef::resolved(
                        "property",
                        "Associated property items",
                        ty,
                        |parent, args| {
                            let types = args.str_list("type")?;
                            match parent {
                                Value::Item(entity) => Ok(Value::List(
                                    entity
                                        .property_items(&types)
                                        .into_iter()
                                        .cloned()
                                        .map(Value::Item)
                                        .collect(),
                                )),
                                _ => Ok(Value::Null),
                            }
                        },
                    )
                    .with_args(vec![ArgDef::new(
                        "type",
                        TypeRef::list(TypeRef::string()),
                        "Property types to narrow the result to",
                    )]),
                );
            }
        }

        if caps.lists {
            if input {
                let ty = self.lists_input_type(path)?;
                fields.push(FieldDef::input(
                    "lists",
                    "Link entries per target domain",
                    TypeRef::named(&ty),
                ));
            } else {
                let ty = self.lists_output_type(path)?;
                fields.push(FieldDef::resolved(
                    "lists",
                    "Links to items of other domains",
                    TypeRef::named(&ty),
                    |parent, _| Ok(parent.clone()),
                ));
            }
        }

        Ok(fields)
    }

    /// One field per configured lists domain, on the fan-out container.
    fn lists_container_fields(&self, lists_path: &DomainPath, input: bool) -> Result<Vec<FieldDef>> {
        let mut fields = Vec::new();

        for domain in &self.lists_domains {
            let field_name = domain.replace('/', "");
            if input {
                let ty = self.lists_ref_input_type(lists_path, domain)?;
                fields.push(FieldDef::input(
                    &field_name,
                    &format!("Link entries to {} items", domain),
                    TypeRef::list(TypeRef::named(&ty)),
                ));
            } else {
                let ty = self.lists_ref_output_type(lists_path, domain)?;
                let target = domain.clone();
                fields.push(
                    FieldDef::resolved(
                        &field_name,
                        &format!("Links to {} items", domain),
                        TypeRef::list(TypeRef::named(&ty)),
                        move |parent, args| {
                            let listtypes = args.str_list("listtype")?;
                            let types = args.str_list("type")?;
                            match parent {
                                Value::Item(entity) => Ok(Value::List(
                                    entity
                                        .link_items(&target, &listtypes, &types)
                                        .into_iter()
                                        .cloned()
                                        .map(Value::Link)
                                        .collect(),
                                )),
                                _ => Ok(Value::Null),
                            }
                        },
                    )
                    .with_args(vec![
                        ArgDef::new(
                            "listtype",
                            TypeRef::list(TypeRef::string()),
                            "Link types to narrow the result to",
                        ),
                        ArgDef::new(
                            "type",
                            TypeRef::list(TypeRef::string()),
                            "Referenced item types to narrow the result to",
                        ),
                    ]),
                );
            }
        }

        Ok(fields)
    }

    /// Link record fields plus the `item` field for one target domain.
    fn lists_ref_fields(
        &self,
        lists_path: &DomainPath,
        domain: &str,
        input: bool,
    ) -> Result<Vec<FieldDef>> {
        let manager = self.factory.manager(lists_path)?;
        let mut fields = attribute_fields(lists_path, &manager.search_attributes(), input);

        let target = DomainPath::parse(domain)?;
        if input {
            let ty = self.input_type(&target)?;
            fields.push(FieldDef::input(
                "item",
                "Referenced item to create or update",
                TypeRef::named(&ty),
            ));
        } else {
            let ty = self.output_type(&target)?;
            fields.push(FieldDef::resolved(
                "item",
                "Referenced item",
                TypeRef::named(&ty),
                |parent, _| match parent {
                    Value::Link(link) => Ok(link
                        .target
                        .as_ref()
                        .map(|t| Value::Item(t.clone()))
                        .unwrap_or(Value::Null)),
                    _ => Ok(Value::Null),
                },
            ));
        }

        Ok(fields)
    }

    fn search_fields(&self, path: &DomainPath, kind: SearchItemKind) -> Result<Vec<FieldDef>> {
        let item_ty = match kind {
            SearchItemKind::Plain => self.output_type(path)?,
            SearchItemKind::Tree => self.tree_output_type(path)?,
        };
        Ok(vec![
            FieldDef::resolved(
                "items",
                "Found items",
                TypeRef::list(TypeRef::named(&item_ty)),
                |parent, _| match parent {
                    Value::Search { items, .. } => Ok(Value::items(items.clone())),
                    _ => Ok(Value::Null),
                },
            ),
            FieldDef::resolved("total", "Total number of matches", TypeRef::int(), |parent, _| {
                match parent {
                    Value::Search { total, .. } => Ok(Value::Scalar(json!(total))),
                    _ => Ok(Value::Null),
                }
            }),
        ])
    }
}

/// Maps manager attributes to fields: internal codes are skipped, names
/// are unqualified, the id field is always a string.
fn attribute_fields(path: &DomainPath, attrs: &[AttributeDescriptor], input: bool) -> Vec<FieldDef> {
    let mut fields = Vec::new();
    for attr in attrs {
        if attr.is_internal() {
            continue;
        }
        let name = unqualify(&attr.code).to_string();
        let kind = if name == "id" {
            ScalarKind::String
        } else {
            attr.kind
        };
        if input {
            fields.push(FieldDef::input(&name, &attr.label, TypeRef::Scalar(kind)));
        } else {
            fields.push(scalar_field(name, kind, &attr.label));
        }
    }
    fields
}

fn scalar_field(name: String, kind: ScalarKind, label: &str) -> FieldDef {
    let field_name = name.clone();
    FieldDef::resolved(&name, label, TypeRef::Scalar(kind), move |parent, _| {
        let found = match parent {
            Value::Item(entity) => entity.get(&field_name).cloned(),
            Value::Link(link) => link.record.get(&field_name).cloned(),
            _ => None,
        };
        Ok(match found {
            Some(value) => Value::Scalar(coerce_scalar(value, kind)),
            None => Value::Null,
        })
    })
}

/// Renders a stored value under the field's scalar kind. String fields
/// stringify numbers and JSON-encode structures; json fields pass raw.
pub(crate) fn coerce_scalar(value: Json, kind: ScalarKind) -> Json {
    match kind {
        ScalarKind::Json => value,
        ScalarKind::String => match value {
            Json::String(_) | Json::Null => value,
            Json::Number(n) => Json::String(n.to_string()),
            Json::Bool(b) => Json::String(b.to_string()),
            other => {
                log::warn!("rendering structured value as opaque JSON string");
                Json::String(serde_json::to_string(&other).unwrap_or_default())
            }
        },
        _ => value,
    }
}

fn aggregate_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::resolved("key", "Group key", TypeRef::string(), |parent, _| {
            match parent {
                Value::Aggregate(row) => Ok(Value::Scalar(json!(row.key))),
                _ => Ok(Value::Null),
            }
        }),
        FieldDef::resolved("value", "Aggregated value", TypeRef::json(), |parent, _| {
            match parent {
                Value::Aggregate(row) => Ok(Value::Scalar(row.value.clone())),
                _ => Ok(Value::Null),
            }
        }),
    ]
}

fn config_fields() -> Vec<FieldDef> {
    fn resolve(
        name: &str,
        description: &str,
        ty: TypeRef,
        pick: impl Fn(&crate::model::ConfigAttribute) -> Value + Send + Sync + 'static,
    ) -> FieldDef {
        FieldDef::resolved(name, description, ty, move |parent, _| match parent {
            Value::Config(attr) => Ok(pick(attr)),
            _ => Ok(Value::Null),
        })
    }

    vec![
        resolve("code", "Option key", TypeRef::string(), |attr| {
            Value::Scalar(json!(attr.code))
        }),
        resolve("label", "Human readable name", TypeRef::string(), |attr| {
            Value::Scalar(json!(attr.label))
        }),
        resolve("type", "Value type of the option", TypeRef::string(), |attr| {
            Value::Scalar(json!(attr.kind))
        }),
        resolve("required", "Whether the option must be set", TypeRef::boolean(), |attr| {
            Value::Scalar(json!(attr.required))
        }),
        resolve("default", "Default value", TypeRef::string(), |attr| {
            match &attr.default {
                Some(value) => Value::Scalar(coerce_scalar(value.clone(), ScalarKind::String)),
                None => Value::Null,
            }
        }),
    ]
}
