use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value as Json};

use crate::api::operations::{DomainResolver, OpKind, Operation, RequestContext};
use crate::api::provider::ProviderResolver;
use crate::api::standard::StandardResolver;
use crate::api::tree::TreeResolver;
use crate::config::{ApiConfig, DomainFeature};
use crate::error::{error_body, ApiError, Result};
use crate::registry::{coerce_scalar, Args, Registry, TypeRef, Value};
use crate::store::ManagerFactory;

/// Field selection applied while a result is rendered. Scalar fields are
/// leaves; an object-typed field must carry a nested selection of its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    fields: BTreeMap<String, SelectionField>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionField {
    pub args: Map<String, Json>,
    pub selection: Option<Selection>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaf selection over the given scalar fields.
    pub fn of(names: &[&str]) -> Self {
        names.iter().fold(Self::new(), |sel, name| sel.field(name))
    }

    pub fn field(mut self, name: &str) -> Self {
        self.fields
            .insert(name.to_string(), SelectionField::default());
        self
    }

    pub fn field_args(mut self, name: &str, args: Json) -> Self {
        self.fields.insert(
            name.to_string(),
            SelectionField {
                args: args.as_object().cloned().unwrap_or_default(),
                selection: None,
            },
        );
        self
    }

    pub fn nested(mut self, name: &str, selection: Selection) -> Self {
        self.fields.insert(
            name.to_string(),
            SelectionField {
                args: Map::new(),
                selection: Some(selection),
            },
        );
        self
    }

    pub fn nested_args(mut self, name: &str, args: Json, selection: Selection) -> Self {
        self.fields.insert(
            name.to_string(),
            SelectionField {
                args: args.as_object().cloned().unwrap_or_default(),
                selection: Some(selection),
            },
        );
        self
    }

    /// Parses the JSON shorthand `{"id": true, "lists": {"id": true}}`.
    /// Field arguments have no JSON form and need the builder methods.
    pub fn from_value(value: &Json) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            ApiError::InvalidInput("selection must be an object".to_string())
        })?;

        let mut selection = Selection::new();
        for (name, entry) in map {
            match entry {
                Json::Bool(true) => selection = selection.field(name),
                Json::Object(_) => {
                    selection = selection.nested(name, Selection::from_value(entry)?)
                }
                other => {
                    return Err(ApiError::InvalidInput(format!(
                        "selection entry \"{}\" must be true or an object, got {}",
                        name, other
                    )))
                }
            }
        }
        Ok(selection)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &SelectionField)> {
        self.fields.iter()
    }
}

/// Assembles the operation tables for the configured domains. Every
/// domain gets the standard operations; the `tree` and `provider`
/// features layer their sets on top.
pub struct SchemaBuilder {
    config: Arc<ApiConfig>,
    factory: Arc<dyn ManagerFactory>,
}

impl SchemaBuilder {
    pub fn new(config: ApiConfig, factory: Arc<dyn ManagerFactory>) -> Self {
        Self {
            config: Arc::new(config),
            factory,
        }
    }

    pub fn build(self) -> Result<ApiSchema> {
        let registry = Arc::new(Registry::new(
            Arc::clone(&self.factory),
            self.config.lists_domains.clone(),
        ));

        let standard = StandardResolver::new(Arc::clone(&self.config), Arc::clone(&registry));
        let tree = TreeResolver::new(Arc::clone(&self.config), Arc::clone(&registry));
        let provider = ProviderResolver::new(Arc::clone(&self.config), Arc::clone(&registry));

        let mut queries = BTreeMap::new();
        let mut mutations = BTreeMap::new();
        for domain in &self.config.domains {
            let mut resolvers: Vec<&dyn DomainResolver> = vec![&standard];
            if domain.has_feature(DomainFeature::Tree) {
                resolvers.push(&tree);
            }
            if domain.has_feature(DomainFeature::Provider) {
                resolvers.push(&provider);
            }

            for resolver in resolvers {
                for op in resolver.queries(domain)? {
                    insert_op(&mut queries, op)?;
                }
                for op in resolver.mutations(domain)? {
                    insert_op(&mut mutations, op)?;
                }
            }
        }
        log::info!(
            "schema built: {} domains, {} queries, {} mutations",
            self.config.domains.len(),
            queries.len(),
            mutations.len()
        );

        Ok(ApiSchema {
            config: self.config,
            registry,
            queries,
            mutations,
        })
    }
}

fn insert_op(table: &mut BTreeMap<String, Operation>, op: Operation) -> Result<()> {
    match table.entry(op.name.clone()) {
        Entry::Vacant(slot) => {
            slot.insert(op);
            Ok(())
        }
        Entry::Occupied(slot) => Err(ApiError::Integrity(format!(
            "duplicate operation name \"{}\"",
            slot.key()
        ))),
    }
}

/// The executable API: named queries and mutations over the type
/// registry. Results are rendered through a field selection into plain
/// JSON.
pub struct ApiSchema {
    config: Arc<ApiConfig>,
    registry: Arc<Registry>,
    queries: BTreeMap<String, Operation>,
    mutations: BTreeMap<String, Operation>,
}

impl ApiSchema {
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn queries(&self) -> impl Iterator<Item = &Operation> {
        self.queries.values()
    }

    pub fn mutations(&self) -> impl Iterator<Item = &Operation> {
        self.mutations.values()
    }

    /// Runs one operation and renders its result through the selection.
    pub fn execute(
        &self,
        ctx: &RequestContext,
        kind: OpKind,
        name: &str,
        args: &Json,
        selection: &Selection,
    ) -> Result<Json> {
        let table = match kind {
            OpKind::Query => &self.queries,
            OpKind::Mutation => &self.mutations,
        };
        let op = table.get(name).ok_or_else(|| {
            ApiError::InvalidInput(format!("unknown {} \"{}\"", kind, name))
        })?;

        let mut args = Args::from_value(args)?;
        for key in args.keys() {
            if !op.args.iter().any(|def| def.name == *key) {
                return Err(ApiError::InvalidInput(format!(
                    "unknown argument \"{}\" for {} \"{}\"",
                    key, kind, name
                )));
            }
        }
        for def in &op.args {
            if let Some(default) = &def.default {
                args.set_default(&def.name, default.clone());
            }
        }

        let value = (op.resolver)(ctx, &args)?;
        self.render(&value, &op.returns, Some(selection))
    }

    /// Like [`execute`](Self::execute), wrapped into a response envelope
    /// instead of an error: `{"data": {...}}` on success, `{"data": null,
    /// "errors": [...]}` on failure.
    pub fn dispatch(
        &self,
        ctx: &RequestContext,
        kind: OpKind,
        name: &str,
        args: &Json,
        selection: &Selection,
    ) -> Json {
        match self.execute(ctx, kind, name, args, selection) {
            Ok(value) => {
                let mut data = Map::new();
                data.insert(name.to_string(), value);
                json!({ "data": data })
            }
            Err(err) => {
                if err.is_client_safe() {
                    log::debug!("{} {} rejected: {}", kind, name, err);
                } else {
                    log::error!("{} {} failed: {}", kind, name, err);
                }
                json!({ "data": Json::Null, "errors": [error_body(&err, self.config.debug)] })
            }
        }
    }

    fn render(&self, value: &Value, ty: &TypeRef, selection: Option<&Selection>) -> Result<Json> {
        if matches!(value, Value::Null) {
            return Ok(Json::Null);
        }

        match ty {
            TypeRef::Scalar(kind) => match value {
                Value::Scalar(raw) => Ok(coerce_scalar(raw.clone(), *kind)),
                other => Err(ApiError::Integrity(format!(
                    "scalar type rendered from non-scalar value {:?}",
                    other
                ))),
            },
            TypeRef::List(inner) => match value {
                Value::List(items) => items
                    .iter()
                    .map(|item| self.render(item, inner, selection))
                    .collect::<Result<Vec<_>>>()
                    .map(Json::Array),
                other => Err(ApiError::Integrity(format!(
                    "list type rendered from non-list value {:?}",
                    other
                ))),
            },
            TypeRef::Named(name) => {
                let descriptor = self.registry.lookup(name).ok_or_else(|| {
                    ApiError::Integrity(format!("unknown type \"{}\" in schema", name))
                })?;
                let selection = selection.filter(|s| !s.is_empty()).ok_or_else(|| {
                    ApiError::InvalidInput(format!(
                        "type \"{}\" requires a field selection",
                        name
                    ))
                })?;

                let mut out = Map::new();
                for (field_name, picked) in selection.iter() {
                    let field = descriptor.field(field_name).ok_or_else(|| {
                        ApiError::InvalidInput(format!(
                            "unknown field \"{}\" on type \"{}\"",
                            field_name, name
                        ))
                    })?;
                    for key in picked.args.keys() {
                        if !field.args.iter().any(|def| def.name == *key) {
                            return Err(ApiError::InvalidInput(format!(
                                "unknown argument \"{}\" on field \"{}\"",
                                key, field_name
                            )));
                        }
                    }
                    let mut args = Args::new(picked.args.clone());
                    for def in &field.args {
                        if let Some(default) = &def.default {
                            args.set_default(&def.name, default.clone());
                        }
                    }

                    let resolver = field.resolver.as_ref().ok_or_else(|| {
                        ApiError::Integrity(format!(
                            "input type \"{}\" rendered as output",
                            name
                        ))
                    })?;
                    let child = resolver(value, &args)?;
                    out.insert(
                        field_name.clone(),
                        self.render(&child, &field.ty, picked.selection.as_ref())?,
                    );
                }
                Ok(Json::Object(out))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DomainSpec, ResourceGroups};
    use crate::model::{
        AggregateQuery, AggregateRow, AttributeDescriptor, CapabilitySet, DomainPath, Entity,
        ScalarKind, SearchQuery, UserContext,
    };
    use crate::store::{Manager, SearchPage};
    use pretty_assertions::assert_eq;

    struct DemoManager {
        path: DomainPath,
    }

    impl Manager for DemoManager {
        fn path(&self) -> &DomainPath {
            &self.path
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::default()
        }

        fn search_attributes(&self) -> Vec<AttributeDescriptor> {
            vec![
                AttributeDescriptor::new(&self.path.qualify("id"), ScalarKind::String, "Id"),
                AttributeDescriptor::new(&self.path.qualify("label"), ScalarKind::String, "Label"),
                AttributeDescriptor::new(&self.path.qualify("status"), ScalarKind::Int, "Status"),
            ]
        }

        fn create(&self) -> anyhow::Result<Entity> {
            Ok(Entity::new(self.path.clone()))
        }

        fn get(&self, id: &str, _include: &[String]) -> anyhow::Result<Option<Entity>> {
            if id != "p1" {
                return Ok(None);
            }
            let mut entity = Entity::new(self.path.clone());
            entity.set_id("p1");
            entity.set("product.label", json!("Shirt"));
            entity.set("product.status", json!(1));
            Ok(Some(entity))
        }

        fn find(
            &self,
            _code: &str,
            _include: &[String],
            _filters: &BTreeMap<String, Json>,
        ) -> anyhow::Result<Option<Entity>> {
            Ok(None)
        }

        fn search(&self, _query: &SearchQuery, include: &[String]) -> anyhow::Result<SearchPage> {
            Ok(SearchPage {
                items: self.get("p1", include)?.into_iter().collect(),
                total: 1,
            })
        }

        fn aggregate(&self, _query: &AggregateQuery) -> anyhow::Result<Vec<AggregateRow>> {
            Ok(Vec::new())
        }

        fn save(&self, entity: Entity) -> anyhow::Result<Entity> {
            Ok(entity)
        }

        fn save_many(&self, entities: Vec<Entity>) -> anyhow::Result<Vec<Entity>> {
            Ok(entities)
        }

        fn delete(&self, _id: &str) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn delete_many(&self, _ids: &[String]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct DemoFactory;

    impl ManagerFactory for DemoFactory {
        fn manager(&self, path: &DomainPath) -> anyhow::Result<Arc<dyn Manager>> {
            Ok(Arc::new(DemoManager { path: path.clone() }))
        }
    }

    fn demo_config() -> ApiConfig {
        let mut config = ApiConfig::default();
        config
            .domains
            .push(DomainSpec::new(DomainPath::parse("product").unwrap()));
        config
            .resource
            .insert("product".to_string(), ResourceGroups::all(&["admin"]));
        config
    }

    fn schema() -> ApiSchema {
        SchemaBuilder::new(demo_config(), Arc::new(DemoFactory))
            .build()
            .unwrap()
    }

    fn admin() -> RequestContext {
        RequestContext::new(UserContext::new("u1", "Admin", ["admin".to_string()]))
    }

    #[test]
    fn test_execute_renders_selected_fields_only() {
        let schema = schema();
        let result = schema
            .execute(
                &admin(),
                OpKind::Query,
                "getProduct",
                &json!({ "id": "p1" }),
                &Selection::of(&["id", "label"]),
            )
            .unwrap();

        assert_eq!(result, json!({ "id": "p1", "label": "Shirt" }));
    }

    #[test]
    fn test_nested_selection_renders_search_results() {
        let schema = schema();
        let selection = Selection::new()
            .nested("items", Selection::of(&["id"]))
            .field("total");

        let result = schema
            .execute(
                &admin(),
                OpKind::Query,
                "searchProducts",
                &json!({}),
                &selection,
            )
            .unwrap();

        assert_eq!(result, json!({ "items": [{ "id": "p1" }], "total": 1 }));
    }

    #[test]
    fn test_object_selection_without_fields_is_rejected() {
        let schema = schema();
        let result = schema.execute(
            &admin(),
            OpKind::Query,
            "getProduct",
            &json!({ "id": "p1" }),
            &Selection::new(),
        );
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_unknown_operation_field_and_argument() {
        let schema = schema();
        let ctx = admin();

        let unknown_op = schema.execute(
            &ctx,
            OpKind::Query,
            "getGadget",
            &json!({}),
            &Selection::of(&["id"]),
        );
        assert!(matches!(unknown_op, Err(ApiError::InvalidInput(_))));

        let unknown_arg = schema.execute(
            &ctx,
            OpKind::Query,
            "getProduct",
            &json!({ "id": "p1", "bogus": 1 }),
            &Selection::of(&["id"]),
        );
        assert!(matches!(unknown_arg, Err(ApiError::InvalidInput(_))));

        let unknown_field = schema.execute(
            &ctx,
            OpKind::Query,
            "getProduct",
            &json!({ "id": "p1" }),
            &Selection::of(&["nope"]),
        );
        assert!(matches!(unknown_field, Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn test_duplicate_domains_fail_the_build() {
        let mut config = demo_config();
        config
            .domains
            .push(DomainSpec::new(DomainPath::parse("product").unwrap()));

        let result = SchemaBuilder::new(config, Arc::new(DemoFactory)).build();
        assert!(matches!(result, Err(ApiError::Integrity(_))));
    }

    #[test]
    fn test_dispatch_wraps_results_and_errors() {
        let schema = schema();

        let ok = schema.dispatch(
            &admin(),
            OpKind::Query,
            "getProduct",
            &json!({ "id": "p1" }),
            &Selection::of(&["id"]),
        );
        assert_eq!(ok, json!({ "data": { "getProduct": { "id": "p1" } } }));

        let viewer = RequestContext::new(UserContext::new("u2", "Viewer", ["viewer".to_string()]));
        let denied = schema.dispatch(
            &viewer,
            OpKind::Query,
            "getProduct",
            &json!({ "id": "p1" }),
            &Selection::of(&["id"]),
        );
        assert_eq!(
            denied,
            json!({ "data": null, "errors": [{ "message": "forbidden" }] })
        );
    }

    #[test]
    fn test_selection_json_shorthand() {
        let parsed = Selection::from_value(&json!({
            "id": true,
            "items": { "label": true }
        }))
        .unwrap();
        let built = Selection::new()
            .field("id")
            .nested("items", Selection::new().field("label"));
        assert_eq!(parsed, built);

        assert!(Selection::from_value(&json!({ "id": 1 })).is_err());
    }
}
