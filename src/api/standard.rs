use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{json, Value as Json};

use crate::api::operations::{check_access, DomainResolver, Operation, RequestContext};
use crate::config::{Action, ApiConfig, DomainFeature, DomainSpec};
use crate::error::{ApiError, Result};
use crate::logic::Reconciler;
use crate::model::{
    parse_filter_expr, AggregateQuery, Aggregation, DomainPath, Entity, FilterExpr, Payload,
    SearchQuery,
};
use crate::registry::{ArgDef, Args, Registry, SearchItemKind, TypeRef, Value};
use crate::store::Manager;

/// Builds the operation set every domain gets: get, find, search and
/// aggregate queries plus save and delete mutations, single and batch.
pub struct StandardResolver {
    config: Arc<ApiConfig>,
    registry: Arc<Registry>,
}

impl StandardResolver {
    pub fn new(config: Arc<ApiConfig>, registry: Arc<Registry>) -> Self {
        Self { config, registry }
    }

    fn capture(&self, domain: &DomainSpec) -> (Arc<ApiConfig>, Arc<Registry>, DomainPath) {
        (
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            domain.path.clone(),
        )
    }

    fn get_op(&self, domain: &DomainSpec, returns: TypeRef) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("get{}", domain.path.camel_name()),
            &format!("Returns the {} item for the given id", path.dotted()),
            vec![
                ArgDef::new("id", TypeRef::string(), "Unique item id"),
                include_arg(),
            ],
            returns,
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Get)?;
                let manager = registry.factory().manager(&path)?;
                let id = args.str_required("id")?;
                let include = args.str_list("include")?;
                let entity = manager.get(&id, &include)?.ok_or_else(|| {
                    ApiError::NotFound(format!("{} with ID {}", path, id))
                })?;
                Ok(Value::Item(entity))
            },
        )
    }

    fn find_op(&self, domain: &DomainSpec, returns: TypeRef) -> Operation {
        let (config, registry, path) = self.capture(domain);
        let typed = domain.has_feature(DomainFeature::TypedFind);

        let mut args = vec![
            ArgDef::new("code", TypeRef::string(), "Unique item code"),
            include_arg(),
        ];
        if typed {
            args.push(ArgDef::new(
                "domain",
                TypeRef::string(),
                "Domain the type item belongs to",
            ));
            args.push(ArgDef::new(
                "type",
                TypeRef::string(),
                "Type the item must carry",
            ));
        }

        Operation::new(
            format!("find{}", domain.path.camel_name()),
            &format!("Finds the {} item for the given code", path.dotted()),
            args,
            returns,
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Get)?;
                let manager = registry.factory().manager(&path)?;
                let code = args.str_required("code")?;
                let include = args.str_list("include")?;

                let mut filters = BTreeMap::new();
                if typed {
                    if let Some(domain) = args.str("domain")? {
                        filters.insert("domain".to_string(), Json::String(domain));
                    }
                    if let Some(kind) = args.str("type")? {
                        filters.insert("type".to_string(), Json::String(kind));
                    }
                }

                let entity = manager.find(&code, &include, &filters)?.ok_or_else(|| {
                    ApiError::NotFound(format!("{} with code \"{}\"", path, code))
                })?;
                Ok(Value::Item(entity))
            },
        )
    }

    fn search_op(&self, domain: &DomainSpec, returns: TypeRef) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("search{}s", domain.path.camel_name()),
            &format!("Searches for {} items", path.dotted()),
            search_args(),
            returns,
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Get)?;
                let manager = registry.factory().manager(&path)?;
                let query = search_query(args)?;
                let include = args.str_list("include")?;
                let page = manager.search(&query, &include)?;
                Ok(Value::Search {
                    items: page.items,
                    total: page.total,
                })
            },
        )
    }

    fn aggregate_op(&self, domain: &DomainSpec, returns: TypeRef) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("aggregate{}s", domain.path.camel_name()),
            &format!("Aggregates {} items grouped by the given keys", path.dotted()),
            vec![
                ArgDef::new("key", TypeRef::list(TypeRef::string()), "Group-by keys"),
                ArgDef::new("value", TypeRef::string(), "Field the values are folded from"),
                ArgDef::new("type", TypeRef::string(), "Fold: \"sum\", \"avg\" or empty for counts"),
                ArgDef::new("filter", TypeRef::json(), "Filter expression, object or JSON string"),
                ArgDef::new("limit", TypeRef::int(), "Maximum number of groups")
                    .with_default(json!(10000)),
            ],
            returns,
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Get)?;
                let manager = registry.factory().manager(&path)?;

                let keys = args.str_list("key")?;
                if keys.is_empty() {
                    return Err(ApiError::InvalidInput(
                        "Parameter \"key\" must not be empty".to_string(),
                    ));
                }
                let query = AggregateQuery {
                    keys,
                    value: args.str("value")?,
                    aggregation: Aggregation::from_code(args.str("type")?.as_deref())?,
                    filter: parse_filter_arg(args)?,
                    limit: args.usize("limit", 10000)?,
                };

                let rows = manager.aggregate(&query)?;
                Ok(Value::List(rows.into_iter().map(Value::Aggregate).collect()))
            },
        )
    }

    fn save_op(&self, domain: &DomainSpec, input: TypeRef, returns: TypeRef) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("save{}", domain.path.camel_name()),
            &format!("Saves a new or updates an existing {} item", path.dotted()),
            vec![ArgDef::new("input", input, "Item fields to store")],
            returns,
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Save)?;
                let manager = registry.factory().manager(&path)?;
                let payload = Payload::parse(&path, input_object(args)?)?;

                let reconciler = Reconciler::new(
                    Arc::clone(registry.factory()),
                    registry.lists_domains().to_vec(),
                );
                let mut entity = match payload.id() {
                    Some(id) => {
                        let refs = reconciler.load_refs(manager.as_ref(), &payload);
                        manager.get(&id, &refs)?.ok_or_else(|| {
                            ApiError::NotFound(format!("{} with ID {}", path, id))
                        })?
                    }
                    None => manager.create()?,
                };
                reconciler.apply(manager.as_ref(), &mut entity, &payload)?;

                Ok(Value::Item(manager.save(entity)?))
            },
        )
    }

    fn save_many_op(&self, domain: &DomainSpec, input: TypeRef, returns: TypeRef) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("save{}s", domain.path.camel_name()),
            &format!("Saves new or updates existing {} items", path.dotted()),
            vec![ArgDef::new("input", TypeRef::list(input), "Item entries to store")],
            returns,
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Save)?;
                let manager = registry.factory().manager(&path)?;

                let entries = input_list(args)?;
                let payloads: Vec<Payload> = entries
                    .iter()
                    .map(|entry| Payload::parse(&path, entry))
                    .collect::<Result<_>>()?;

                let reconciler = Reconciler::new(
                    Arc::clone(registry.factory()),
                    registry.lists_domains().to_vec(),
                );

                // One prefetch for the whole batch instead of a get per
                // entry. Entries whose id matches nothing stored fall
                // back to a fresh record.
                let ids: Vec<String> = payloads.iter().filter_map(|p| p.id()).collect();
                let refs: Vec<String> = payloads
                    .iter()
                    .flat_map(|p| reconciler.load_refs(manager.as_ref(), p))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let mut stored: HashMap<String, Entity> = HashMap::new();
                if !ids.is_empty() {
                    let page = manager.search(&SearchQuery::by_ids(ids), &refs)?;
                    for entity in page.items {
                        if let Some(id) = entity.id() {
                            stored.insert(id, entity);
                        }
                    }
                }

                let mut items = Vec::new();
                for payload in &payloads {
                    let mut entity = match payload.id().and_then(|id| stored.remove(&id)) {
                        Some(entity) => entity,
                        None => manager.create()?,
                    };
                    reconciler.apply(manager.as_ref(), &mut entity, payload)?;
                    items.push(entity);
                }

                Ok(Value::items(manager.save_many(items)?))
            },
        )
    }

    fn delete_op(&self, domain: &DomainSpec) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("delete{}", domain.path.camel_name()),
            &format!("Deletes the {} item for the given id", path.dotted()),
            vec![ArgDef::new("id", TypeRef::string(), "Unique item id")],
            TypeRef::string(),
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Delete)?;
                let manager = registry.factory().manager(&path)?;
                let id = args.str_required("id")?;
                if !manager.delete(&id)? {
                    log::debug!("delete {}: no item under id {}", path, id);
                }
                Ok(Value::Scalar(Json::String(id)))
            },
        )
    }

    fn delete_many_op(&self, domain: &DomainSpec) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("delete{}s", domain.path.camel_name()),
            &format!("Deletes the {} items for the given ids", path.dotted()),
            vec![ArgDef::new("id", TypeRef::list(TypeRef::string()), "Unique item ids")],
            TypeRef::list(TypeRef::string()),
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Delete)?;
                let manager = registry.factory().manager(&path)?;
                let ids = args.str_list("id")?;
                manager.delete_many(&ids)?;
                Ok(Value::List(
                    ids.into_iter()
                        .map(|id| Value::Scalar(Json::String(id)))
                        .collect(),
                ))
            },
        )
    }
}

impl DomainResolver for StandardResolver {
    fn queries(&self, domain: &DomainSpec) -> Result<Vec<Operation>> {
        let output = TypeRef::named(&self.registry.output_type(&domain.path)?);
        let search = TypeRef::named(
            &self
                .registry
                .search_output_type(&domain.path, SearchItemKind::Plain)?,
        );
        let aggregate = TypeRef::list(TypeRef::named(
            &self.registry.aggregate_output_type(&domain.path)?,
        ));

        Ok(vec![
            self.get_op(domain, output.clone()),
            self.find_op(domain, output),
            self.search_op(domain, search),
            self.aggregate_op(domain, aggregate),
        ])
    }

    fn mutations(&self, domain: &DomainSpec) -> Result<Vec<Operation>> {
        let output = TypeRef::named(&self.registry.output_type(&domain.path)?);
        let input = TypeRef::named(&self.registry.input_type(&domain.path)?);

        Ok(vec![
            self.save_op(domain, input.clone(), output.clone()),
            self.save_many_op(domain, input, TypeRef::list(output)),
            self.delete_op(domain),
            self.delete_many_op(domain),
        ])
    }
}

pub(crate) fn include_arg() -> ArgDef {
    ArgDef::new(
        "include",
        TypeRef::list(TypeRef::string()),
        "Sub-collections and linked domains to attach",
    )
    .with_default(json!([]))
}

pub(crate) fn search_args() -> Vec<ArgDef> {
    vec![
        ArgDef::new("filter", TypeRef::json(), "Filter expression, object or JSON string"),
        include_arg(),
        ArgDef::new("sort", TypeRef::list(TypeRef::string()), "Sort keys, \"-\" prefix for descending"),
        ArgDef::new("offset", TypeRef::int(), "Slice start").with_default(json!(0)),
        ArgDef::new("limit", TypeRef::int(), "Slice length").with_default(json!(100)),
    ]
}

/// The filter argument arrives either as a JSON object or, from clients
/// that only speak string arguments, as a JSON-encoded string. An empty
/// object means no filter.
pub(crate) fn parse_filter_arg(args: &Args) -> Result<Option<FilterExpr>> {
    let raw = match args.value("filter") {
        None => return Ok(None),
        Some(raw) => raw,
    };
    let value: Json = match raw {
        Json::String(s) if s.trim().is_empty() => return Ok(None),
        Json::String(s) => serde_json::from_str(s)
            .map_err(|e| ApiError::InvalidInput(format!("filter is not valid JSON: {}", e)))?,
        other => other.clone(),
    };
    if value.as_object().is_some_and(|map| map.is_empty()) {
        return Ok(None);
    }
    Ok(Some(parse_filter_expr(&value)?))
}

pub(crate) fn search_query(args: &Args) -> Result<SearchQuery> {
    Ok(SearchQuery {
        filter: parse_filter_arg(args)?,
        sort: args.str_list("sort")?,
        offset: args.usize("offset", 0)?,
        limit: args.usize("limit", 100)?,
    })
}

/// Save input must be a non-empty object.
pub(crate) fn input_object(args: &Args) -> Result<&Json> {
    let value = args.value("input").ok_or_else(|| {
        ApiError::InvalidInput("Parameter \"input\" must not be empty".to_string())
    })?;
    let map = value.as_object().ok_or_else(|| {
        ApiError::InvalidInput("Parameter \"input\" must be an object".to_string())
    })?;
    if map.is_empty() {
        return Err(ApiError::InvalidInput(
            "Parameter \"input\" must not be empty".to_string(),
        ));
    }
    Ok(value)
}

/// Batch save input must be a non-empty list of entries.
pub(crate) fn input_list(args: &Args) -> Result<&[Json]> {
    match args.value("input").and_then(|v| v.as_array()) {
        Some(entries) if !entries.is_empty() => Ok(entries),
        _ => Err(ApiError::InvalidInput(
            "Parameter \"input\" must not be empty".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceGroups;
    use crate::model::{AggregateRow, AttributeDescriptor, CapabilitySet, ScalarKind, UserContext};
    use crate::store::{ManagerFactory, SearchPage};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Calls {
        get: usize,
        search: usize,
        save: usize,
        save_many: usize,
        create: usize,
    }

    struct CountingManager {
        path: DomainPath,
        items: Mutex<BTreeMap<String, Entity>>,
        calls: Mutex<Calls>,
    }

    impl CountingManager {
        fn new(path: &str, items: Vec<Entity>) -> Arc<Self> {
            let map = items
                .into_iter()
                .filter_map(|e| e.id().map(|id| (id, e)))
                .collect();
            Arc::new(Self {
                path: DomainPath::parse(path).unwrap(),
                items: Mutex::new(map),
                calls: Mutex::new(Calls::default()),
            })
        }
    }

    impl Manager for CountingManager {
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
                AttributeDescriptor::new(&self.path.qualify("code"), ScalarKind::String, "Code"),
            ]
        }

        fn create(&self) -> anyhow::Result<Entity> {
            self.calls.lock().create += 1;
            Ok(Entity::new(self.path.clone()))
        }

        fn get(&self, id: &str, _include: &[String]) -> anyhow::Result<Option<Entity>> {
            self.calls.lock().get += 1;
            Ok(self.items.lock().get(id).cloned())
        }

        fn find(
            &self,
            code: &str,
            _include: &[String],
            _filters: &BTreeMap<String, Json>,
        ) -> anyhow::Result<Option<Entity>> {
            Ok(self
                .items
                .lock()
                .values()
                .find(|e| e.get_str("code").as_deref() == Some(code))
                .cloned())
        }

        fn search(&self, query: &SearchQuery, _include: &[String]) -> anyhow::Result<SearchPage> {
            self.calls.lock().search += 1;
            let items = self.items.lock();
            let matched: Vec<Entity> = match &query.filter {
                Some(FilterExpr::In { r#in: (_, ids) }) => ids
                    .iter()
                    .filter_map(|id| id.as_str())
                    .filter_map(|id| items.get(id).cloned())
                    .collect(),
                _ => items.values().cloned().collect(),
            };
            let total = matched.len() as u64;
            Ok(SearchPage {
                items: matched.into_iter().take(query.limit).collect(),
                total,
            })
        }

        fn aggregate(&self, _query: &AggregateQuery) -> anyhow::Result<Vec<AggregateRow>> {
            Ok(vec![AggregateRow {
                key: "default".to_string(),
                value: json!(2),
            }])
        }

        fn save(&self, mut entity: Entity) -> anyhow::Result<Entity> {
            self.calls.lock().save += 1;
            let mut items = self.items.lock();
            let id = entity.id().unwrap_or_else(|| format!("s{}", items.len() + 1));
            entity.set_id(&id);
            items.insert(id, entity.clone());
            Ok(entity)
        }

        fn save_many(&self, entities: Vec<Entity>) -> anyhow::Result<Vec<Entity>> {
            self.calls.lock().save_many += 1;
            entities.into_iter().map(|e| self.save(e)).collect()
        }

        fn delete(&self, id: &str) -> anyhow::Result<bool> {
            Ok(self.items.lock().remove(id).is_some())
        }

        fn delete_many(&self, ids: &[String]) -> anyhow::Result<()> {
            let mut items = self.items.lock();
            for id in ids {
                items.remove(id);
            }
            Ok(())
        }
    }

    struct SingleFactory {
        manager: Arc<CountingManager>,
    }

    impl ManagerFactory for SingleFactory {
        fn manager(&self, path: &DomainPath) -> anyhow::Result<Arc<dyn Manager>> {
            anyhow::ensure!(path == &self.manager.path, "unknown domain {}", path);
            Ok(Arc::clone(&self.manager) as Arc<dyn Manager>)
        }
    }

    fn product(id: &str, label: &str) -> Entity {
        let mut e = Entity::new(DomainPath::parse("product").unwrap());
        e.set_id(id);
        e.set("product.label", json!(label));
        e
    }

    fn setup(items: Vec<Entity>) -> (Arc<CountingManager>, StandardResolver, DomainSpec) {
        let manager = CountingManager::new("product", items);
        let mut config = ApiConfig::default();
        config
            .resource
            .insert("product".to_string(), ResourceGroups::all(&["editor"]));
        let config = Arc::new(config);
        let registry = Arc::new(Registry::new(
            Arc::new(SingleFactory {
                manager: Arc::clone(&manager),
            }),
            Vec::new(),
        ));
        let spec = DomainSpec::new(DomainPath::parse("product").unwrap());
        (manager, StandardResolver::new(config, registry), spec)
    }

    fn editor() -> RequestContext {
        RequestContext::new(UserContext::new("u1", "Editor", ["editor".to_string()]))
    }

    fn run(ops: Vec<Operation>, name: &str, ctx: &RequestContext, args: Json) -> Result<Value> {
        let op = ops.into_iter().find(|op| op.name == name).unwrap();
        let mut parsed = Args::from_value(&args).unwrap();
        for def in &op.args {
            if let Some(default) = &def.default {
                parsed.set_default(&def.name, default.clone());
            }
        }
        (op.resolver)(ctx, &parsed)
    }

    #[test]
    fn test_denied_caller_reaches_no_manager() {
        let (manager, resolver, spec) = setup(vec![product("p1", "Shirt")]);
        let ctx = RequestContext::new(UserContext::new("u2", "Viewer", ["viewer".to_string()]));

        let result = run(
            resolver.queries(&spec).unwrap(),
            "getProduct",
            &ctx,
            json!({ "id": "p1" }),
        );

        assert!(matches!(result, Err(ApiError::Forbidden)));
        let calls = manager.calls.lock();
        assert_eq!(calls.get, 0);
        assert_eq!(calls.search, 0);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let (_, resolver, spec) = setup(Vec::new());

        for args in [json!({}), json!({ "input": {} })] {
            let result = run(
                resolver.mutations(&spec).unwrap(),
                "saveProduct",
                &editor(),
                args,
            );
            match result {
                Err(ApiError::InvalidInput(msg)) => {
                    assert_eq!(msg, "Parameter \"input\" must not be empty")
                }
                other => panic!("expected invalid input, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_save_with_unknown_id_fails() {
        let (_, resolver, spec) = setup(Vec::new());
        let result = run(
            resolver.mutations(&spec).unwrap(),
            "saveProduct",
            &editor(),
            json!({ "input": { "id": "nope", "label": "x" } }),
        );
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_batch_save_prefetches_once() {
        let (manager, resolver, spec) = setup(vec![product("p1", "Shirt")]);

        let result = run(
            resolver.mutations(&spec).unwrap(),
            "saveProducts",
            &editor(),
            json!({ "input": [
                { "id": "p1", "label": "Blue Shirt" },
                { "label": "Fresh" }
            ] }),
        )
        .unwrap();

        match result {
            Value::List(items) => assert_eq!(items.len(), 2),
            other => panic!("expected list, got {:?}", other),
        }
        let calls = manager.calls.lock();
        assert_eq!(calls.search, 1);
        assert_eq!(calls.save_many, 1);
        assert_eq!(calls.get, 0);
        assert_eq!(calls.create, 1);

        let items = manager.items.lock();
        assert_eq!(
            items["p1"].get_str("label"),
            Some("Blue Shirt".to_string())
        );
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_delete_echoes_the_id() {
        let (manager, resolver, spec) = setup(vec![product("p1", "Shirt")]);

        let result = run(
            resolver.mutations(&spec).unwrap(),
            "deleteProduct",
            &editor(),
            json!({ "id": "p1" }),
        )
        .unwrap();

        assert_eq!(result, Value::Scalar(json!("p1")));
        assert!(manager.items.lock().is_empty());

        // Deleting the same id again still echoes it.
        let result = run(
            resolver.mutations(&spec).unwrap(),
            "deleteProduct",
            &editor(),
            json!({ "id": "p1" }),
        )
        .unwrap();
        assert_eq!(result, Value::Scalar(json!("p1")));
    }

    #[test]
    fn test_filter_arg_accepts_string_and_object() {
        let string_form = Args::from_value(&json!({ "filter": "{\"eq\": [\"label\", \"x\"]}" })).unwrap();
        let object_form = Args::from_value(&json!({ "filter": { "eq": ["label", "x"] } })).unwrap();
        let empty = Args::from_value(&json!({ "filter": "{}" })).unwrap();

        assert_eq!(
            parse_filter_arg(&string_form).unwrap(),
            parse_filter_arg(&object_form).unwrap()
        );
        assert_eq!(parse_filter_arg(&empty).unwrap(), None);
        assert!(parse_filter_arg(&Args::from_value(&json!({ "filter": "{nope" })).unwrap()).is_err());
    }
}
