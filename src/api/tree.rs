use std::sync::Arc;

use serde_json::{json, Value as Json};

use crate::api::operations::{check_access, DomainResolver, Operation, RequestContext};
use crate::api::standard::{include_arg, input_object, search_args, search_query};
use crate::config::{Action, ApiConfig, DomainSpec};
use crate::error::{ApiError, Result};
use crate::logic::{assemble_forest, assemble_path, expand_children, Reconciler};
use crate::model::{DomainPath, Entity, FilterExpr, Payload, SearchQuery};
use crate::registry::{ArgDef, Args, Registry, SearchItemKind, TypeRef, Value};
use crate::store::Manager;

/// Operations for hierarchical domains: subtree and path queries, tree
/// search, node insertion and node moves.
pub struct TreeResolver {
    config: Arc<ApiConfig>,
    registry: Arc<Registry>,
}

impl TreeResolver {
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

    fn tree_op(&self, domain: &DomainSpec, returns: TypeRef) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("get{}Tree", domain.path.camel_name()),
            &format!("Returns the {} node and its descendants", path.dotted()),
            vec![
                ArgDef::new("id", TypeRef::string(), "Node id, the root node when empty"),
                ArgDef::new(
                    "level",
                    TypeRef::int(),
                    "1 = node only, 2 = with children, 3 = whole subtree",
                )
                .with_default(json!(3)),
                include_arg(),
            ],
            returns,
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Get)?;
                let manager = registry.factory().manager(&path)?;
                let include = args.str_list("include")?;
                let level = args.usize("level", 3)?;

                let mut node = match args.str("id")? {
                    Some(id) => manager.get(&id, &include)?.ok_or_else(|| {
                        ApiError::NotFound(format!("{} with ID {}", path, id))
                    })?,
                    None => root_node(manager.as_ref(), &include)?,
                };

                expand_children(&mut node, level, |id| {
                    let page = manager.search(&children_query(id), &include)?;
                    Ok(page.items)
                })?;
                Ok(Value::Item(node))
            },
        )
    }

    fn path_op(&self, domain: &DomainSpec, returns: TypeRef) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("get{}Path", domain.path.camel_name()),
            &format!("Returns the {} nodes from the root down to the given node", path.dotted()),
            vec![
                ArgDef::new("id", TypeRef::string(), "Node id"),
                include_arg(),
            ],
            returns,
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Get)?;
                let manager = registry.factory().manager(&path)?;
                let id = args.str_required("id")?;
                let include = args.str_list("include")?;

                let leaf = manager.get(&id, &include)?.ok_or_else(|| {
                    ApiError::NotFound(format!("{} with ID {}", path, id))
                })?;
                let chain = assemble_path(leaf, |ids| {
                    let query = SearchQuery::by_ids(ids.iter().cloned());
                    Ok(manager.search(&query, &include)?.items)
                })?;
                Ok(Value::items(chain))
            },
        )
    }

    fn search_trees_op(&self, domain: &DomainSpec, returns: TypeRef) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("search{}Trees", domain.path.camel_name()),
            &format!("Searches for {} nodes and rebuilds their hierarchy", path.dotted()),
            search_args(),
            returns,
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Get)?;
                let manager = registry.factory().manager(&path)?;
                let query = search_query(args)?;
                let include = args.str_list("include")?;

                let page = manager.search(&query, &include)?;
                let forest = assemble_forest(page.items, |ids| {
                    let query = SearchQuery::by_ids(ids.iter().cloned());
                    Ok(manager.search(&query, &include)?.items)
                })?;
                // Total counts matched nodes, not assembled roots.
                Ok(Value::Search {
                    items: forest,
                    total: page.total,
                })
            },
        )
    }

    fn insert_op(&self, domain: &DomainSpec, input: TypeRef, returns: TypeRef) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("insert{}", domain.path.camel_name()),
            &format!("Inserts a new {} node below the given parent", path.dotted()),
            vec![
                ArgDef::new("input", input, "Node fields to store"),
                ArgDef::new("parentid", TypeRef::string(), "Parent node id, root when empty"),
                ArgDef::new("refid", TypeRef::string(), "Sibling the node is inserted before"),
            ],
            returns,
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Save)?;
                let manager = registry.factory().manager(&path)?;
                let payload = Payload::parse(&path, input_object(args)?)?;

                let mut entity = manager.create()?;
                Reconciler::new(
                    Arc::clone(registry.factory()),
                    registry.lists_domains().to_vec(),
                )
                .apply(manager.as_ref(), &mut entity, &payload)?;

                let parent = args.str("parentid")?;
                let reference = args.str("refid")?;
                let inserted =
                    manager.insert_node(entity, parent.as_deref(), reference.as_deref())?;
                Ok(Value::Item(inserted))
            },
        )
    }

    fn move_op(&self, domain: &DomainSpec) -> Operation {
        let (config, registry, path) = self.capture(domain);
        Operation::new(
            format!("move{}", domain.path.camel_name()),
            &format!("Moves a {} node below another parent", path.dotted()),
            vec![
                ArgDef::new("id", TypeRef::string(), "Node id"),
                ArgDef::new("parentid", TypeRef::string(), "Current parent node id"),
                ArgDef::new("targetid", TypeRef::string(), "New parent node id, root when empty"),
                ArgDef::new("refid", TypeRef::string(), "Sibling the node is inserted before"),
            ],
            TypeRef::string(),
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Save)?;
                let manager = registry.factory().manager(&path)?;
                let id = args.str_required("id")?;
                let parent = args.str("parentid")?;
                let target = args.str("targetid")?;
                let reference = args.str("refid")?;

                manager.move_node(
                    &id,
                    parent.as_deref(),
                    target.as_deref(),
                    reference.as_deref(),
                )?;
                Ok(Value::Scalar(Json::String(id)))
            },
        )
    }
}

impl DomainResolver for TreeResolver {
    fn queries(&self, domain: &DomainSpec) -> Result<Vec<Operation>> {
        let output = TypeRef::named(&self.registry.output_type(&domain.path)?);
        let tree = TypeRef::named(&self.registry.tree_output_type(&domain.path)?);
        let search = TypeRef::named(
            &self
                .registry
                .search_output_type(&domain.path, SearchItemKind::Tree)?,
        );

        Ok(vec![
            self.tree_op(domain, tree),
            self.path_op(domain, TypeRef::list(output)),
            self.search_trees_op(domain, search),
        ])
    }

    fn mutations(&self, domain: &DomainSpec) -> Result<Vec<Operation>> {
        let output = TypeRef::named(&self.registry.output_type(&domain.path)?);
        let input = TypeRef::named(&self.registry.input_type(&domain.path)?);

        Ok(vec![
            self.insert_op(domain, input, output.clone()),
            self.move_op(domain),
        ])
    }
}

/// The node without a parent, lowest position first when several qualify.
fn root_node(manager: &dyn Manager, include: &[String]) -> Result<Entity> {
    let query = SearchQuery {
        filter: Some(FilterExpr::Any {
            any: vec![
                FilterExpr::NotExists {
                    not_exists: "parentid".to_string(),
                },
                FilterExpr::Eq {
                    eq: ("parentid".to_string(), Json::String(String::new())),
                },
            ],
        }),
        sort: vec!["position".to_string(), "id".to_string()],
        offset: 0,
        limit: 1,
    };
    let page = manager.search(&query, include)?;
    page.items.into_iter().next().ok_or_else(|| {
        ApiError::NotFound(format!("root node of domain \"{}\"", manager.path()))
    })
}

fn children_query(parent_id: &str) -> SearchQuery {
    SearchQuery {
        filter: Some(FilterExpr::Eq {
            eq: (
                "parentid".to_string(),
                Json::String(parent_id.to_string()),
            ),
        }),
        sort: vec!["position".to_string(), "id".to_string()],
        offset: 0,
        limit: usize::MAX,
    }
}
