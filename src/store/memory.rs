use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, bail, ensure, Result};
use itertools::Itertools;
use parking_lot::RwLock;
use serde_json::{json, Value as Json};

use crate::logic::FilterEvaluator;
use crate::model::{
    generate_id, now_ts, AggregateQuery, AggregateRow, Aggregation, AttributeDescriptor,
    CapabilitySet, ConfigAttribute, DomainPath, Entity, FilterExpr, ListLink, ScalarKind,
    SearchQuery,
};
use crate::store::{Manager, ManagerFactory, SearchPage};

/// Process-local store backing demos and tests. Cheap to clone; clones
/// share the same state.
///
/// Each declared domain keeps its records in its own map. Sub-aspect
/// records (addresses, properties, link records) live inside their
/// owning entity; link targets live in their own domain and are
/// attached on read for the included domains.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    domains: RwLock<HashMap<String, DomainState>>,
}

struct DomainState {
    path: DomainPath,
    attributes: Vec<AttributeDescriptor>,
    capabilities: CapabilitySet,
    entities: BTreeMap<String, Entity>,
    provider_configs: HashMap<String, Vec<ConfigAttribute>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a domain with its searchable attributes. Canonical
    /// columns (`id`, `ctime`, `mtime`, tree pointers) are appended when
    /// missing, and the sub-aspect domains implied by the capability set
    /// are registered alongside with their uniform shapes.
    pub fn declare(
        &self,
        path: &str,
        attributes: Vec<AttributeDescriptor>,
        capabilities: CapabilitySet,
    ) -> Result<DomainPath> {
        let path = DomainPath::parse(path)?;
        let mut attributes = attributes;
        append_missing(&mut attributes, &path, "id", ScalarKind::String, "Unique id");
        if capabilities.tree {
            append_missing(&mut attributes, &path, "parentid", ScalarKind::String, "Parent node id");
            append_missing(&mut attributes, &path, "position", ScalarKind::Int, "Position below the parent");
        }
        append_missing(&mut attributes, &path, "ctime", ScalarKind::Int, "Created at");
        append_missing(&mut attributes, &path, "mtime", ScalarKind::Int, "Modified at");

        let mut domains = self.inner.domains.write();
        if capabilities.address {
            let sub = path.join("address")?;
            register(&mut domains, sub.clone(), address_attributes(&sub), CapabilitySet::default());
        }
        if capabilities.property {
            let sub = path.join("property")?;
            register(&mut domains, sub.clone(), property_attributes(&sub), CapabilitySet::default());
        }
        if capabilities.lists {
            let sub = path.join("lists")?;
            register(&mut domains, sub.clone(), link_attributes(&sub), CapabilitySet::default());
        }
        register(&mut domains, path.clone(), attributes, capabilities);
        Ok(path)
    }

    /// Registers the configuration attributes one provider advertises.
    pub fn set_provider_config(
        &self,
        path: &str,
        provider: &str,
        attributes: Vec<ConfigAttribute>,
    ) -> Result<()> {
        let path = DomainPath::parse(path)?;
        let mut domains = self.inner.domains.write();
        let state = domains
            .get_mut(path.as_str())
            .ok_or_else(|| anyhow!("unknown domain \"{}\"", path))?;
        state
            .provider_configs
            .insert(provider.to_lowercase(), attributes);
        Ok(())
    }
}

impl ManagerFactory for MemoryStore {
    fn manager(&self, path: &DomainPath) -> Result<Arc<dyn Manager>> {
        let domains = self.inner.domains.read();
        ensure!(
            domains.contains_key(path.as_str()),
            "unknown domain \"{}\"",
            path
        );
        Ok(Arc::new(MemoryManager {
            inner: Arc::clone(&self.inner),
            path: path.clone(),
        }))
    }
}

struct MemoryManager {
    inner: Arc<StoreInner>,
    path: DomainPath,
}

impl MemoryManager {
    fn read<T>(&self, with: impl FnOnce(&HashMap<String, DomainState>, &DomainState) -> T) -> Result<T> {
        let domains = self.inner.domains.read();
        let state = domains
            .get(self.path.as_str())
            .ok_or_else(|| anyhow!("unknown domain \"{}\"", self.path))?;
        Ok(with(&domains, state))
    }
}

impl Manager for MemoryManager {
    fn path(&self) -> &DomainPath {
        &self.path
    }

    fn capabilities(&self) -> CapabilitySet {
        self.read(|_, state| state.capabilities).unwrap_or_default()
    }

    fn search_attributes(&self) -> Vec<AttributeDescriptor> {
        self.read(|_, state| state.attributes.clone())
            .unwrap_or_default()
    }

    fn create(&self) -> Result<Entity> {
        self.read(|_, state| Entity::new(state.path.clone()))
    }

    fn get(&self, id: &str, include: &[String]) -> Result<Option<Entity>> {
        self.read(|domains, state| {
            state
                .entities
                .get(id)
                .map(|entity| project(domains, entity, include))
        })
    }

    fn find(
        &self,
        code: &str,
        include: &[String],
        filters: &BTreeMap<String, Json>,
    ) -> Result<Option<Entity>> {
        let mut all = vec![FilterExpr::Eq {
            eq: ("code".to_string(), Json::String(code.to_string())),
        }];
        for (field, value) in filters {
            all.push(FilterExpr::Eq {
                eq: (field.clone(), value.clone()),
            });
        }
        let filter = FilterExpr::All { all };

        self.read(|domains, state| {
            state
                .entities
                .values()
                .find(|entity| FilterEvaluator::matches(entity, &filter))
                .map(|entity| project(domains, entity, include))
        })
    }

    fn search(&self, query: &SearchQuery, include: &[String]) -> Result<SearchPage> {
        self.read(|domains, state| {
            let mut matched: Vec<&Entity> = state
                .entities
                .values()
                .filter(|entity| {
                    query
                        .filter
                        .as_ref()
                        .map(|f| FilterEvaluator::matches(entity, f))
                        .unwrap_or(true)
                })
                .collect();

            let keys = query.sort_keys();
            if !keys.is_empty() {
                matched.sort_by(|a, b| FilterEvaluator::compare(a, b, &keys));
            }

            let total = matched.len() as u64;
            let items = matched
                .into_iter()
                .skip(query.offset)
                .take(query.limit)
                .map(|entity| project(domains, entity, include))
                .collect();
            SearchPage { items, total }
        })
    }

    fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<AggregateRow>> {
        if query.aggregation != Aggregation::Count && query.value.is_none() {
            bail!("aggregation type needs a \"value\" field");
        }

        self.read(|_, state| {
            let mut groups: BTreeMap<String, Vec<&Entity>> = BTreeMap::new();
            for entity in state.entities.values() {
                let matches = query
                    .filter
                    .as_ref()
                    .map(|f| FilterEvaluator::matches(entity, f))
                    .unwrap_or(true);
                if !matches {
                    continue;
                }
                groups.entry(group_key(entity, &query.keys)).or_default().push(entity);
            }

            groups
                .into_iter()
                .take(query.limit)
                .map(|(key, members)| {
                    let value = fold_group(&members, query);
                    AggregateRow { key, value }
                })
                .collect()
        })
    }

    fn save(&self, entity: Entity) -> Result<Entity> {
        let mut domains = self.inner.domains.write();
        save_entity(&mut domains, &self.path, entity)
    }

    fn save_many(&self, entities: Vec<Entity>) -> Result<Vec<Entity>> {
        let mut domains = self.inner.domains.write();
        entities
            .into_iter()
            .map(|entity| save_entity(&mut domains, &self.path, entity))
            .collect()
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut domains = self.inner.domains.write();
        let state = domains
            .get_mut(self.path.as_str())
            .ok_or_else(|| anyhow!("unknown domain \"{}\"", self.path))?;
        Ok(delete_subtree(state, id))
    }

    fn delete_many(&self, ids: &[String]) -> Result<()> {
        let mut domains = self.inner.domains.write();
        let state = domains
            .get_mut(self.path.as_str())
            .ok_or_else(|| anyhow!("unknown domain \"{}\"", self.path))?;
        for id in ids {
            delete_subtree(state, id);
        }
        Ok(())
    }

    fn create_address(&self) -> Result<Entity> {
        ensure!(
            self.capabilities().address,
            "domain \"{}\" does not support addresses",
            self.path
        );
        Ok(Entity::new(self.path.join("address")?))
    }

    fn create_property(&self) -> Result<Entity> {
        ensure!(
            self.capabilities().property,
            "domain \"{}\" does not support properties",
            self.path
        );
        Ok(Entity::new(self.path.join("property")?))
    }

    fn create_link(&self, domain: &str) -> Result<ListLink> {
        ensure!(
            self.capabilities().lists,
            "domain \"{}\" does not support lists",
            self.path
        );
        let lists = self.path.join("lists")?;
        let mut record = Entity::new(lists.clone());
        record.set(&lists.qualify("domain"), json!(domain));
        Ok(ListLink::new(record))
    }

    fn insert_node(
        &self,
        entity: Entity,
        parent_id: Option<&str>,
        ref_id: Option<&str>,
    ) -> Result<Entity> {
        ensure!(
            self.capabilities().tree,
            "domain \"{}\" does not support tree nodes",
            self.path
        );
        let mut domains = self.inner.domains.write();
        if let Some(parent) = parent_id {
            let state = domains
                .get(self.path.as_str())
                .ok_or_else(|| anyhow!("unknown domain \"{}\"", self.path))?;
            ensure!(
                state.entities.contains_key(parent),
                "parent node {} not found in \"{}\"",
                parent,
                self.path
            );
        }

        let mut saved = save_entity(&mut domains, &self.path, entity)?;
        let id = saved
            .id()
            .ok_or_else(|| anyhow!("saved node lost its id"))?;

        let state = domains
            .get_mut(self.path.as_str())
            .ok_or_else(|| anyhow!("unknown domain \"{}\"", self.path))?;
        let position = place_node(state, &id, parent_id, ref_id)?;
        saved.set(
            &self.path.qualify("parentid"),
            json!(parent_id.unwrap_or_default()),
        );
        saved.set(&self.path.qualify("position"), json!(position));
        Ok(saved)
    }

    fn move_node(
        &self,
        id: &str,
        parent_id: Option<&str>,
        target_parent_id: Option<&str>,
        ref_id: Option<&str>,
    ) -> Result<()> {
        ensure!(
            self.capabilities().tree,
            "domain \"{}\" does not support tree nodes",
            self.path
        );
        let mut domains = self.inner.domains.write();
        let state = domains
            .get_mut(self.path.as_str())
            .ok_or_else(|| anyhow!("unknown domain \"{}\"", self.path))?;

        let current = state
            .entities
            .get(id)
            .ok_or_else(|| anyhow!("node {} not found in \"{}\"", id, self.path))?
            .parent_id();
        if let Some(expected) = parent_id {
            ensure!(
                current.as_deref() == Some(expected),
                "node {} is not below parent {}",
                id,
                expected
            );
        }

        // The new parent must not sit inside the moved subtree.
        let mut cursor = target_parent_id.map(|t| t.to_string());
        while let Some(ancestor) = cursor {
            ensure!(
                ancestor != id,
                "cannot move node {} below its own subtree",
                id
            );
            cursor = state.entities.get(&ancestor).and_then(|e| e.parent_id());
        }
        if let Some(target) = target_parent_id {
            ensure!(
                state.entities.contains_key(target),
                "parent node {} not found in \"{}\"",
                target,
                self.path
            );
        }

        place_node(state, id, target_parent_id, ref_id)?;
        renumber_siblings(state, current.as_deref());
        Ok(())
    }

    fn provider_config(&self, provider: &str, _kind: Option<&str>) -> Result<Vec<ConfigAttribute>> {
        self.read(|_, state| {
            let mut merged = Vec::new();
            for part in provider.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                match state.provider_configs.get(&part.to_lowercase()) {
                    Some(attributes) => merged.extend(attributes.iter().cloned()),
                    None => bail!(
                        "provider \"{}\" not available for domain \"{}\"",
                        part,
                        self.path
                    ),
                }
            }
            Ok(merged)
        })?
    }
}

fn register(
    domains: &mut HashMap<String, DomainState>,
    path: DomainPath,
    attributes: Vec<AttributeDescriptor>,
    capabilities: CapabilitySet,
) {
    let state = domains
        .entry(path.as_str().to_string())
        .or_insert_with(|| DomainState {
            path: path.clone(),
            attributes: Vec::new(),
            capabilities,
            entities: BTreeMap::new(),
            provider_configs: HashMap::new(),
        });
    state.attributes = attributes;
    state.capabilities = capabilities;
}

fn append_missing(
    attributes: &mut Vec<AttributeDescriptor>,
    path: &DomainPath,
    field: &str,
    kind: ScalarKind,
    label: &str,
) {
    let code = path.qualify(field);
    if !attributes.iter().any(|a| a.code == code) {
        attributes.push(AttributeDescriptor::new(&code, kind, label));
    }
}

fn address_attributes(path: &DomainPath) -> Vec<AttributeDescriptor> {
    standard_attributes(
        path,
        &[
            ("company", ScalarKind::String, "Company name"),
            ("firstname", ScalarKind::String, "First name"),
            ("lastname", ScalarKind::String, "Last name"),
            ("address1", ScalarKind::String, "Street"),
            ("postal", ScalarKind::String, "Postal code"),
            ("city", ScalarKind::String, "City"),
            ("countryid", ScalarKind::String, "Country code"),
            ("languageid", ScalarKind::String, "Language code"),
            ("telephone", ScalarKind::String, "Phone number"),
            ("email", ScalarKind::String, "E-mail address"),
        ],
    )
}

fn property_attributes(path: &DomainPath) -> Vec<AttributeDescriptor> {
    standard_attributes(
        path,
        &[
            ("type", ScalarKind::String, "Property type"),
            ("languageid", ScalarKind::String, "Language code"),
            ("value", ScalarKind::String, "Property value"),
        ],
    )
}

fn link_attributes(path: &DomainPath) -> Vec<AttributeDescriptor> {
    standard_attributes(
        path,
        &[
            ("domain", ScalarKind::String, "Referenced domain"),
            ("refid", ScalarKind::String, "Referenced record id"),
            ("type", ScalarKind::String, "List type"),
            ("position", ScalarKind::Int, "Position within the list"),
            ("status", ScalarKind::Int, "Link status"),
            ("config", ScalarKind::Json, "Link configuration"),
            ("datestart", ScalarKind::String, "Active from"),
            ("dateend", ScalarKind::String, "Active until"),
        ],
    )
}

fn standard_attributes(
    path: &DomainPath,
    fields: &[(&str, ScalarKind, &str)],
) -> Vec<AttributeDescriptor> {
    let mut attributes = vec![AttributeDescriptor::new(
        &path.qualify("id"),
        ScalarKind::String,
        "Unique id",
    )];
    attributes.push(AttributeDescriptor::new(
        &path.qualify("parentid"),
        ScalarKind::String,
        "Owning record id",
    ));
    for (field, kind, label) in fields {
        attributes.push(AttributeDescriptor::new(&path.qualify(field), *kind, label));
    }
    attributes
}

/// Read-side projection: strips sub-collections the caller did not ask
/// for and attaches link targets of the included domains. Targets are
/// projected one level deep, keeping only their sub-aspect includes.
fn project(domains: &HashMap<String, DomainState>, entity: &Entity, include: &[String]) -> Entity {
    let mut out = entity.clone();
    let path = entity.path();

    if !include.contains(&format!("{}/address", path)) {
        out.addresses.clear();
    }
    if !include.contains(&format!("{}/property", path)) {
        out.properties.clear();
    }

    let mut links = Vec::new();
    for link in &entity.links {
        let domain = match link.domain() {
            Some(domain) if include.contains(&domain) => domain,
            _ => continue,
        };
        let mut link = link.clone();
        if let Some(target_id) = link.target_id() {
            let nested: Vec<String> = include
                .iter()
                .filter(|entry| entry.contains('/'))
                .cloned()
                .collect();
            link.target = domains
                .get(domain.as_str())
                .and_then(|state| state.entities.get(&target_id))
                .map(|target| project(domains, target, &nested));
        }
        links.push(link);
    }
    out.links = links;
    out
}

/// Persists one entity: assigns ids and timestamps, stamps sub-records
/// with their owner, saves link targets into their own domains and
/// back-fills the link refids. The stored copy keeps link records but
/// not the attached targets.
fn save_entity(
    domains: &mut HashMap<String, DomainState>,
    path: &DomainPath,
    mut entity: Entity,
) -> Result<Entity> {
    ensure!(
        domains.contains_key(path.as_str()),
        "unknown domain \"{}\"",
        path
    );

    let now = now_ts();
    let id = entity.id().unwrap_or_else(generate_id);
    entity.set_id(&id);
    if entity.get("ctime").is_none() {
        entity.set(&path.qualify("ctime"), json!(now));
    }
    entity.set(&path.qualify("mtime"), json!(now));

    for sub in entity.addresses.iter_mut().chain(entity.properties.iter_mut()) {
        let sub_path = sub.path().clone();
        if sub.id().is_none() {
            sub.set_id(&generate_id());
        }
        sub.set(&sub_path.qualify("parentid"), json!(id));
    }

    let lists = path.join("lists")?;
    for link in &mut entity.links {
        if link.domain().is_none() {
            bail!("list entry of \"{}\" without a domain", path);
        }
        if let Some(target) = link.target.take() {
            let target_path = target.path().clone();
            let saved = save_entity(domains, &target_path, target)?;
            if let Some(ref_id) = saved.id() {
                link.record.set(&lists.qualify("refid"), json!(ref_id));
            }
            link.target = Some(saved);
        }
        if link.id().is_none() {
            link.record.set_id(&generate_id());
        }
        link.record.set(&lists.qualify("parentid"), json!(id));
    }

    let mut stored = entity.clone();
    for link in &mut stored.links {
        link.target = None;
    }
    let state = domains
        .get_mut(path.as_str())
        .ok_or_else(|| anyhow!("unknown domain \"{}\"", path))?;
    state.entities.insert(id, stored);
    Ok(entity)
}

/// Removes a record; for tree domains the whole subtree goes with it.
fn delete_subtree(state: &mut DomainState, id: &str) -> bool {
    if state.entities.remove(id).is_none() {
        return false;
    }
    if state.capabilities.tree {
        let mut stack = vec![id.to_string()];
        while let Some(parent) = stack.pop() {
            let children: Vec<String> = state
                .entities
                .values()
                .filter(|e| e.parent_id().as_deref() == Some(parent.as_str()))
                .filter_map(|e| e.id())
                .collect();
            for child in children {
                state.entities.remove(&child);
                stack.push(child);
            }
        }
    }
    true
}

/// Puts a node below a parent, before the `before` sibling when given,
/// and rewrites the sibling positions densely. Returns the position the
/// node ended up at.
fn place_node(
    state: &mut DomainState,
    id: &str,
    parent: Option<&str>,
    before: Option<&str>,
) -> Result<usize> {
    let path = state.path.clone();
    {
        let node = state
            .entities
            .get_mut(id)
            .ok_or_else(|| anyhow!("node {} not found in \"{}\"", id, path))?;
        node.set(&path.qualify("parentid"), json!(parent.unwrap_or_default()));
    }

    let mut order = ordered_children(state, parent);
    order.retain(|sibling| sibling != id);
    let index = before
        .and_then(|b| order.iter().position(|sibling| sibling == b))
        .unwrap_or(order.len());
    order.insert(index, id.to_string());

    for (position, sibling) in order.iter().enumerate() {
        if let Some(node) = state.entities.get_mut(sibling) {
            node.set(&path.qualify("position"), json!(position));
        }
    }
    Ok(index)
}

fn renumber_siblings(state: &mut DomainState, parent: Option<&str>) {
    let path = state.path.clone();
    for (position, sibling) in ordered_children(state, parent).iter().enumerate() {
        if let Some(node) = state.entities.get_mut(sibling) {
            node.set(&path.qualify("position"), json!(position));
        }
    }
}

fn ordered_children(state: &DomainState, parent: Option<&str>) -> Vec<String> {
    state
        .entities
        .values()
        .filter(|e| e.parent_id().as_deref() == parent)
        .filter_map(|e| {
            e.id().map(|id| {
                let position = e
                    .get("position")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(i64::MAX);
                (position, id)
            })
        })
        .sorted()
        .map(|(_, id)| id)
        .collect()
}

fn group_key(entity: &Entity, keys: &[String]) -> String {
    let parts: Vec<String> = keys
        .iter()
        .map(|key| entity.get_str(key).unwrap_or_default())
        .collect();
    if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        serde_json::to_string(&parts).unwrap_or_default()
    }
}

fn fold_group(members: &[&Entity], query: &AggregateQuery) -> Json {
    match query.aggregation {
        Aggregation::Count => json!(members.len()),
        Aggregation::Sum => json!(numeric_values(members, query).sum::<f64>()),
        Aggregation::Avg => {
            let values: Vec<f64> = numeric_values(members, query).collect();
            if values.is_empty() {
                json!(0.0)
            } else {
                json!(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
    }
}

fn numeric_values<'a>(
    members: &'a [&Entity],
    query: &'a AggregateQuery,
) -> impl Iterator<Item = f64> + 'a {
    members.iter().filter_map(move |entity| {
        let field = query.value.as_deref()?;
        match entity.get(field)? {
            Json::Number(n) => n.as_f64(),
            Json::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    })
}
