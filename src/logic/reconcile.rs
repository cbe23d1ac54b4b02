use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{ApiError, Result};
use crate::model::{DomainPath, Entity, LinkEntry, ListLink, Payload};
use crate::store::{Manager, ManagerFactory};

/// Merges a parsed save payload into a loaded entity without recreating
/// collection members the payload still refers to.
///
/// Scalar values overwrite. Addresses and properties pair positionally
/// with the stored entries, surplus stored entries are dropped. Links
/// match by explicit link id first, then by link type and target id;
/// matched links keep their id and their loaded target, unmatched
/// stored links are dropped only after the whole collection was
/// processed. A collection key that is absent from the payload leaves
/// the stored collection untouched; a present empty one clears it.
pub struct Reconciler {
    factory: Arc<dyn ManagerFactory>,
    lists_domains: Vec<String>,
}

impl Reconciler {
    pub fn new(factory: Arc<dyn ManagerFactory>, lists_domains: Vec<String>) -> Self {
        Self {
            factory,
            lists_domains,
        }
    }

    /// Sub-collections to load before the merge. The payload's own refs
    /// plus everything the domain can carry: an untouched collection is
    /// only untouched if it was loaded onto the entity in the first
    /// place.
    pub fn load_refs(&self, manager: &dyn Manager, payload: &Payload) -> Vec<String> {
        let mut refs: BTreeSet<String> = payload.refs().into_iter().collect();
        let caps = manager.capabilities();
        let path = manager.path();
        if caps.address {
            refs.insert(format!("{}/address", path));
        }
        if caps.property {
            refs.insert(format!("{}/property", path));
        }
        if caps.lists {
            refs.extend(self.lists_domains.iter().cloned());
        }
        refs.into_iter().collect()
    }

    pub fn apply(&self, manager: &dyn Manager, entity: &mut Entity, payload: &Payload) -> Result<()> {
        entity.apply(payload.values.clone());

        if let Some(entries) = &payload.addresses {
            reconcile_positional(&mut entity.addresses, entries, || manager.create_address())?;
        }
        if let Some(entries) = &payload.properties {
            reconcile_positional(&mut entity.properties, entries, || manager.create_property())?;
        }
        if let Some(lists) = &payload.lists {
            for (domain, entries) in lists {
                self.reconcile_links(manager, entity, domain, entries)?;
            }
        }

        Ok(())
    }

    fn reconcile_links(
        &self,
        manager: &dyn Manager,
        entity: &mut Entity,
        domain: &str,
        entries: &[LinkEntry],
    ) -> Result<()> {
        let mut kept = Vec::new();
        let mut existing: Vec<Option<ListLink>> = Vec::new();
        for link in entity.links.drain(..) {
            if link.domain().as_deref() == Some(domain) {
                existing.push(Some(link));
            } else {
                kept.push(link);
            }
        }

        // Targets loaded before the merge, so re-referenced records keep
        // their fetched state even when their previous link goes away.
        let mut pool: HashMap<String, Entity> = HashMap::new();
        for link in existing.iter().flatten() {
            if let (Some(id), Some(target)) = (link.target_id(), link.target.as_ref()) {
                pool.insert(id, target.clone());
            }
        }

        let mut claims: Vec<Option<ListLink>> = vec![None; entries.len()];
        for (index, entry) in entries.iter().enumerate() {
            if let Some(id) = entry.link_id() {
                let slot = existing.iter_mut().find(|slot| {
                    slot.as_ref()
                        .is_some_and(|link| link.id().as_deref() == Some(id.as_str()))
                });
                if let Some(slot) = slot {
                    claims[index] = slot.take();
                }
            }
        }
        for (index, entry) in entries.iter().enumerate() {
            if claims[index].is_some() || entry.link_id().is_some() {
                continue;
            }
            let link_type = entry.link_type();
            let target_id = entry.target_id();
            let slot = existing.iter_mut().find(|slot| {
                slot.as_ref()
                    .is_some_and(|link| link.link_type() == link_type && link.target_id() == target_id)
            });
            if let Some(slot) = slot {
                claims[index] = slot.take();
            }
        }

        for (entry, claim) in entries.iter().zip(claims) {
            let mut link = match claim {
                Some(link) => link,
                None => manager.create_link(domain)?,
            };
            let link_id = link.id();
            link.record.apply(entry.values.clone());
            if let Some(id) = link_id {
                link.record.set_id(&id);
            }

            if let Some(item) = &entry.item {
                let target = self.reconcile_target(&mut link, entry, &pool, domain, item)?;
                link.target = Some(target);
            } else if link.target.is_none() {
                if let Some(target) = entry.target_id().and_then(|id| pool.get(&id).cloned()) {
                    link.target = Some(target);
                }
            }

            kept.push(link);
        }

        // Unclaimed stored links of this domain drop here, after every
        // entry had its chance to match them.
        entity.links = kept;
        Ok(())
    }

    fn reconcile_target(
        &self,
        link: &mut ListLink,
        entry: &LinkEntry,
        pool: &HashMap<String, Entity>,
        domain: &str,
        item: &Payload,
    ) -> Result<Entity> {
        let path = DomainPath::parse(domain)?;
        let target_manager = self.factory.manager(&path)?;

        let mut target = match link.target.take() {
            Some(target) => target,
            None => match entry.target_id().or_else(|| link.target_id()) {
                Some(id) => match pool.get(&id).cloned() {
                    Some(target) => target,
                    None => {
                        let refs = self.load_refs(target_manager.as_ref(), item);
                        target_manager.get(&id, &refs)?.ok_or_else(|| {
                            ApiError::NotFound(format!("{} with ID {}", path, id))
                        })?
                    }
                },
                None => target_manager.create()?,
            },
        };

        self.apply(target_manager.as_ref(), &mut target, item)?;
        Ok(target)
    }
}

/// Pairs payload entries with stored sub-entities by position. Stored
/// entries beyond the payload length are dropped, paired entries keep
/// their id, missing ones are created through the manager.
fn reconcile_positional(
    existing: &mut Vec<Entity>,
    entries: &[Payload],
    mut create: impl FnMut() -> anyhow::Result<Entity>,
) -> Result<()> {
    existing.truncate(entries.len());

    for (index, entry) in entries.iter().enumerate() {
        if let Some(sub) = existing.get_mut(index) {
            let kept = sub.id();
            sub.apply(entry.values.clone());
            if let Some(id) = kept {
                sub.set_id(&id);
            }
        } else {
            let mut sub = create()?;
            sub.apply(entry.values.clone());
            existing.push(sub);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AggregateQuery, AggregateRow, AttributeDescriptor, CapabilitySet, SearchQuery,
    };
    use crate::store::SearchPage;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    struct StubManager {
        path: DomainPath,
    }

    impl StubManager {
        fn new(path: &str) -> Self {
            Self {
                path: DomainPath::parse(path).unwrap(),
            }
        }
    }

    impl Manager for StubManager {
        fn path(&self) -> &DomainPath {
            &self.path
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet {
                address: true,
                property: true,
                lists: true,
                tree: false,
            }
        }

        fn search_attributes(&self) -> Vec<AttributeDescriptor> {
            Vec::new()
        }

        fn create(&self) -> anyhow::Result<Entity> {
            Ok(Entity::new(self.path.clone()))
        }

        fn get(&self, id: &str, _include: &[String]) -> anyhow::Result<Option<Entity>> {
            if id == "m9" {
                let mut stored = Entity::new(self.path.clone());
                stored.set_id("m9");
                stored.set("media.url", json!("stored.jpg"));
                return Ok(Some(stored));
            }
            Ok(None)
        }

        fn find(
            &self,
            _code: &str,
            _include: &[String],
            _filters: &BTreeMap<String, Value>,
        ) -> anyhow::Result<Option<Entity>> {
            Ok(None)
        }

        fn search(&self, _query: &SearchQuery, _include: &[String]) -> anyhow::Result<SearchPage> {
            Ok(SearchPage {
                items: Vec::new(),
                total: 0,
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
            Ok(false)
        }

        fn delete_many(&self, _ids: &[String]) -> anyhow::Result<()> {
            Ok(())
        }

        fn create_address(&self) -> anyhow::Result<Entity> {
            Ok(Entity::new(self.path.join("address")?))
        }

        fn create_property(&self) -> anyhow::Result<Entity> {
            Ok(Entity::new(self.path.join("property")?))
        }

        fn create_link(&self, domain: &str) -> anyhow::Result<ListLink> {
            let lists = self.path.join("lists")?;
            let mut record = Entity::new(lists.clone());
            record.set(&lists.qualify("domain"), json!(domain));
            Ok(ListLink::new(record))
        }
    }

    struct StubFactory;

    impl ManagerFactory for StubFactory {
        fn manager(&self, path: &DomainPath) -> anyhow::Result<Arc<dyn Manager>> {
            Ok(Arc::new(StubManager {
                path: path.clone(),
            }))
        }
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(Arc::new(StubFactory), vec!["media".to_string()])
    }

    fn media_link(link_id: &str, link_type: &str, target_id: &str) -> ListLink {
        let lists = DomainPath::parse("product/lists").unwrap();
        let mut record = Entity::new(lists);
        record.set_id(link_id);
        record.set("product.lists.domain", json!("media"));
        record.set("product.lists.type", json!(link_type));
        record.set("product.lists.refid", json!(target_id));

        let mut target = Entity::new(DomainPath::parse("media").unwrap());
        target.set_id(target_id);
        target.set("media.url", json!(format!("{}.jpg", target_id)));
        ListLink::with_target(record, target)
    }

    fn customer_with_addresses(cities: &[&str]) -> Entity {
        let mut entity = Entity::new(DomainPath::parse("customer").unwrap());
        entity.set_id("c1");
        for (index, city) in cities.iter().enumerate() {
            let mut address = Entity::new(DomainPath::parse("customer/address").unwrap());
            address.set_id(&format!("a{}", index + 1));
            address.set("customer.address.city", json!(city));
            entity.addresses.push(address);
        }
        entity
    }

    fn payload(input: Value) -> Payload {
        Payload::parse(&DomainPath::parse("product").unwrap(), &input).unwrap()
    }

    #[test]
    fn test_surplus_addresses_dropped_and_ids_preserved() {
        let mut entity = customer_with_addresses(&["Berlin", "Hamburg", "Munich"]);
        let manager = StubManager::new("customer");
        let input = Payload::parse(
            &DomainPath::parse("customer").unwrap(),
            &json!({
                "address": [ { "city": "Bonn" }, { "city": "Hamburg" } ]
            }),
        )
        .unwrap();

        reconciler().apply(&manager, &mut entity, &input).unwrap();

        assert_eq!(entity.addresses.len(), 2);
        assert_eq!(entity.addresses[0].id(), Some("a1".to_string()));
        assert_eq!(entity.addresses[0].get_str("city"), Some("Bonn".to_string()));
        assert_eq!(entity.addresses[1].id(), Some("a2".to_string()));
    }

    #[test]
    fn test_resending_links_is_a_no_op_on_identity() {
        let mut entity = Entity::new(DomainPath::parse("product").unwrap());
        entity.set_id("p1");
        entity.links.push(media_link("L1", "default", "m1"));
        entity.links.push(media_link("L2", "download", "m2"));

        let manager = StubManager::new("product");
        let input = payload(json!({
            "lists": {
                "media": [
                    { "type": "default", "refid": "m1" },
                    { "type": "download", "refid": "m2" }
                ]
            }
        }));

        reconciler().apply(&manager, &mut entity, &input).unwrap();

        assert_eq!(entity.links.len(), 2);
        assert_eq!(entity.links[0].id(), Some("L1".to_string()));
        assert_eq!(entity.links[1].id(), Some("L2".to_string()));
        assert!(entity.links[0].target.is_some());
    }

    #[test]
    fn test_explicit_empty_clears_only_that_domain() {
        let mut entity = Entity::new(DomainPath::parse("product").unwrap());
        entity.set_id("p1");
        entity.links.push(media_link("L1", "default", "m1"));

        let mut text_record = Entity::new(DomainPath::parse("product/lists").unwrap());
        text_record.set_id("L9");
        text_record.set("product.lists.domain", json!("text"));
        entity.links.push(ListLink::new(text_record));

        let manager = StubManager::new("product");
        let input = payload(json!({ "lists": { "media": [] } }));

        reconciler().apply(&manager, &mut entity, &input).unwrap();

        assert_eq!(entity.links.len(), 1);
        assert_eq!(entity.links[0].domain(), Some("text".to_string()));
    }

    #[test]
    fn test_explicit_link_id_wins_over_positional_order() {
        let mut entity = Entity::new(DomainPath::parse("product").unwrap());
        entity.set_id("p1");
        entity.links.push(media_link("L1", "default", "m1"));
        entity.links.push(media_link("L2", "default", "m2"));

        let manager = StubManager::new("product");
        let input = payload(json!({
            "lists": {
                "media": [
                    { "id": "L2", "refid": "m2", "position": 0 },
                    { "id": "L1", "refid": "m1", "position": 1 }
                ]
            }
        }));

        reconciler().apply(&manager, &mut entity, &input).unwrap();

        assert_eq!(entity.links[0].id(), Some("L2".to_string()));
        assert_eq!(
            entity.links[0].record.get("position"),
            Some(&json!(0))
        );
        assert_eq!(entity.links[1].id(), Some("L1".to_string()));
    }

    #[test]
    fn test_unmatched_entries_create_links_with_domain_set() {
        let mut entity = Entity::new(DomainPath::parse("product").unwrap());
        entity.set_id("p1");
        entity.links.push(media_link("L1", "default", "m1"));

        let manager = StubManager::new("product");
        let input = payload(json!({
            "lists": {
                "media": [
                    { "type": "default", "refid": "m1" },
                    { "type": "default", "refid": "m3" }
                ]
            }
        }));

        reconciler().apply(&manager, &mut entity, &input).unwrap();

        assert_eq!(entity.links.len(), 2);
        assert_eq!(entity.links[0].id(), Some("L1".to_string()));
        assert_eq!(entity.links[1].id(), None);
        assert_eq!(entity.links[1].domain(), Some("media".to_string()));
        assert_eq!(entity.links[1].target_id(), Some("m3".to_string()));
    }

    #[test]
    fn test_nested_item_updates_only_present_keys() {
        let mut entity = Entity::new(DomainPath::parse("product").unwrap());
        entity.set_id("p1");

        let mut link = media_link("L1", "default", "m1");
        let target = link.target.as_mut().unwrap();
        let mut size = Entity::new(DomainPath::parse("media/property").unwrap());
        size.set_id("mp1");
        size.set("media.property.value", json!("1024"));
        target.properties.push(size);
        entity.links.push(link);

        let manager = StubManager::new("product");
        let input = payload(json!({
            "lists": {
                "media": [
                    { "id": "L1", "item": { "url": "new.jpg" } }
                ]
            }
        }));

        reconciler().apply(&manager, &mut entity, &input).unwrap();

        let target = entity.links[0].target.as_ref().unwrap();
        assert_eq!(target.get_str("url"), Some("new.jpg".to_string()));
        assert_eq!(target.properties.len(), 1);
        assert_eq!(target.properties[0].id(), Some("mp1".to_string()));
    }

    #[test]
    fn test_new_link_with_item_id_loads_the_stored_record() {
        let mut entity = Entity::new(DomainPath::parse("product").unwrap());
        entity.set_id("p1");

        let manager = StubManager::new("product");
        let input = payload(json!({
            "lists": {
                "media": [
                    { "item": { "id": "m9", "label": "manual" } }
                ]
            }
        }));

        reconciler().apply(&manager, &mut entity, &input).unwrap();

        let target = entity.links[0].target.as_ref().unwrap();
        assert_eq!(target.id(), Some("m9".to_string()));
        assert_eq!(target.get_str("url"), Some("stored.jpg".to_string()));
        assert_eq!(target.get_str("label"), Some("manual".to_string()));
    }
}
