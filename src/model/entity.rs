use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::path::DomainPath;

/// Which optional sub-collections a domain supports. Read once from the
/// manager when types and operations are built; never inferred at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    #[serde(default)]
    pub address: bool,
    #[serde(default)]
    pub property: bool,
    #[serde(default)]
    pub lists: bool,
    #[serde(default)]
    pub tree: bool,
}

/// A domain record in transit between a manager and the API layer.
///
/// Scalar values live in a map keyed by qualified names (`product.label`).
/// Sub-collections hold sub-aspect entities (`product/address` records and
/// so on) or typed links to other domains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    path: DomainPath,
    #[serde(default)]
    values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<ListLink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Entity>,
}

impl Entity {
    pub fn new(path: DomainPath) -> Self {
        Self {
            path,
            values: BTreeMap::new(),
            addresses: Vec::new(),
            properties: Vec::new(),
            links: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn path(&self) -> &DomainPath {
        &self.path
    }

    /// Looks a field up under its qualified name first, then the bare name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .get(&self.path.qualify(name))
            .or_else(|| self.values.get(name))
    }

    /// Like [`get`](Self::get), coercing strings and numbers to a string.
    pub fn get_str(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Stores a value under the key as given. Payload keys arrive already
    /// qualified; managers write qualified keys as well.
    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn apply(&mut self, values: impl IntoIterator<Item = (String, Value)>) {
        for (key, value) in values {
            self.values.insert(key, value);
        }
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn id(&self) -> Option<String> {
        self.get_str("id").filter(|s| !s.is_empty())
    }

    pub fn set_id(&mut self, id: &str) {
        let key = self.path.qualify("id");
        self.values.insert(key, Value::String(id.to_string()));
    }

    /// Parent node id for tree domains. Missing, null or empty means root.
    pub fn parent_id(&self) -> Option<String> {
        self.get_str("parentid").filter(|s| !s.is_empty())
    }

    /// Property sub-entities, optionally narrowed to the given types.
    pub fn property_items(&self, types: &[String]) -> Vec<&Entity> {
        self.properties
            .iter()
            .filter(|p| {
                types.is_empty()
                    || p.get_str("type")
                        .map(|t| types.contains(&t))
                        .unwrap_or(false)
            })
            .collect()
    }

    /// Links to the given target domain, optionally narrowed by link type
    /// and by the referenced item's type.
    pub fn link_items(&self, domain: &str, listtypes: &[String], types: &[String]) -> Vec<&ListLink> {
        self.links
            .iter()
            .filter(|l| l.domain().as_deref() == Some(domain))
            .filter(|l| listtypes.is_empty() || listtypes.contains(&l.link_type()))
            .filter(|l| {
                types.is_empty()
                    || l.target
                        .as_ref()
                        .and_then(|t| t.get_str("type"))
                        .map(|t| types.contains(&t))
                        .unwrap_or(false)
            })
            .collect()
    }
}

/// A typed many-to-many association from an entity to a record in another
/// domain. The link record is itself an entity of the `<path>/lists`
/// sub-aspect; `target` carries the referenced item when it was included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListLink {
    pub record: Entity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Entity>,
}

impl ListLink {
    pub fn new(record: Entity) -> Self {
        Self {
            record,
            target: None,
        }
    }

    pub fn with_target(record: Entity, target: Entity) -> Self {
        Self {
            record,
            target: Some(target),
        }
    }

    pub fn id(&self) -> Option<String> {
        self.record.id()
    }

    /// Target domain name stored on the link record.
    pub fn domain(&self) -> Option<String> {
        self.record.get_str("domain")
    }

    /// List type of the association, `default` when unset.
    pub fn link_type(&self) -> String {
        self.record
            .get_str("type")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Id of the referenced record: the stored `refid`, falling back to the
    /// attached target's own id.
    pub fn target_id(&self) -> Option<String> {
        self.record
            .get_str("refid")
            .filter(|s| !s.is_empty())
            .or_else(|| self.target.as_ref().and_then(|t| t.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn product() -> Entity {
        let mut e = Entity::new(DomainPath::parse("product").unwrap());
        e.set("product.id", json!("42"));
        e.set("product.label", json!("Test product"));
        e
    }

    #[test]
    fn test_get_prefers_qualified_over_bare() {
        let mut e = product();
        e.set("label", json!("bare"));
        assert_eq!(e.get("label"), Some(&json!("Test product")));
        assert_eq!(e.get("missing"), None);
    }

    #[test]
    fn test_id_coerces_numbers() {
        let mut e = Entity::new(DomainPath::parse("product").unwrap());
        e.set("product.id", json!(9007199254740993i64));
        assert_eq!(e.id(), Some("9007199254740993".to_string()));
    }

    #[test]
    fn test_parent_id_treats_empty_as_root() {
        let mut e = product();
        assert_eq!(e.parent_id(), None);
        e.set("product.parentid", json!(""));
        assert_eq!(e.parent_id(), None);
        e.set("product.parentid", json!("7"));
        assert_eq!(e.parent_id(), Some("7".to_string()));
    }

    #[test]
    fn test_link_items_filters_by_domain_and_types() {
        let lists_path = DomainPath::parse("product/lists").unwrap();
        let mut e = product();

        let mut record = Entity::new(lists_path.clone());
        record.set("product.lists.domain", json!("media"));
        record.set("product.lists.type", json!("download"));
        e.links.push(ListLink::new(record));

        let mut record = Entity::new(lists_path);
        record.set("product.lists.domain", json!("media"));
        e.links.push(ListLink::new(record));

        assert_eq!(e.link_items("media", &[], &[]).len(), 2);
        assert_eq!(
            e.link_items("media", &["download".to_string()], &[]).len(),
            1
        );
        assert_eq!(
            e.link_items("media", &["default".to_string()], &[]).len(),
            1
        );
        assert!(e.link_items("text", &[], &[]).is_empty());
    }

    #[test]
    fn test_target_id_falls_back_to_target_entity() {
        let lists_path = DomainPath::parse("product/lists").unwrap();
        let mut record = Entity::new(lists_path);
        record.set("product.lists.domain", json!("media"));
        let mut target = Entity::new(DomainPath::parse("media").unwrap());
        target.set("media.id", json!("m1"));
        let link = ListLink::with_target(record, target);
        assert_eq!(link.target_id(), Some("m1".to_string()));
    }
}
