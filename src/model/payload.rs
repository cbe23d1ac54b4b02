use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ApiError, Result};
use crate::model::path::DomainPath;

/// Keys with structural meaning at every payload level. They select
/// sub-collections and are never treated as field names.
const RESERVED_KEYS: [&str; 4] = ["address", "property", "lists", "item"];

/// Parsed save input for one entity.
///
/// Scalar keys are qualified with the payload's level during parsing, so a
/// `label` key under `product` becomes `product.label` and a `languageid`
/// key inside an address entry becomes `customer.address.languageid`.
/// The `Option` collections distinguish an absent key (leave the entity's
/// collection untouched) from a present empty one (delete all members).
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub path: DomainPath,
    pub values: BTreeMap<String, Value>,
    pub addresses: Option<Vec<Payload>>,
    pub properties: Option<Vec<Payload>>,
    pub lists: Option<BTreeMap<String, Vec<LinkEntry>>>,
}

/// One entry of a `lists` collection: field values for the link record
/// itself plus an optional nested payload for the referenced item.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkEntry {
    pub path: DomainPath,
    pub values: BTreeMap<String, Value>,
    pub item: Option<Payload>,
}

impl Payload {
    pub fn parse(path: &DomainPath, input: &Value) -> Result<Self> {
        let map = as_object(input, path.as_str())?;

        let mut payload = Payload {
            path: path.clone(),
            values: BTreeMap::new(),
            addresses: None,
            properties: None,
            lists: None,
        };

        for (key, value) in map {
            match key.as_str() {
                "address" => {
                    let sub = path.join("address")?;
                    payload.addresses = Some(parse_entries(&sub, value)?);
                }
                "property" => {
                    let sub = path.join("property")?;
                    payload.properties = Some(parse_entries(&sub, value)?);
                }
                "lists" => {
                    payload.lists = Some(parse_lists(path, value)?);
                }
                _ => {
                    payload.values.insert(path.qualify(key), value.clone());
                }
            }
        }

        Ok(payload)
    }

    pub fn id(&self) -> Option<String> {
        match self.values.get(&self.path.qualify("id"))? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Domains referenced by this payload, for eager loading before the
    /// merge. Walks nested link items as well, so saving a product whose
    /// payload touches media properties yields `media/property` too.
    pub fn refs(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        self.collect_refs(&mut out);
        out.into_iter().collect()
    }

    fn collect_refs(&self, out: &mut BTreeSet<String>) {
        if self.addresses.is_some() {
            out.insert(format!("{}/address", self.path));
        }
        if self.properties.is_some() {
            out.insert(format!("{}/property", self.path));
        }
        if let Some(lists) = &self.lists {
            for (domain, entries) in lists {
                out.insert(domain.clone());
                for entry in entries {
                    if let Some(item) = &entry.item {
                        item.collect_refs(out);
                    }
                }
            }
        }
    }
}

impl LinkEntry {
    fn parse(lists_path: &DomainPath, domain: &DomainPath, input: &Value) -> Result<Self> {
        let map = as_object(input, lists_path.as_str())?;

        let mut entry = LinkEntry {
            path: lists_path.clone(),
            values: BTreeMap::new(),
            item: None,
        };

        for (key, value) in map {
            if key == "item" {
                entry.item = Some(Payload::parse(domain, value)?);
            } else if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(ApiError::InvalidInput(format!(
                    "key \"{}\" is not allowed in a lists entry",
                    key
                )));
            } else {
                entry.values.insert(lists_path.qualify(key), value.clone());
            }
        }

        Ok(entry)
    }

    fn get_str(&self, name: &str) -> Option<String> {
        match self.values.get(&self.path.qualify(name))? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Explicit id of the link record to update, when the caller sent one.
    pub fn link_id(&self) -> Option<String> {
        self.get_str("id")
    }

    pub fn link_type(&self) -> String {
        self.get_str("type").unwrap_or_else(|| "default".to_string())
    }

    /// Id of the referenced record: explicit `refid`, falling back to the
    /// nested item payload's id.
    pub fn target_id(&self) -> Option<String> {
        self.get_str("refid")
            .or_else(|| self.item.as_ref().and_then(|i| i.id()))
    }
}

fn as_object<'a>(input: &'a Value, context: &str) -> Result<&'a serde_json::Map<String, Value>> {
    input.as_object().ok_or_else(|| {
        ApiError::InvalidInput(format!("entry for \"{}\" must be an object", context))
    })
}

fn parse_entries(path: &DomainPath, input: &Value) -> Result<Vec<Payload>> {
    let items = input.as_array().ok_or_else(|| {
        ApiError::InvalidInput(format!("entries for \"{}\" must be a list", path))
    })?;
    items.iter().map(|item| Payload::parse(path, item)).collect()
}

fn parse_lists(path: &DomainPath, input: &Value) -> Result<BTreeMap<String, Vec<LinkEntry>>> {
    let map = as_object(input, "lists")?;
    let lists_path = path.join("lists")?;
    let mut out = BTreeMap::new();

    for (domain, value) in map {
        let domain_path = DomainPath::parse(domain)?;
        let items = value.as_array().ok_or_else(|| {
            ApiError::InvalidInput(format!("lists entries for \"{}\" must be a list", domain))
        })?;
        let entries = items
            .iter()
            .map(|item| LinkEntry::parse(&lists_path, &domain_path, item))
            .collect::<Result<Vec<_>>>()?;
        out.insert(domain.clone(), entries);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(input: Value) -> Payload {
        let path = DomainPath::parse("product").unwrap();
        Payload::parse(&path, &input).unwrap()
    }

    #[test]
    fn test_scalar_keys_are_qualified() {
        let payload = parse(json!({ "label": "Shirt", "status": 1 }));
        assert_eq!(payload.values.get("product.label"), Some(&json!("Shirt")));
        assert_eq!(payload.values.get("product.status"), Some(&json!(1)));
        assert_eq!(payload.addresses, None);
        assert_eq!(payload.lists, None);
    }

    #[test]
    fn test_nested_levels_qualify_with_their_path() {
        let payload = parse(json!({
            "property": [ { "type": "size", "value": "XL" } ],
            "lists": {
                "media": [ { "type": "default", "item": { "url": "a.jpg" } } ]
            }
        }));

        let props = payload.properties.as_ref().unwrap();
        assert_eq!(
            props[0].values.get("product.property.value"),
            Some(&json!("XL"))
        );

        let lists = payload.lists.as_ref().unwrap();
        let entry = &lists["media"][0];
        assert_eq!(
            entry.values.get("product.lists.type"),
            Some(&json!("default"))
        );
        let item = entry.item.as_ref().unwrap();
        assert_eq!(item.values.get("media.url"), Some(&json!("a.jpg")));
    }

    #[test]
    fn test_absent_and_empty_collections_differ() {
        let absent = parse(json!({ "label": "x" }));
        assert!(absent.lists.is_none());

        let empty = parse(json!({ "lists": { "media": [] } }));
        let lists = empty.lists.unwrap();
        assert!(lists["media"].is_empty());
    }

    #[test]
    fn test_refs_walks_nested_items() {
        let payload = parse(json!({
            "address": [ { "city": "Berlin" } ],
            "lists": {
                "media": [ { "item": { "property": [ { "value": "1" } ] } } ],
                "text": [ {} ]
            }
        }));
        assert_eq!(
            payload.refs(),
            vec![
                "media".to_string(),
                "media/property".to_string(),
                "product/address".to_string(),
                "text".to_string(),
            ]
        );
    }

    #[test]
    fn test_target_id_falls_back_to_item_id() {
        let payload = parse(json!({
            "lists": { "media": [ { "item": { "id": "m7" } } ] }
        }));
        let entry = &payload.lists.unwrap()["media"][0];
        assert_eq!(entry.link_id(), None);
        assert_eq!(entry.target_id(), Some("m7".to_string()));
    }

    #[test]
    fn test_malformed_input_rejected() {
        let path = DomainPath::parse("product").unwrap();
        assert!(Payload::parse(&path, &json!([1, 2])).is_err());
        assert!(Payload::parse(&path, &json!({ "lists": [] })).is_err());
        assert!(Payload::parse(&path, &json!({ "lists": { "media": {} } })).is_err());
        assert!(Payload::parse(&path, &json!({ "lists": { "media": [ { "lists": {} } ] } })).is_err());
    }
}
