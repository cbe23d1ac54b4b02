use std::cmp::Ordering;

use serde_json::Value;

use crate::model::{Entity, FilterExpr, SortKey};

/// Evaluates filter expressions against in-memory entities.
///
/// Field references resolve like attribute lookups: the qualified key
/// first, then the bare name. Comparisons are loose across scalar
/// kinds because clients routinely send numbers as strings.
pub struct FilterEvaluator;

impl FilterEvaluator {
    pub fn matches(entity: &Entity, filter: &FilterExpr) -> bool {
        match filter {
            FilterExpr::All { all } => all.iter().all(|f| Self::matches(entity, f)),
            FilterExpr::Any { any } => any.iter().any(|f| Self::matches(entity, f)),
            FilterExpr::Not { not } => !Self::matches(entity, not),
            FilterExpr::Eq { eq: (field, want) } => {
                Self::field(entity, field).is_some_and(|have| loose_eq(&have, want))
            }
            FilterExpr::Ne { ne: (field, want) } => {
                !Self::field(entity, field).is_some_and(|have| loose_eq(&have, want))
            }
            FilterExpr::Gt { gt: (field, want) } => Self::ordered(entity, field, want, |o| {
                o == Ordering::Greater
            }),
            FilterExpr::Gte { gte: (field, want) } => Self::ordered(entity, field, want, |o| {
                o != Ordering::Less
            }),
            FilterExpr::Lt { lt: (field, want) } => Self::ordered(entity, field, want, |o| {
                o == Ordering::Less
            }),
            FilterExpr::Lte { lte: (field, want) } => Self::ordered(entity, field, want, |o| {
                o != Ordering::Greater
            }),
            FilterExpr::In { r#in: (field, wanted) } => Self::field(entity, field)
                .is_some_and(|have| wanted.iter().any(|want| loose_eq(&have, want))),
            FilterExpr::NotIn {
                not_in: (field, unwanted),
            } => !Self::field(entity, field)
                .is_some_and(|have| unwanted.iter().any(|want| loose_eq(&have, want))),
            FilterExpr::Contains {
                contains: (field, needle),
            } => Self::field(entity, field).is_some_and(|have| match have {
                Value::String(s) => s.contains(needle.as_str()),
                Value::Array(items) => items
                    .iter()
                    .any(|item| loose_eq(item, &Value::String(needle.clone()))),
                _ => false,
            }),
            FilterExpr::Exists { exists } => Self::field(entity, exists).is_some(),
            FilterExpr::NotExists { not_exists } => Self::field(entity, not_exists).is_none(),
        }
    }

    /// Sort comparator over a list of sort keys. Entities missing a sort
    /// field order before entities that carry it.
    pub fn compare(a: &Entity, b: &Entity, keys: &[SortKey]) -> Ordering {
        for key in keys {
            let left = Self::field(a, &key.field);
            let right = Self::field(b, &key.field);
            let ordering = match (&left, &right) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(l), Some(r)) => compare_values(l, r).unwrap_or(Ordering::Equal),
            };
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    fn field(entity: &Entity, name: &str) -> Option<Value> {
        entity.get(name).filter(|v| !v.is_null()).cloned()
    }

    fn ordered(entity: &Entity, field: &str, want: &Value, check: impl Fn(Ordering) -> bool) -> bool {
        Self::field(entity, field)
            .and_then(|have| compare_values(&have, want))
            .is_some_and(check)
    }
}

/// Equality across scalar kinds: strict JSON equality first, then a
/// numeric comparison when both sides parse as numbers, then string
/// forms. `1 == "1"` and `true == "true"` both hold.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x == y;
    }
    match (as_text(a), as_text(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (as_text(a), as_text(b)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DomainPath;
    use serde_json::json;

    fn product(values: Value) -> Entity {
        let mut entity = Entity::new(DomainPath::parse("product").unwrap());
        entity.apply(values.as_object().unwrap().clone());
        entity
    }

    #[test]
    fn test_qualified_and_bare_fields_match() {
        let entity = product(json!({ "product.label": "Blue Shirt", "product.status": 1 }));

        assert!(FilterEvaluator::matches(
            &entity,
            &FilterExpr::Eq {
                eq: ("product.label".to_string(), json!("Blue Shirt"))
            }
        ));
        assert!(FilterEvaluator::matches(
            &entity,
            &FilterExpr::Eq {
                eq: ("label".to_string(), json!("Blue Shirt"))
            }
        ));
    }

    #[test]
    fn test_numbers_compare_across_string_forms() {
        let entity = product(json!({ "product.status": "1" }));

        assert!(FilterEvaluator::matches(
            &entity,
            &FilterExpr::Eq {
                eq: ("status".to_string(), json!(1))
            }
        ));
        assert!(FilterEvaluator::matches(
            &entity,
            &FilterExpr::Gte {
                gte: ("status".to_string(), json!(1))
            }
        ));
        assert!(!FilterEvaluator::matches(
            &entity,
            &FilterExpr::Gt {
                gt: ("status".to_string(), json!(1))
            }
        ));
    }

    #[test]
    fn test_logical_composition() {
        let entity = product(json!({ "product.label": "Blue Shirt", "product.status": 1 }));

        let filter = FilterExpr::All {
            all: vec![
                FilterExpr::Contains {
                    contains: ("label".to_string(), "Shirt".to_string()),
                },
                FilterExpr::Not {
                    not: Box::new(FilterExpr::In {
                        r#in: ("status".to_string(), vec![json!(0), json!(2)]),
                    }),
                },
            ],
        };
        assert!(FilterEvaluator::matches(&entity, &filter));
    }

    #[test]
    fn test_exists_treats_null_as_absent() {
        let entity = product(json!({ "product.target": null, "product.label": "x" }));

        assert!(!FilterEvaluator::matches(
            &entity,
            &FilterExpr::Exists {
                exists: "target".to_string()
            }
        ));
        assert!(FilterEvaluator::matches(
            &entity,
            &FilterExpr::NotExists {
                not_exists: "target".to_string()
            }
        ));
    }

    #[test]
    fn test_sort_orders_missing_fields_first() {
        let a = product(json!({ "product.label": "A" }));
        let b = product(json!({ "product.label": "B", "product.position": 2 }));
        let c = product(json!({ "product.label": "C", "product.position": 1 }));

        let keys = vec![SortKey::parse("position")];
        let mut items = vec![b.clone(), a.clone(), c.clone()];
        items.sort_by(|x, y| FilterEvaluator::compare(x, y, &keys));

        let labels: Vec<_> = items
            .iter()
            .map(|e| e.get_str("label").unwrap_or_default())
            .collect();
        assert_eq!(labels, vec!["A", "C", "B"]);

        let keys = vec![SortKey::parse("-position")];
        items.sort_by(|x, y| FilterEvaluator::compare(x, y, &keys));
        let labels: Vec<_> = items
            .iter()
            .map(|e| e.get_str("label").unwrap_or_default())
            .collect();
        assert_eq!(labels, vec!["B", "C", "A"]);
    }
}
