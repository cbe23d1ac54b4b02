use serde::{Deserialize, Serialize};
use std::fmt;

/// Slash-delimited domain identifier, e.g. `product` or `product/lists`.
///
/// Segments are lowercase alphanumeric. Every derived name in the API comes
/// from this value: type names, operation names and qualified field keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainPath(String);

/// Raised when a path string is empty or contains characters outside
/// `[a-z0-9]` segments separated by single slashes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid domain path {0:?}")]
pub struct InvalidPath(pub String);

impl DomainPath {
    pub fn parse(raw: &str) -> Result<Self, InvalidPath> {
        if raw.is_empty() {
            return Err(InvalidPath(raw.to_string()));
        }
        for segment in raw.split('/') {
            if segment.is_empty()
                || !segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            {
                return Err(InvalidPath(raw.to_string()));
            }
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Appends a sub-aspect segment, e.g. `product` + `lists` -> `product/lists`.
    pub fn join(&self, segment: &str) -> Result<Self, InvalidPath> {
        Self::parse(&format!("{}/{}", self.0, segment))
    }

    /// Path with separators removed: `product/lists` -> `productlists`.
    /// Derived type names are built from this form.
    pub fn flat_name(&self) -> String {
        self.0.replace('/', "")
    }

    /// Path with each segment capitalized: `locale/site` -> `LocaleSite`.
    /// Operation names embed this form.
    pub fn camel_name(&self) -> String {
        self.segments()
            .map(|s| {
                let mut chars = s.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect()
    }

    /// Path with slashes replaced by dots: `product/lists` -> `product.lists`.
    pub fn dotted(&self) -> String {
        self.0.replace('/', ".")
    }

    /// Fully qualified field key: `product/lists` + `domain` -> `product.lists.domain`.
    pub fn qualify(&self, field: &str) -> String {
        format!("{}.{}", self.dotted(), field)
    }
}

impl fmt::Display for DomainPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DomainPath {
    type Error = InvalidPath;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DomainPath> for String {
    fn from(path: DomainPath) -> Self {
        path.0
    }
}

/// Strips any qualification from a field key: `product.lists.domain` -> `domain`.
/// Inverse of [`DomainPath::qualify`] for keys produced by it.
pub fn unqualify(code: &str) -> &str {
    match code.rfind('.') {
        Some(pos) => &code[pos + 1..],
        None => code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_accepts_nested_paths() {
        assert_eq!(DomainPath::parse("product").unwrap().as_str(), "product");
        assert_eq!(
            DomainPath::parse("order/base/address").unwrap().as_str(),
            "order/base/address"
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(DomainPath::parse("").is_err());
        assert!(DomainPath::parse("/product").is_err());
        assert!(DomainPath::parse("product/").is_err());
        assert!(DomainPath::parse("product//lists").is_err());
        assert!(DomainPath::parse("Product").is_err());
        assert!(DomainPath::parse("product.lists").is_err());
    }

    #[test]
    fn test_name_derivations() {
        let path = DomainPath::parse("product/lists").unwrap();
        assert_eq!(path.flat_name(), "productlists");
        assert_eq!(path.camel_name(), "ProductLists");
        assert_eq!(path.dotted(), "product.lists");

        let site = DomainPath::parse("locale/site").unwrap();
        assert_eq!(site.camel_name(), "LocaleSite");
    }

    #[test]
    fn test_qualify_unqualify_are_inverses() {
        let path = DomainPath::parse("product/lists").unwrap();
        let code = path.qualify("domain");
        assert_eq!(code, "product.lists.domain");
        assert_eq!(unqualify(&code), "domain");
        assert_eq!(unqualify("label"), "label");
    }

    #[test]
    fn test_join_builds_sub_aspects() {
        let path = DomainPath::parse("product").unwrap();
        assert_eq!(path.join("lists").unwrap().as_str(), "product/lists");
        assert!(path.join("Lists").is_err());
    }
}
