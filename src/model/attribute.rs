use serde::{Deserialize, Serialize};

/// Scalar kinds a domain attribute can carry. Everything a manager reports
/// that is not one of the known codes maps to `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Bool,
    Float,
    Int,
    String,
    Json,
}

impl ScalarKind {
    /// Maps a manager-reported storage type code to a scalar kind.
    pub fn from_code(code: &str) -> Self {
        match code {
            "bool" | "boolean" => ScalarKind::Bool,
            "float" => ScalarKind::Float,
            "int" | "integer" => ScalarKind::Int,
            "json" => ScalarKind::Json,
            _ => ScalarKind::String,
        }
    }
}

/// One searchable attribute of a domain, as reported by its manager.
///
/// Codes are fully qualified (`product.label`). Codes containing `:` denote
/// manager-internal filter functions and never become API fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub code: String,
    pub kind: ScalarKind,
    pub label: String,
}

impl AttributeDescriptor {
    pub fn new(code: &str, kind: ScalarKind, label: &str) -> Self {
        Self {
            code: code.to_string(),
            kind,
            label: label.to_string(),
        }
    }

    /// True for manager-internal filter codes like `product:has`.
    pub fn is_internal(&self) -> bool {
        self.code.contains(':')
    }
}

/// One configuration option of a service/payment/delivery provider.
/// The shape is fixed regardless of domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigAttribute {
    pub code: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}
