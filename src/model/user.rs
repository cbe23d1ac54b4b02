use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identity of the caller an operation runs for, carried through every
/// resolver. Group membership is what permission checks test against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl UserContext {
    pub fn new(
        user_id: &str,
        user_name: &str,
        groups: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            groups: groups.into_iter().collect(),
        }
    }

    /// Context for internal jobs, member of the `admin` group.
    pub fn system() -> Self {
        Self::new("system", "System", ["admin".to_string()])
    }

    /// True when the caller holds at least one of the required groups.
    /// An empty requirement list denies: unconfigured operations stay closed.
    pub fn has_access(&self, required: &[String]) -> bool {
        required.iter().any(|group| self.groups.contains(group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_requires_group_overlap() {
        let user = UserContext::new("u1", "Editor", ["editor".to_string()]);
        assert!(user.has_access(&["admin".to_string(), "editor".to_string()]));
        assert!(!user.has_access(&["admin".to_string()]));
    }

    #[test]
    fn test_empty_requirement_denies() {
        let user = UserContext::system();
        assert!(!user.has_access(&[]));
    }
}
