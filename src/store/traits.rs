use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::model::{
    AggregateQuery, AggregateRow, AttributeDescriptor, CapabilitySet, ConfigAttribute, DomainPath,
    Entity, ListLink, SearchQuery,
};

/// One slice of search results together with the total match count
/// before slicing.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub items: Vec<Entity>,
    pub total: u64,
}

/// Data access for one domain. The API layer builds types from
/// [`search_attributes`](Manager::search_attributes) and
/// [`capabilities`](Manager::capabilities) and never touches storage
/// through anything else.
///
/// The methods past `delete_many` only apply to domains whose capability
/// set enables them; their defaults report the missing support.
pub trait Manager: Send + Sync {
    fn path(&self) -> &DomainPath;

    fn capabilities(&self) -> CapabilitySet;

    fn search_attributes(&self) -> Vec<AttributeDescriptor>;

    /// New unsaved entity with domain defaults applied.
    fn create(&self) -> Result<Entity>;

    /// Fetches one entity by id, attaching the sub-collections named in
    /// `include` (`product/property`, `media`, ...).
    fn get(&self, id: &str, include: &[String]) -> Result<Option<Entity>>;

    /// Fetches the unique entity with the given code. Extra equality
    /// filters narrow the match for domains where codes repeat per type.
    fn find(
        &self,
        code: &str,
        include: &[String],
        filters: &BTreeMap<String, Value>,
    ) -> Result<Option<Entity>>;

    fn search(&self, query: &SearchQuery, include: &[String]) -> Result<SearchPage>;

    fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<AggregateRow>>;

    fn save(&self, entity: Entity) -> Result<Entity>;

    fn save_many(&self, entities: Vec<Entity>) -> Result<Vec<Entity>>;

    /// Returns false when nothing existed under the id.
    fn delete(&self, id: &str) -> Result<bool>;

    fn delete_many(&self, ids: &[String]) -> Result<()>;

    fn create_address(&self) -> Result<Entity> {
        Err(unsupported(self.path(), "addresses"))
    }

    fn create_property(&self) -> Result<Entity> {
        Err(unsupported(self.path(), "properties"))
    }

    /// New unsaved link record pointing at the given target domain.
    fn create_link(&self, domain: &str) -> Result<ListLink> {
        let _ = domain;
        Err(unsupported(self.path(), "lists"))
    }

    /// Inserts a node under `parent_id` (root when absent), placed before
    /// the sibling `ref_id` or appended when absent.
    fn insert_node(
        &self,
        entity: Entity,
        parent_id: Option<&str>,
        ref_id: Option<&str>,
    ) -> Result<Entity> {
        let _ = (entity, parent_id, ref_id);
        Err(unsupported(self.path(), "tree nodes"))
    }

    /// Moves a node below a new parent, placed before the sibling
    /// `ref_id` or appended when absent.
    fn move_node(
        &self,
        id: &str,
        parent_id: Option<&str>,
        target_parent_id: Option<&str>,
        ref_id: Option<&str>,
    ) -> Result<()> {
        let _ = (id, parent_id, target_parent_id, ref_id);
        Err(unsupported(self.path(), "tree nodes"))
    }

    /// Configuration options a provider of this domain understands.
    fn provider_config(&self, provider: &str, kind: Option<&str>) -> Result<Vec<ConfigAttribute>> {
        let _ = (provider, kind);
        Err(unsupported(self.path(), "provider configuration"))
    }
}

/// Hands out the manager responsible for a domain path. An unknown path
/// is an error, never a silently empty manager.
pub trait ManagerFactory: Send + Sync {
    fn manager(&self, path: &DomainPath) -> Result<Arc<dyn Manager>>;
}

fn unsupported(path: &DomainPath, what: &str) -> anyhow::Error {
    anyhow::anyhow!("domain \"{}\" does not support {}", path, what)
}
