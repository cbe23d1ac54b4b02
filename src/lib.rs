pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod registry;
pub mod seed;
pub mod store;

pub use api::*;
pub use config::{Action, ApiConfig, DomainFeature, DomainSpec, ResourceGroups};
pub use error::{ApiError, Result};
pub use logic::{FilterEvaluator, Reconciler};
pub use model::*;
pub use registry::{ArgDef, Args, Registry, SearchItemKind, TypeDescriptor, TypeRef, Value};
pub use store::{Manager, ManagerFactory, MemoryStore, SearchPage};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::api::{OpKind, RequestContext, SchemaBuilder, Selection};
    use crate::model::UserContext;
    use crate::seed;

    #[test]
    fn test_demo_schema_serves_seeded_data() {
        let store = seed::demo_store().unwrap();
        let config = seed::demo_config().unwrap();
        let schema = SchemaBuilder::new(config, Arc::new(store))
            .build()
            .unwrap();

        let admin = RequestContext::new(UserContext::system());
        let response = schema.dispatch(
            &admin,
            OpKind::Query,
            "findProduct",
            &json!({ "code": "shirt-classic" }),
            &Selection::of(&["code", "label"]),
        );

        assert_eq!(
            response,
            json!({ "data": { "findProduct": {
                "code": "shirt-classic",
                "label": "Classic shirt",
            }}})
        );
    }

    #[test]
    fn test_demo_permissions_deny_editors_on_customers() {
        let store = seed::demo_store().unwrap();
        let config = seed::demo_config().unwrap();
        let schema = SchemaBuilder::new(config, Arc::new(store))
            .build()
            .unwrap();

        let editor = RequestContext::new(UserContext::new(
            "e1",
            "Editor",
            ["editor".to_string()],
        ));
        let response = schema.dispatch(
            &editor,
            OpKind::Query,
            "getCustomer",
            &json!({ "id": "c1" }),
            &Selection::of(&["id"]),
        );

        assert_eq!(
            response,
            json!({ "data": null, "errors": [{ "message": "forbidden" }] })
        );
    }
}
