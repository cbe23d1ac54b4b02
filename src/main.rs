use std::sync::Arc;

use entigraph::api::{OpKind, RequestContext, SchemaBuilder, Selection};
use entigraph::config::ApiConfig;
use entigraph::model::UserContext;
use entigraph::seed;
use serde_json::{json, Value as Json};

fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new().filter_level(LevelFilter::Info).init();

    println!("Entigraph: permission-checked queries over domain managers");

    // Environment and config file can override the demo defaults,
    // ENTIGRAPH_DEBUG=true puts internal detail into error bodies.
    let loaded = ApiConfig::load()?;
    let config = if loaded.domains.is_empty() {
        println!("No domains configured, exposing the demo catalog");
        let mut demo = seed::demo_config()?;
        demo.debug = loaded.debug;
        demo
    } else {
        loaded
    };

    let store = seed::demo_store()?;
    let schema = SchemaBuilder::new(config, Arc::new(store)).build()?;
    println!(
        "Schema ready: {} queries, {} mutations",
        schema.queries().count(),
        schema.mutations().count()
    );

    let editor = RequestContext::new(UserContext::new(
        "demo",
        "Demo Editor",
        ["editor".to_string()],
    ));

    show(
        "searchProducts",
        &schema.dispatch(
            &editor,
            OpKind::Query,
            "searchProducts",
            &json!({ "filter": { "eq": ["product.status", 1] }, "sort": ["product.code"] }),
            &Selection::new()
                .nested("items", Selection::of(&["id", "code", "label"]))
                .field("total"),
        ),
    )?;

    show(
        "getCatalogTree",
        &schema.dispatch(
            &editor,
            OpKind::Query,
            "getCatalogTree",
            &json!({}),
            &category_selection(),
        ),
    )?;

    let found = schema.dispatch(
        &editor,
        OpKind::Query,
        "findProduct",
        &json!({ "code": "cap-logo" }),
        &Selection::of(&["id", "label", "status"]),
    );
    show("findProduct", &found)?;

    // Bring the cap back into the assortment.
    if let Some(id) = found.pointer("/data/findProduct/id").and_then(Json::as_str) {
        show(
            "saveProduct",
            &schema.dispatch(
                &editor,
                OpKind::Mutation,
                "saveProduct",
                &json!({ "input": {
                    "id": id,
                    "label": "Logo cap (reissued)",
                    "status": 1,
                }}),
                &Selection::of(&["id", "label", "status"]),
            ),
        )?;
    }

    show(
        "aggregateProducts",
        &schema.dispatch(
            &editor,
            OpKind::Query,
            "aggregateProducts",
            &json!({ "key": ["product.status"] }),
            &Selection::of(&["key", "value"]),
        ),
    )?;

    show(
        "getServiceConfig",
        &schema.dispatch(
            &editor,
            OpKind::Query,
            "getServiceConfig",
            &json!({ "provider": "Standard,Compress" }),
            &Selection::of(&["code", "label", "type", "required"]),
        ),
    )?;

    // The customer domain is admin-only, an editor gets the error envelope.
    show(
        "searchCustomers as editor",
        &schema.dispatch(
            &editor,
            OpKind::Query,
            "searchCustomers",
            &json!({}),
            &Selection::new()
                .nested("items", Selection::of(&["id", "code"]))
                .field("total"),
        ),
    )?;

    Ok(())
}

/// Category fields down to the third level, matching the default
/// `getCatalogTree` depth.
fn category_selection() -> Selection {
    let leaf = Selection::of(&["id", "code", "label"]);
    let branch = Selection::of(&["id", "code", "label"]).nested("children", leaf);
    Selection::of(&["id", "code", "label"]).nested("children", branch)
}

fn show(name: &str, response: &Json) -> anyhow::Result<()> {
    println!("\n== {} ==", name);
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}
