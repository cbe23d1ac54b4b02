use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::{json, Value as Json};

use crate::config::{ApiConfig, DomainFeature, DomainSpec, ResourceGroups};
use crate::model::{
    AttributeDescriptor, CapabilitySet, ConfigAttribute, DomainPath, Entity, ScalarKind,
};
use crate::store::{ManagerFactory, MemoryStore};

/// Builds the demo store: a handful of shop-like domains with enough
/// records to exercise every operation the schema exposes.
pub fn demo_store() -> Result<MemoryStore> {
    let store = MemoryStore::new();
    declare_domains(&store)?;
    seed_products(&store)?;
    seed_catalog(&store)?;
    seed_attributes(&store)?;
    seed_customers(&store)?;
    seed_services(&store)?;
    Ok(store)
}

/// Configuration matching [`demo_store`]: the exposed domains, the
/// domains link fields are generated for, and the permission table.
pub fn demo_config() -> Result<ApiConfig> {
    let mut config = ApiConfig::default();
    config.lists_domains = vec![
        "attribute".to_string(),
        "media".to_string(),
        "product".to_string(),
    ];
    config.domains = vec![
        DomainSpec::new(DomainPath::parse("product")?),
        DomainSpec::with_features(DomainPath::parse("catalog")?, [DomainFeature::Tree]),
        DomainSpec::new(DomainPath::parse("media")?),
        DomainSpec::with_features(DomainPath::parse("attribute")?, [DomainFeature::TypedFind]),
        DomainSpec::new(DomainPath::parse("customer")?),
        DomainSpec::with_features(DomainPath::parse("service")?, [DomainFeature::Provider]),
    ];

    let open = ResourceGroups {
        get: groups(&["admin", "editor"]),
        save: groups(&["admin", "editor"]),
        delete: groups(&["admin"]),
    };
    for domain in ["product", "catalog", "media", "attribute", "service"] {
        config.resource.insert(domain.to_string(), open.clone());
    }
    config
        .resource
        .insert("customer".to_string(), ResourceGroups::all(&["admin"]));
    Ok(config)
}

fn declare_domains(store: &MemoryStore) -> Result<()> {
    store.declare(
        "product",
        vec![
            attr("product.code", ScalarKind::String, "Product code"),
            attr("product.label", ScalarKind::String, "Product label"),
            attr("product.type", ScalarKind::String, "Product type"),
            attr("product.status", ScalarKind::Int, "Product status"),
        ],
        CapabilitySet {
            property: true,
            lists: true,
            ..CapabilitySet::default()
        },
    )?;
    store.declare(
        "catalog",
        vec![
            attr("catalog.code", ScalarKind::String, "Category code"),
            attr("catalog.label", ScalarKind::String, "Category label"),
            attr("catalog.status", ScalarKind::Int, "Category status"),
        ],
        CapabilitySet {
            tree: true,
            lists: true,
            ..CapabilitySet::default()
        },
    )?;
    store.declare(
        "media",
        vec![
            attr("media.url", ScalarKind::String, "File URL"),
            attr("media.label", ScalarKind::String, "Media label"),
            attr("media.mimetype", ScalarKind::String, "Mime type"),
            attr("media.status", ScalarKind::Int, "Media status"),
        ],
        CapabilitySet {
            property: true,
            ..CapabilitySet::default()
        },
    )?;
    store.declare(
        "attribute",
        vec![
            attr("attribute.code", ScalarKind::String, "Attribute code"),
            attr("attribute.label", ScalarKind::String, "Attribute label"),
            attr("attribute.type", ScalarKind::String, "Attribute type"),
            attr("attribute.domain", ScalarKind::String, "Domain the attribute belongs to"),
            attr("attribute.status", ScalarKind::Int, "Attribute status"),
        ],
        CapabilitySet {
            property: true,
            ..CapabilitySet::default()
        },
    )?;
    store.declare(
        "customer",
        vec![
            attr("customer.code", ScalarKind::String, "Login name"),
            attr("customer.label", ScalarKind::String, "Display name"),
            attr("customer.status", ScalarKind::Int, "Account status"),
        ],
        CapabilitySet {
            address: true,
            property: true,
            lists: true,
            ..CapabilitySet::default()
        },
    )?;
    store.declare(
        "service",
        vec![
            attr("service.code", ScalarKind::String, "Service code"),
            attr("service.label", ScalarKind::String, "Service label"),
            attr("service.type", ScalarKind::String, "Service type"),
            attr("service.provider", ScalarKind::String, "Provider chain"),
            attr("service.status", ScalarKind::Int, "Service status"),
        ],
        CapabilitySet::default(),
    )?;
    Ok(())
}

fn seed_products(store: &MemoryStore) -> Result<()> {
    let product = DomainPath::parse("product")?;
    let products = store.manager(&product)?;

    let mut shirt = entity(
        &product,
        &[
            ("code", json!("shirt-classic")),
            ("label", json!("Classic shirt")),
            ("type", json!("default")),
            ("status", json!(1)),
        ],
    );
    let mut size = entity(
        &product.join("property")?,
        &[("type", json!("size")), ("value", json!("XL"))],
    );
    size.set("product.property.languageid", Json::Null);
    shirt.properties.push(size);

    let mut link = products.create_link("media")?;
    link.record.set("product.lists.type", json!("default"));
    link.target = Some(entity(
        &DomainPath::parse("media")?,
        &[
            ("url", json!("images/shirt-classic.jpg")),
            ("label", json!("Classic shirt front")),
            ("mimetype", json!("image/jpeg")),
            ("status", json!(1)),
        ],
    ));
    shirt.links.push(link);
    products.save(shirt)?;

    products.save(entity(
        &product,
        &[
            ("code", json!("jeans-slim")),
            ("label", json!("Slim jeans")),
            ("type", json!("default")),
            ("status", json!(1)),
        ],
    ))?;
    products.save(entity(
        &product,
        &[
            ("code", json!("cap-logo")),
            ("label", json!("Logo cap")),
            ("type", json!("default")),
            ("status", json!(0)),
        ],
    ))?;
    Ok(())
}

fn seed_catalog(store: &MemoryStore) -> Result<()> {
    let catalog = DomainPath::parse("catalog")?;
    let catalogs = store.manager(&catalog)?;
    let products = store.manager(&DomainPath::parse("product")?)?;

    let node = |code: &str, label: &str| {
        entity(
            &catalog,
            &[
                ("code", json!(code)),
                ("label", json!(label)),
                ("status", json!(1)),
            ],
        )
    };

    let root = catalogs.insert_node(node("home", "Home"), None, None)?;
    let root_id = id_of(&root)?;
    catalogs.insert_node(node("women", "Women"), Some(&root_id), None)?;
    let men = catalogs.insert_node(node("men", "Men"), Some(&root_id), None)?;
    let men_id = id_of(&men)?;
    let mut shirts = catalogs.insert_node(node("shirts", "Shirts"), Some(&men_id), None)?;

    // File the classic shirt under its category.
    if let Some(product) = products.find("shirt-classic", &[], &BTreeMap::new())? {
        let mut link = catalogs.create_link("product")?;
        link.record.set("catalog.lists.type", json!("default"));
        link.record.set("catalog.lists.refid", json!(id_of(&product)?));
        shirts.links.push(link);
        catalogs.save(shirts)?;
    }
    Ok(())
}

fn seed_attributes(store: &MemoryStore) -> Result<()> {
    let attribute = DomainPath::parse("attribute")?;
    let attributes = store.manager(&attribute)?;
    for (code, kind, label) in [
        ("blue", "color", "Blue"),
        ("red", "color", "Red"),
        ("xl", "size", "XL"),
    ] {
        attributes.save(entity(
            &attribute,
            &[
                ("code", json!(code)),
                ("type", json!(kind)),
                ("label", json!(label)),
                ("domain", json!("product")),
                ("status", json!(1)),
            ],
        ))?;
    }
    Ok(())
}

fn seed_customers(store: &MemoryStore) -> Result<()> {
    let customer = DomainPath::parse("customer")?;
    let customers = store.manager(&customer)?;

    let mut demo = entity(
        &customer,
        &[
            ("code", json!("demo@example.com")),
            ("label", json!("Demo Customer")),
            ("status", json!(1)),
        ],
    );
    demo.addresses.push(entity(
        &customer.join("address")?,
        &[
            ("firstname", json!("Demo")),
            ("lastname", json!("Customer")),
            ("address1", json!("Example Road 1")),
            ("postal", json!("20095")),
            ("city", json!("Hamburg")),
            ("countryid", json!("DE")),
            ("languageid", json!("de")),
            ("email", json!("demo@example.com")),
        ],
    ));
    customers.save(demo)?;
    Ok(())
}

fn seed_services(store: &MemoryStore) -> Result<()> {
    let service = DomainPath::parse("service")?;
    let services = store.manager(&service)?;
    services.save(entity(
        &service,
        &[
            ("code", json!("delivery-std")),
            ("label", json!("Standard delivery")),
            ("type", json!("delivery")),
            ("provider", json!("Standard")),
            ("status", json!(1)),
        ],
    ))?;

    store.set_provider_config(
        "service",
        "Standard",
        vec![
            config_option("standard.project", "Project identifier", "string", true),
            config_option("standard.url", "Endpoint URL", "string", false),
        ],
    )?;
    store.set_provider_config(
        "service",
        "Compress",
        vec![config_option(
            "compress.level",
            "Compression level",
            "integer",
            false,
        )],
    )?;
    Ok(())
}

fn attr(code: &str, kind: ScalarKind, label: &str) -> AttributeDescriptor {
    AttributeDescriptor::new(code, kind, label)
}

fn entity(path: &DomainPath, values: &[(&str, Json)]) -> Entity {
    let mut entity = Entity::new(path.clone());
    for (field, value) in values {
        entity.set(&path.qualify(field), value.clone());
    }
    entity
}

fn id_of(entity: &Entity) -> Result<String> {
    entity
        .id()
        .ok_or_else(|| anyhow::anyhow!("seeded entity has no id"))
}

fn groups(names: &[&str]) -> Vec<String> {
    names.iter().map(|g| g.to_string()).collect()
}

fn config_option(code: &str, label: &str, kind: &str, required: bool) -> ConfigAttribute {
    ConfigAttribute {
        code: code.to_string(),
        label: label.to_string(),
        kind: kind.to_string(),
        required,
        default: None,
    }
}
