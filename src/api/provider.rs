use std::sync::Arc;

use crate::api::operations::{check_access, DomainResolver, Operation, RequestContext};
use crate::config::{Action, ApiConfig, DomainSpec};
use crate::error::Result;
use crate::registry::{ArgDef, Args, Registry, TypeRef, Value};

/// Configuration introspection for domains whose records are backed by
/// pluggable providers, e.g. payment or delivery services.
pub struct ProviderResolver {
    config: Arc<ApiConfig>,
    registry: Arc<Registry>,
}

impl ProviderResolver {
    pub fn new(config: Arc<ApiConfig>, registry: Arc<Registry>) -> Self {
        Self { config, registry }
    }

    fn config_op(&self, domain: &DomainSpec, returns: TypeRef) -> Operation {
        let config = Arc::clone(&self.config);
        let registry = Arc::clone(&self.registry);
        let path = domain.path.clone();

        Operation::new(
            format!("get{}Config", domain.path.camel_name()),
            &format!(
                "Returns the configuration attributes the {} provider accepts",
                path.dotted()
            ),
            vec![
                ArgDef::new("provider", TypeRef::string(), "Provider name, decorators appended with \",\""),
                ArgDef::new("type", TypeRef::string(), "Item type the provider is used for"),
            ],
            returns,
            move |ctx: &RequestContext, args: &Args| {
                check_access(&config, &ctx.user, &path, Action::Get)?;
                let manager = registry.factory().manager(&path)?;
                let provider = args.str_required("provider")?;
                let kind = args.str("type")?;

                let attributes = manager.provider_config(&provider, kind.as_deref())?;
                Ok(Value::List(
                    attributes.into_iter().map(Value::Config).collect(),
                ))
            },
        )
    }
}

impl DomainResolver for ProviderResolver {
    fn queries(&self, domain: &DomainSpec) -> Result<Vec<Operation>> {
        let returns = TypeRef::list(TypeRef::named(
            &self.registry.config_output_type(&domain.path)?,
        ));
        Ok(vec![self.config_op(domain, returns)])
    }

    fn mutations(&self, _domain: &DomainSpec) -> Result<Vec<Operation>> {
        Ok(Vec::new())
    }
}
