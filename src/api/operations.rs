use std::fmt;

use crate::config::{Action, ApiConfig, DomainSpec};
use crate::error::{ApiError, Result};
use crate::model::{DomainPath, UserContext};
use crate::registry::{ArgDef, Args, TypeRef, Value};

/// Per-request state every resolver receives.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: UserContext,
}

impl RequestContext {
    pub fn new(user: UserContext) -> Self {
        Self { user }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Query,
    Mutation,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Query => f.write_str("query"),
            OpKind::Mutation => f.write_str("mutation"),
        }
    }
}

pub type OperationResolver = Box<dyn Fn(&RequestContext, &Args) -> Result<Value> + Send + Sync>;

/// One named operation of the schema: argument definitions, result type
/// and the resolver closure. The closure checks permissions before it
/// touches any manager.
pub struct Operation {
    pub name: String,
    pub description: String,
    pub args: Vec<ArgDef>,
    pub returns: TypeRef,
    pub resolver: OperationResolver,
}

impl Operation {
    pub fn new(
        name: String,
        description: &str,
        args: Vec<ArgDef>,
        returns: TypeRef,
        resolver: impl Fn(&RequestContext, &Args) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            description: description.to_string(),
            args,
            returns,
            resolver: Box::new(resolver),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("args", &self.args.len())
            .field("returns", &self.returns)
            .finish()
    }
}

/// Produces the operations one domain contributes to the schema. The
/// standard set covers every domain; tree and provider domains layer
/// more on top of it.
pub trait DomainResolver: Send + Sync {
    fn queries(&self, domain: &DomainSpec) -> Result<Vec<Operation>>;

    fn mutations(&self, domain: &DomainSpec) -> Result<Vec<Operation>>;
}

/// Grants or denies one operation class on one domain. Runs before the
/// manager is even looked up, so a denied caller causes no data access.
pub(crate) fn check_access(
    config: &ApiConfig,
    user: &UserContext,
    path: &DomainPath,
    action: Action,
) -> Result<()> {
    let groups = config.required_groups(path, action);
    if user.has_access(groups) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}
