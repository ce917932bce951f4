//! Which functions run a given package.

use std::sync::Arc;

use fnpkg_core::{ClientError, Function, ResourceClient};
use tracing::debug;

/// Query abstraction over "functions whose package reference names `package`".
#[async_trait::async_trait]
pub trait DependentQuery: Send + Sync {
    /// Dependents in list order; empty when nothing references the package.
    async fn functions_referencing(&self, package: &str) -> Result<Vec<Function>, ClientError>;
}

/// Lists every function and filters client-side on the package reference name.
pub struct ListFilterQuery {
    functions: Arc<dyn ResourceClient<Function>>,
}

impl ListFilterQuery {
    pub fn new(functions: Arc<dyn ResourceClient<Function>>) -> Self {
        Self { functions }
    }
}

#[async_trait::async_trait]
impl DependentQuery for ListFilterQuery {
    async fn functions_referencing(&self, package: &str) -> Result<Vec<Function>, ClientError> {
        let all = self.functions.list().await?;
        let total = all.len();
        let deps: Vec<Function> = all.into_iter().filter(|f| f.references(package)).collect();
        debug!(package = %package, total, dependents = deps.len(), "dependent lookup");
        Ok(deps)
    }
}
