use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use models::RequestContext;

use super::{Operation, ServiceClient, ServiceHandler};
use crate::errors::{ServiceError, ServiceResult};

/// Dispatches straight to a handler living in this process.
pub struct InProcessClient {
    handler: Arc<dyn ServiceHandler>,
}

impl InProcessClient {
    pub fn new(handler: Arc<dyn ServiceHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl ServiceClient for InProcessClient {
    fn transport(&self) -> &'static str { "local" }

    async fn call(&self, op: Operation, ctx: &RequestContext) -> ServiceResult {
        // Run on its own task so a panicking handler surfaces as a 500 like it would over HTTP.
        let handler = Arc::clone(&self.handler);
        let ctx = ctx.clone();
        match tokio::spawn(async move { handler.handle(op, &ctx).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(service = self.handler.name(), error = %e, "in-process handler failed");
                Err(ServiceError::Unexpected(e.to_string()))
            }
        }
    }
}
