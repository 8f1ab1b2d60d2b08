use std::sync::Arc;

use async_trait::async_trait;
use sealyard_core::{CallId, CallResult};

use crate::error::WireError;

/// Worker-side half of the result feed.
#[async_trait]
pub trait ResultReporter: Send + Sync {
    /// Deliver one call outcome to the scheduler. Resolves once the
    /// scheduler has accepted it.
    async fn report(&self, call_id: CallId, result: CallResult) -> Result<(), WireError>;
}

#[async_trait]
impl<T: ResultReporter + ?Sized> ResultReporter for Arc<T> {
    async fn report(&self, call_id: CallId, result: CallResult) -> Result<(), WireError> {
        (**self).report(call_id, result).await
    }
}
