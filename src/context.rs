//! Ambient request context
//!
//! The transport layer in front of the ingester authenticates requests and
//! resolves the tenant they act on; the ingester only consumes the result
//! through [`RequestContext`]. The context also carries a cancellation token
//! checked at cooperative checkpoints (operation entry and between
//! per-series query steps).

use tokio_util::sync::CancellationToken;

use crate::error::IngestError;

/// Per-request ambient state: tenant identity plus cancellation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    tenant_id: Option<String>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Context acting on behalf of `tenant_id`.
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            cancel: CancellationToken::new(),
        }
    }

    /// Context with no tenant. Operations requiring one fail with
    /// [`IngestError::NoTenant`].
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Attach an externally controlled cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The tenant this request acts on.
    pub fn tenant_id(&self) -> Result<&str, IngestError> {
        self.tenant_id.as_deref().ok_or(IngestError::NoTenant)
    }

    /// The cancellation token carried by this context.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the request has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
