//! Per-request context handed to every source and sink call.

use std::sync::Arc;

use pagesync_types::protocol::Secrets;
use tokio_util::sync::CancellationToken;

/// Credentials and cancellation for one invocation.
///
/// Passed explicitly into each capability call so concurrent resource
/// runs never share ambient state.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub secrets: Arc<Secrets>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    #[must_use]
    pub fn new(secrets: Secrets, cancel: CancellationToken) -> Self {
        Self {
            secrets: Arc::new(secrets),
            cancel,
        }
    }

    /// Same credentials, cancelled when either this context or the
    /// returned token is cancelled.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            secrets: Arc::clone(&self.secrets),
            cancel: self.cancel.child_token(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
