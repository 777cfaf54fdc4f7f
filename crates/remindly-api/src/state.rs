use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;

use remindly_gateway::dispatcher::Dispatcher;
use remindly_gateway::notifier::Notifier;

use crate::ledger::{Ledger, LedgerError};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub ledger: Ledger,
    pub dispatcher: Dispatcher,
    pub notifier: Notifier,
    /// Shared token for webhook handshake signatures.
    pub wechat_token: String,
    pub jwt_secret: String,
}

impl AppStateInner {
    /// Run a ledger operation off the async runtime.
    pub async fn ledger<F, T>(self: &Arc<Self>, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Ledger) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        tokio::task::spawn_blocking(move || f(&state.ledger))
            .await
            .map_err(|e| LedgerError::Storage(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
    }
}

/// Map a ledger failure to a response status. Storage details are logged,
/// never returned.
pub fn ledger_status(err: LedgerError) -> StatusCode {
    match err {
        LedgerError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Storage(e) => {
            error!("Ledger storage error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
