use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::envelope::{InboundEnvelope, OutboundEnvelope};
use crate::error::CollaboratorError;
use crate::http::DEFAULT_UPSTREAM_TIMEOUT;
use crate::reply::ReplyGenerator;

/// Body the provider expects when we have nothing to say.
pub const ACK_BODY: &str = "success";

/// Sent instead of an AI answer when the reply service fails.
pub const FALLBACK_REPLY: &str = "Sorry, I can't reply to your message right now. Please try again later.";

/// What to send back for one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Reply with the bare acknowledgment token.
    Acknowledge,
    /// Reply with a text envelope.
    Reply(OutboundEnvelope),
}

/// Routes each inbound message to the reply service. Holds no per-request
/// state, so one instance is shared by all requests.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    replier: Arc<dyn ReplyGenerator>,
    timeout: Duration,
    fallback: String,
}

impl Dispatcher {
    pub fn new(replier: Arc<dyn ReplyGenerator>) -> Self {
        Self::with_timeout(replier, DEFAULT_UPSTREAM_TIMEOUT)
    }

    pub fn with_timeout(replier: Arc<dyn ReplyGenerator>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                replier,
                timeout,
                fallback: FALLBACK_REPLY.to_string(),
            }),
        }
    }

    /// Replace the apology text used when the reply service fails.
    pub fn with_fallback(self, fallback: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                replier: self.inner.replier.clone(),
                timeout: self.inner.timeout,
                fallback: fallback.into(),
            }),
        }
    }

    /// Handle one raw webhook body. Never fails: anything that cannot be
    /// answered is acknowledged so the provider does not redeliver it.
    pub async fn dispatch(&self, body: &[u8]) -> Dispatch {
        let doc = match std::str::from_utf8(body) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Webhook body is not UTF-8: {}", e);
                return Dispatch::Acknowledge;
            }
        };

        let inbound = match InboundEnvelope::decode(doc) {
            Ok(env) => env,
            Err(e) => {
                warn!("Undecodable webhook envelope: {}", e);
                return Dispatch::Acknowledge;
            }
        };

        let Some(text) = inbound.text() else {
            debug!(
                "Acknowledging {} message from {} without reply",
                inbound.message_type.as_str(),
                inbound.from_id
            );
            return Dispatch::Acknowledge;
        };

        info!("Text message from {} ({} chars)", inbound.from_id, text.chars().count());

        let content = match self.generate(text).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Reply service failed for {}: {}", inbound.from_id, e);
                self.inner.fallback.clone()
            }
        };

        Dispatch::Reply(OutboundEnvelope::reply_to(&inbound, content))
    }

    async fn generate(&self, text: &str) -> Result<String, CollaboratorError> {
        match tokio::time::timeout(self.inner.timeout, self.inner.replier.generate(text)).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(self.inner.timeout.as_millis())),
        }
    }
}
