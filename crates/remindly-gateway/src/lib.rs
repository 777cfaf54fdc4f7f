//! Messaging-provider side of the server: webhook signature checks, the
//! XML envelope codec, per-message dispatch to the AI reply service and
//! proactive pushes through the provider's customer-service API.

pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod http;
pub mod notifier;
pub mod reply;
pub mod signature;
