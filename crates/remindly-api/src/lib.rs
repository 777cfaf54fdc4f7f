pub mod ledger;
pub mod middleware;
pub mod payments;
pub mod router;
pub mod state;
pub mod weixin;

pub use router::router;
pub use state::{AppState, AppStateInner};
