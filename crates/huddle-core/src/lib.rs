//! Durable messaging and notification pipelines plus the live session
//! registry they fan out through.
//!
//! Every write follows persist-then-notify: the store commit is the only step
//! a caller can observe failing, and live fan-out afterwards is a best-effort
//! hint clients reconcile against fetched history by id.

pub mod convert;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod notify;
pub mod registry;

use std::sync::Arc;

use huddle_db::Database;

pub use delivery::DeliveryCoordinator;
pub use error::DeliveryError;
pub use identity::{Identity, TokenValidator};
pub use notify::NotificationFanout;
pub use registry::{Fanout, FanoutOutcome, SessionRegistry};

/// Run a blocking store call off the async runtime, folding both the join
/// error and the store error into a persistence failure.
pub async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T, DeliveryError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| DeliveryError::Persistence(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
        .map_err(DeliveryError::from)
}
