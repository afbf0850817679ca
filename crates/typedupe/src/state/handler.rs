//! Destination handler trait.
//!
//! The [`DestinationHandler`] is the only component that talks to the
//! destination. It runs the SQL a [`SqlGenerator`](crate::core::SqlGenerator)
//! produced and reads/writes the per-stream destination state.
//!
//! # Design Pattern
//!
//! Strategy: the orchestrator holds `Arc<dyn DestinationHandler<S>>` and
//! never knows which warehouse is behind it.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::core::{Sql, StreamConfig, StreamId};
use crate::error::Result;

use super::{DestinationInitialStatus, DestinationState};

/// Executes SQL and manages destination state for one destination.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the orchestrator calls `execute`
/// from many tasks at once.
///
/// # Timeouts
///
/// The orchestrator never times out a call. Statement-level timeouts are the
/// handler's responsibility.
#[async_trait]
pub trait DestinationHandler<S: DestinationState>: Send + Sync {
    /// Execute every transaction of `sql` in order.
    ///
    /// An empty batch is a no-op.
    async fn execute(&self, sql: &Sql) -> Result<()>;

    /// Inspect the destination for each stream.
    ///
    /// Must create the internal state table if it does not exist. Returns one
    /// status per input stream.
    async fn gather_initial_state(
        &self,
        streams: &[StreamConfig],
    ) -> Result<Vec<DestinationInitialStatus<S>>>;

    /// Persist the given states in one batch.
    async fn commit_destination_states(&self, states: &HashMap<StreamId, S>) -> Result<()>;
}
