//! Semaphore capacity reconciliation.
//!
//! A workflow engine keeps semaphore capacities in a ConfigMap and parks
//! workflows that cannot acquire one. Changing a capacity does not wake
//! those workflows by itself, so a reconciliation pass:
//!
//! 1. writes the new capacity into the record ([`CapacityRepository`])
//! 2. finds every workflow waiting on that semaphore ([`WaiterDiscovery`])
//! 3. pings each waiter so the engine re-evaluates it ([`WakeTrigger`])
//!
//! [`Reconciler`] runs the three steps in order.
//!
//! # Invariants
//!
//! - A capacity write touches exactly one key of the record
//! - A workflow appears in a wait set at most once
//! - One failed ping never prevents the remaining pings
//! - A written capacity is never rolled back

mod capacity;
mod error;
mod reconciler;
mod waiters;
mod wake;

pub use capacity::{CapacityRepository, CapacitySnapshot};
pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{ReconcileOutcome, ReconcileRequest, ReconciliationResult, Reconciler};
pub use waiters::{SemaphoreKey, WaitSet, WaiterDiscovery};
pub use wake::{PingToken, WakeReport, WakeTrigger, PING_LABEL};
