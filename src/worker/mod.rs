//! Message processing: per-message lifecycles under subscription flow control.

mod context;
mod error;
mod flow;
mod lifecycle;

#[cfg(test)]
mod testing;

pub use context::WorkerContext;
pub use error::LifecycleError;
pub use flow::{FlowStats, SubscriptionFlowController};
pub use lifecycle::{
    AckPolicy, LifecycleOutcome, LifecycleState, MessageLifecycleController, Settlement,
};
