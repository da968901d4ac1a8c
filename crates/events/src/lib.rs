//! Per-job event fan-out.
//!
//! The [`JobBus`] carries progress and terminal payloads from the worker to
//! any number of consumers; [`relay`] pumps one subscription into one
//! consumer until the job finishes.

pub mod bus;
pub mod relay;

pub use bus::{JobBus, RecvError, Subscription};
pub use relay::{relay, RelayOutcome};
