//! RelayPool, PublishScheduler, and Publisher: persistent outbound
//! connections, rate-aware publish queue, material-change gate,
//! sign-and-emit.

mod gate;
mod pool;
mod publisher;
mod scheduler;

pub use gate::is_material_change;
pub use pool::{AckOutcome, RelayPool};
pub use publisher::{Publisher, DEFAULT_ACK_TIMEOUT};
pub use scheduler::PublishScheduler;
