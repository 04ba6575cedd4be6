pub mod lease;
pub mod queue;

pub use lease::LeaseGuard;
pub use queue::{acquire_or_queue, WakeRegistry};
