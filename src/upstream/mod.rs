pub mod forward;

pub use forward::{forward_request, ForwardError};
