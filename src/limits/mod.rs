pub mod cost_gate;
pub mod rate_limit;
