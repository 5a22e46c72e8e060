pub mod http;
pub mod metrics;
pub mod startup;

pub use http::{create_router, ApiState};
pub use startup::{build_default_state, build_state, next_free_track_id, StartupError};
