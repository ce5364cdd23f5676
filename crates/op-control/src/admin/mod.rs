//! Admin control-plane surface (spec §4.9).

mod config;
mod guard;
mod handlers;
mod state;

pub use config::{AdminConfig, ConfigIssue, ConfigSeverity};
pub use guard::{actor_info, AdminGuard};
pub use handlers::router;
pub use state::{hash_token, AppState};
