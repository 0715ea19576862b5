//! Account Services
//!
//! Business logic between the HTTP layer and storage.

mod auth;
mod profile;
mod sweep;

pub use auth::{AuthService, RESET_REQUESTED_MESSAGE};
pub use profile::ProfileService;
pub use sweep::{ExpirySweeper, SweepReport};
