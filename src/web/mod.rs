pub mod auth;
pub mod content;
pub mod in_flight;
pub mod moderation;
pub mod responses;
pub mod router;
pub mod state;
pub mod stream;
pub mod uploads;

pub use state::AppState;
