pub mod admin;
pub mod auth;
pub mod jobs;
pub mod records;
pub mod responses;
pub mod router;
pub mod state;
pub mod status;
pub mod uploads;

pub use state::AppState;
