mod auth;
mod dashboard;

pub use auth::{login, logout};
pub use dashboard::dashboard;
