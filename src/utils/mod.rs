pub mod ids;

pub use ids::{prefixed_id, random_index};
