pub mod validation;

pub use validation::{normalize_content, validate_public_id};
