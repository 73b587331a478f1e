pub mod errors;

pub use errors::{ConversationError, ConversationResult};
