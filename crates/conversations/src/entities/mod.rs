//! Domain entities for marketplace conversations.

pub mod conversation;
pub mod listing;
pub mod message;

pub use conversation::{Conversation, ConversationSummary, Participant, ParticipantPair, ThreadKey};
pub use listing::{Listing, ListingSummary};
pub use message::{Message, SendMessage};
