//! # Souk Conversations Crate
//!
//! Buyer and seller conversations about marketplace listings: domain
//! entities, the conversation store, message ingress, read tracking and the
//! read-side queries used by the REST fallback.
//!
//! ## Architecture
//!
//! - **Entities**: Conversation, Message, Listing and inbox summaries
//! - **Repositories**: the [`ConversationStore`] trait and its SQLite implementation
//! - **Services**: [`MessageIngress`], [`ReadTracker`], [`ConversationQueries`]
//! - **Types**: errors
//! - **Utils**: input validation
//!
//! Services never publish events; callers turn their results into fan-out.

pub mod entities;
pub mod repositories;
pub mod services;
pub mod types;
pub mod utils;

pub use entities::{
    Conversation, ConversationSummary, Listing, ListingSummary, Message, Participant,
    ParticipantPair, SendMessage, ThreadKey,
};
pub use repositories::{ConversationStore, SqliteConversationStore};
pub use services::{
    ConversationQueries, ConversationServices, HistoryPage, MessageIngress, PreparedSend, ReadReceipt,
    ReadTracker, SendTarget, SentMessage,
};
pub use types::{ConversationError, ConversationResult};
