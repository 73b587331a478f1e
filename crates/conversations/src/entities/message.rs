use serde::{Deserialize, Serialize};

/// A persisted chat message.
///
/// Internal row ids never leave the process; on the wire a message is
/// addressed by public ids only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub public_id: String,
    #[serde(skip)]
    pub conversation_id: i64,
    #[serde(rename = "conversation_id")]
    pub conversation_public_id: String,
    #[serde(skip)]
    pub sender_id: i64,
    #[serde(rename = "sender_id")]
    pub sender_public_id: String,
    pub content: String,
    pub read: bool,
    pub created_at: String,
}

/// Input to message ingress. Exactly one of the two ids selects the shape:
/// a conversation id posts into an existing thread, a listing id starts or
/// continues the sender's thread about that listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendMessage {
    pub conversation_id: Option<String>,
    pub listing_id: Option<String>,
    pub content: String,
}

impl SendMessage {
    pub fn to_conversation(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(conversation_id.into()),
            listing_id: None,
            content: content.into(),
        }
    }

    pub fn about_listing(listing_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            listing_id: Some(listing_id.into()),
            content: content.into(),
        }
    }
}
