use serde::{Deserialize, Serialize};

use super::{ListingSummary, Message};

/// The two users of a conversation, stored in ascending id order so that the
/// pair is unordered for lookup purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantPair {
    low: i64,
    high: i64,
}

impl ParticipantPair {
    /// Returns `None` when both sides are the same user.
    pub fn new(a: i64, b: i64) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }

    pub fn contains(&self, user_id: i64) -> bool {
        self.low == user_id || self.high == user_id
    }

    pub fn other(&self, user_id: i64) -> Option<i64> {
        if user_id == self.low {
            Some(self.high)
        } else if user_id == self.high {
            Some(self.low)
        } else {
            None
        }
    }
}

/// Identity of a thread before it has a row: one listing, one pair of users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub listing_id: i64,
    pub participants: ParticipantPair,
}

/// A thread between a listing owner and one prospective buyer.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: i64,
    pub public_id: String,
    pub listing_id: i64,
    pub participants: ParticipantPair,
    pub created_at: String,
    pub last_message_at: String,
}

impl Conversation {
    pub fn is_participant(&self, user_id: i64) -> bool {
        self.participants.contains(user_id)
    }

    pub fn other_participant(&self, user_id: i64) -> Option<i64> {
        self.participants.other(user_id)
    }

    pub fn thread_key(&self) -> ThreadKey {
        ThreadKey {
            listing_id: self.listing_id,
            participants: self.participants,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: Option<String>,
}

/// One row of a user's inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub listing: ListingSummary,
    pub other_participant: Participant,
    pub last_message: Option<Message>,
    pub unread_count: i64,
    pub last_message_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_order_independent() {
        assert_eq!(ParticipantPair::new(3, 9), ParticipantPair::new(9, 3));

        let pair = ParticipantPair::new(9, 3).unwrap();
        assert_eq!(pair.low(), 3);
        assert_eq!(pair.high(), 9);
    }

    #[test]
    fn pair_rejects_self_conversation() {
        assert!(ParticipantPair::new(4, 4).is_none());
    }

    #[test]
    fn other_participant_resolves_both_sides() {
        let pair = ParticipantPair::new(1, 2).unwrap();
        assert_eq!(pair.other(1), Some(2));
        assert_eq!(pair.other(2), Some(1));
        assert_eq!(pair.other(5), None);
        assert!(!pair.contains(5));
    }
}
