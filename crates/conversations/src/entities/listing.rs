use serde::{Deserialize, Serialize};

/// Marketplace listing as far as conversations need to know about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub id: i64,
    pub public_id: String,
    pub owner_id: i64,
    pub title: String,
    pub price_cents: Option<i64>,
    pub image_url: Option<String>,
    pub active: bool,
}

impl Listing {
    pub fn summary(&self) -> ListingSummary {
        ListingSummary {
            id: self.public_id.clone(),
            title: self.title.clone(),
            price_cents: self.price_cents,
            image_url: self.image_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSummary {
    pub id: String,
    pub title: String,
    pub price_cents: Option<i64>,
    pub image_url: Option<String>,
}
