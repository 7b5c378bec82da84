//! Database row types. These map directly to SQLite rows; the `TryFrom`
//! impls turn them into the wire models in `bazaar-types`.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use bazaar_types::models::{Listing, Message, OwnerSummary, User};

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub avatar: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub rating: f64,
    pub review_count: i64,
    pub created_at: String,
}

pub struct NewUser<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub location: Option<&'a str>,
    pub phone: Option<&'a str>,
}

/// A listing joined with its seller's summary and favorites count.
pub struct ListingRow {
    pub id: String,
    pub seller_id: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub condition: String,
    pub location: String,
    pub images: String,
    pub status: String,
    pub views: i64,
    pub rating: f64,
    pub rating_count: i64,
    pub created_at: String,
    pub updated_at: String,
    pub seller_name: String,
    pub seller_avatar: Option<String>,
    pub seller_rating: f64,
    pub seller_review_count: i64,
    pub favorites_count: i64,
}

/// Column values written by both insert and full-row update.
pub struct ListingFields<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub price: f64,
    pub category: &'a str,
    pub condition: &'a str,
    pub location: &'a str,
    pub images: &'a [String],
    pub status: &'a str,
}

/// Just enough of a conversation to check who may read it.
pub struct ConversationRow {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
}

/// A conversation from one user's point of view.
pub struct ConversationSummaryRow {
    pub id: String,
    pub listing_id: Option<String>,
    pub listing_title: Option<String>,
    pub updated_at: String,
    pub other_id: String,
    pub other_name: String,
    pub other_avatar: Option<String>,
    pub other_rating: f64,
    pub other_review_count: i64,
    pub unread_count: i64,
    pub last_message: Option<MessageRow>,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub read: bool,
    pub created_at: String,
}

/// Parses timestamps written by this crate (RFC 3339) and SQLite's own
/// `datetime('now')` format.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", value, e))
}

fn parse_id(value: &str) -> Result<Uuid> {
    value.parse().map_err(|e| anyhow!("Corrupt id '{}': {}", value, e))
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: parse_id(&row.id)?,
            name: row.name,
            email: row.email,
            avatar: row.avatar,
            location: row.location,
            phone: row.phone,
            bio: row.bio,
            rating: row.rating,
            review_count: row.review_count,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<ListingRow> for Listing {
    type Error = anyhow::Error;

    fn try_from(row: ListingRow) -> Result<Self> {
        let images: Vec<String> = serde_json::from_str(&row.images)
            .with_context(|| format!("Corrupt images on listing '{}'", row.id))?;

        Ok(Listing {
            id: parse_id(&row.id)?,
            title: row.title,
            description: row.description,
            price: row.price,
            category: row.category,
            condition: row.condition.parse()?,
            location: row.location,
            images,
            seller: OwnerSummary {
                id: parse_id(&row.seller_id)?,
                name: row.seller_name,
                avatar: row.seller_avatar,
                rating: row.seller_rating,
                review_count: row.seller_review_count,
            },
            status: row.status.parse()?,
            views: row.views,
            rating: row.rating,
            rating_count: row.rating_count,
            favorites_count: row.favorites_count,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_id(&row.id)?,
            conversation_id: parse_id(&row.conversation_id)?,
            sender_id: parse_id(&row.sender_id)?,
            recipient_id: parse_id(&row.recipient_id)?,
            content: row.content,
            read: row.read,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<ConversationSummaryRow> for bazaar_types::models::Conversation {
    type Error = anyhow::Error;

    fn try_from(row: ConversationSummaryRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            participant: OwnerSummary {
                id: parse_id(&row.other_id)?,
                name: row.other_name,
                avatar: row.other_avatar,
                rating: row.other_rating,
                review_count: row.other_review_count,
            },
            listing_id: row.listing_id.as_deref().map(parse_id).transpose()?,
            listing_title: row.listing_title,
            last_message: row.last_message.map(Message::try_from).transpose()?,
            unread_count: row.unread_count,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_timestamp_formats() {
        let rfc = parse_timestamp("2026-03-01T10:00:00.123456Z").unwrap();
        let sqlite = parse_timestamp("2026-03-01 10:00:00").unwrap();
        assert_eq!(rfc.timestamp(), sqlite.timestamp());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
