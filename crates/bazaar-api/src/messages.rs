use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use bazaar_db::Database;
use bazaar_types::api::{SendMessageRequest, UnreadCountResponse};
use bazaar_types::models::{Conversation, ListingStatus, Message};

use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::middleware::AuthUser;
use crate::state::{AppState, run_blocking};

pub const MAX_MESSAGE_LEN: usize = 5000;

pub fn send_message(db: &Database, sender: Uuid, req: SendMessageRequest) -> ApiResult<Message> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(ApiError::Validation("Message content is required".into()));
    }
    if content.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::Validation(format!(
            "Messages are limited to {MAX_MESSAGE_LEN} characters"
        )));
    }
    if req.recipient_id == sender {
        return Err(ApiError::Validation("You cannot message yourself".into()));
    }

    let recipient_id = req.recipient_id.to_string();
    if db.get_user_by_id(&recipient_id)?.is_none() {
        return Err(ApiError::NotFound("Recipient not found".into()));
    }

    let listing_id = req.listing_id.map(|id| id.to_string());
    if let Some(listing_id) = &listing_id {
        match db.get_listing_owner(listing_id)? {
            Some((_, status)) if status != ListingStatus::Deleted.as_str() => {}
            _ => return Err(ApiError::NotFound("Listing not found".into())),
        }
    }

    let row = db.append_message(
        &Uuid::new_v4().to_string(),
        &Uuid::new_v4().to_string(),
        &sender.to_string(),
        &recipient_id,
        listing_id.as_deref(),
        content,
    )?;

    Ok(row.try_into()?)
}

pub fn list_conversations(db: &Database, user_id: Uuid) -> ApiResult<Vec<Conversation>> {
    Ok(db
        .conversations_for_user(&user_id.to_string())?
        .into_iter()
        .map(Conversation::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?)
}

/// Messages of a conversation, oldest first. Marks the ones addressed to
/// `user_id` as read.
pub fn open_conversation(db: &Database, user_id: Uuid, id: &str) -> ApiResult<Vec<Message>> {
    let not_found = || ApiError::NotFound("Conversation not found".into());
    let conversation_id: Uuid = id.parse().map_err(|_| not_found())?;
    let conversation = db
        .get_conversation(&conversation_id.to_string())?
        .ok_or_else(not_found)?;

    let me = user_id.to_string();
    if conversation.user_a != me && conversation.user_b != me {
        warn!("User {} tried to read conversation {}", user_id, conversation.id);
        return Err(ApiError::Forbidden("Not a participant in this conversation".into()));
    }

    let marked = db.mark_conversation_read(&conversation.id, &me)?;
    if marked > 0 {
        info!("Marked {} messages read in {}", marked, conversation.id);
    }

    Ok(db
        .get_conversation_messages(&conversation.id)?
        .into_iter()
        .map(Message::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?)
}

// -- Handlers --

pub async fn send(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let sender = auth.id();
    let message = run_blocking(&state, move |s| send_message(&s.db, sender, req)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn conversations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Conversation>>> {
    let user_id = auth.id();
    let conversations = run_blocking(&state, move |s| list_conversations(&s.db, user_id)).await?;
    Ok(Json(conversations))
}

pub async fn conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    let user_id = auth.id();
    let messages = run_blocking(&state, move |s| open_conversation(&s.db, user_id, &id)).await?;
    Ok(Json(messages))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<UnreadCountResponse>> {
    let user_id = auth.id().to_string();
    let count = run_blocking(&state, move |s| Ok(s.db.unread_message_count(&user_id)?)).await?;
    Ok(Json(UnreadCountResponse { count }))
}
