use axum::{
    Extension, Json,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
};
use tracing::info;
use uuid::Uuid;

use bazaar_db::{Database, ListingFilter};
use bazaar_types::api::{ChangePasswordRequest, PublicProfileResponse, UpdateProfileRequest};
use bazaar_types::models::{Listing, ListingStatus, User};

use crate::auth::{MIN_PASSWORD_LEN, hash_password, is_valid_email, normalize_email, verify_password};
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::listings::favorite_listings;
use crate::middleware::AuthUser;
use crate::state::{AppState, run_blocking};
use crate::storage::read_images;

/// Trims an optional text field; blank becomes `None`.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn load_user(db: &Database, id: Uuid) -> ApiResult<User> {
    let row = db
        .get_user_by_id(&id.to_string())?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(row.try_into()?)
}

/// Merges the provided fields into the profile. An empty string clears an
/// optional field; an absent one leaves it untouched.
pub fn update_user_profile(db: &Database, user: &User, req: UpdateProfileRequest) -> ApiResult<User> {
    let name = match req.name {
        Some(name) if name.trim().is_empty() => {
            return Err(ApiError::Validation("Name cannot be empty".into()));
        }
        Some(name) => name.trim().to_string(),
        None => user.name.clone(),
    };

    let email = match req.email {
        Some(email) => {
            let email = normalize_email(&email);
            if !is_valid_email(&email) {
                return Err(ApiError::Validation("A valid email is required".into()));
            }
            if email != user.email {
                if let Some(existing) = db.get_user_by_email(&email)? {
                    if existing.id != user.id.to_string() {
                        return Err(ApiError::Conflict("Email is already in use".into()));
                    }
                }
            }
            email
        }
        None => user.email.clone(),
    };

    let merge = |new: Option<String>, old: &Option<String>| match new {
        Some(value) => non_blank(Some(value)),
        None => old.clone(),
    };
    let location = merge(req.location, &user.location);
    let phone = merge(req.phone, &user.phone);
    let bio = merge(req.bio, &user.bio);

    db.update_user_profile(
        &user.id.to_string(),
        &name,
        &email,
        location.as_deref(),
        phone.as_deref(),
        bio.as_deref(),
    )
    .map_err(|e| ApiError::conflict_on_unique(e, "Email is already in use"))?;

    load_user(db, user.id)
}

pub fn change_user_password(db: &Database, user_id: Uuid, req: ChangePasswordRequest) -> ApiResult<()> {
    let row = db
        .get_user_by_id(&user_id.to_string())?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    if !verify_password(&req.current_password, &row.password)? {
        return Err(ApiError::Unauthorized("Current password is incorrect".into()));
    }
    if req.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let hash = hash_password(&req.new_password)?;
    db.set_user_password(&row.id, &hash)?;

    info!("User {} changed their password", user_id);
    Ok(())
}

pub fn set_avatar(db: &Database, user_id: Uuid, url: &str) -> ApiResult<User> {
    db.set_user_avatar(&user_id.to_string(), url)?;
    load_user(db, user_id)
}

/// A user's public page: profile without contact details plus active listings.
pub fn public_profile(db: &Database, id: &str) -> ApiResult<PublicProfileResponse> {
    let user_id: Uuid = id
        .parse()
        .map_err(|_| ApiError::NotFound("User not found".into()))?;
    let user = load_user(db, user_id)?;

    let listings = db
        .list_listings(&ListingFilter {
            statuses: vec![ListingStatus::Active],
            seller_id: Some(user_id.to_string()),
            ..Default::default()
        })?
        .into_iter()
        .map(Listing::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(PublicProfileResponse {
        user: user.into(),
        listings,
    })
}

// -- Handlers --

pub async fn profile(Extension(auth): Extension<AuthUser>) -> Json<User> {
    Json(auth.user)
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> ApiResult<Json<User>> {
    let user = run_blocking(&state, move |s| update_user_profile(&s.db, &auth.user, req)).await?;
    Ok(Json(user))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = auth.id();
    run_blocking(&state, move |s| change_user_password(&s.db, user_id, req)).await?;
    Ok(Json(serde_json::json!({ "message": "Password updated" })))
}

/// PUT /users/avatar: multipart with a single image file.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<User>> {
    let mut images = read_images(multipart?).await?;
    if images.len() != 1 {
        return Err(ApiError::Validation("Upload exactly one avatar image".into()));
    }
    let Some(image) = images.pop() else {
        return Err(ApiError::Validation("No image uploaded".into()));
    };

    let url = state.storage.save_image(&image).await?;
    let user_id = auth.id();
    let user = run_blocking(&state, move |s| set_avatar(&s.db, user_id, &url)).await?;
    Ok(Json(user))
}

pub async fn favorites(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Listing>>> {
    let user_id = auth.id();
    let listings = run_blocking(&state, move |s| favorite_listings(&s.db, user_id)).await?;
    Ok(Json(listings))
}

pub async fn get_public_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PublicProfileResponse>> {
    let profile = run_blocking(&state, move |s| public_profile(&s.db, &id)).await?;
    Ok(Json(profile))
}
