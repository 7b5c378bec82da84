use axum::{
    Extension, Json,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use bazaar_db::models::ListingFields;
use bazaar_db::{Database, ListingFilter};
use bazaar_types::api::{
    CreateListingRequest, DeleteResponse, FavoriteResponse, ListingQuery, PriceInput,
    RateListingRequest, RatingResponse, UpdateListingRequest,
};
use bazaar_types::models::{Listing, ListingSort, ListingStatus};

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiQuery};
use crate::middleware::AuthUser;
use crate::state::{AppState, run_blocking};
use crate::storage::read_images;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const MAX_IMAGES_PER_LISTING: usize = 10;

fn not_found() -> ApiError {
    ApiError::NotFound("Listing not found".into())
}

/// Malformed ids are reported the same way as missing ones.
fn parse_listing_id(id: &str) -> ApiResult<Uuid> {
    id.parse().map_err(|_| not_found())
}

/// Accepts JSON numbers and numeric strings; rejects negatives, NaN and infinities.
pub fn parse_price(price: &PriceInput) -> ApiResult<f64> {
    let value = match price {
        PriceInput::Number(n) => *n,
        PriceInput::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ApiError::Validation("Price must be a number".into()))?,
    };

    if !value.is_finite() {
        return Err(ApiError::Validation("Price must be a number".into()));
    }
    if value < 0.0 {
        return Err(ApiError::Validation("Price cannot be negative".into()));
    }
    Ok(value)
}

fn to_listings(rows: Vec<bazaar_db::models::ListingRow>) -> ApiResult<Vec<Listing>> {
    Ok(rows
        .into_iter()
        .map(Listing::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?)
}

fn load_listing(db: &Database, id: Uuid) -> ApiResult<Listing> {
    let row = db.get_listing(&id.to_string())?.ok_or_else(not_found)?;
    Ok(row.try_into()?)
}

/// Loads a listing for mutation by `requester`. Ownership is checked before
/// the soft-delete state so non-owners always get 403 for a stored row.
fn load_owned_listing(db: &Database, requester: Uuid, id: &str) -> ApiResult<Listing> {
    let listing_id = parse_listing_id(id)?;
    let (seller_id, status) = db
        .get_listing_owner(&listing_id.to_string())?
        .ok_or_else(not_found)?;

    if seller_id != requester.to_string() {
        warn!("User {} tried to modify listing {} owned by {}", requester, listing_id, seller_id);
        return Err(ApiError::Forbidden("Not authorized to modify this listing".into()));
    }
    if status == ListingStatus::Deleted.as_str() {
        return Err(not_found());
    }

    load_listing(db, listing_id)
}

/// Active listings matching the filters. Non-active listings never appear.
pub fn list_listings(db: &Database, query: &ListingQuery) -> ApiResult<Vec<Listing>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let page = query.page.unwrap_or(1).max(1);

    let filter = ListingFilter {
        statuses: vec![ListingStatus::Active],
        category: non_empty(query.category.as_deref()),
        search: non_empty(query.search.as_deref()),
        min_price: query.min_price,
        max_price: query.max_price,
        condition: query.condition,
        seller_id: query.seller.map(|id| id.to_string()),
        favorited_by: None,
        sort: ListingSort::parse_or_default(query.sort.as_deref()),
        limit: Some(limit),
        offset: (page - 1).saturating_mul(limit),
    };

    to_listings(db.list_listings(&filter)?)
}

fn check_image_count(count: usize) -> ApiResult<()> {
    if count > MAX_IMAGES_PER_LISTING {
        return Err(ApiError::Validation(format!(
            "A listing can have at most {MAX_IMAGES_PER_LISTING} images"
        )));
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Fetches a listing and counts the view. Deleted listings are not found.
pub fn get_listing(db: &Database, id: &str) -> ApiResult<Listing> {
    let listing_id = parse_listing_id(id)?;

    if !db.increment_listing_views(&listing_id.to_string())? {
        return Err(not_found());
    }

    load_listing(db, listing_id)
}

pub fn create_listing(db: &Database, owner: Uuid, req: CreateListingRequest) -> ApiResult<Listing> {
    let title = non_empty(req.title.as_deref());
    let description = non_empty(req.description.as_deref());
    let category = non_empty(req.category.as_deref());
    let location = non_empty(req.location.as_deref());

    let missing: Vec<&str> = [
        ("title", title.is_none()),
        ("description", description.is_none()),
        ("price", req.price.is_none()),
        ("category", category.is_none()),
        ("location", location.is_none()),
    ]
    .into_iter()
    .filter_map(|(name, absent)| absent.then_some(name))
    .collect();

    let (Some(title), Some(description), Some(price), Some(category), Some(location)) =
        (title, description, req.price.as_ref(), category, location)
    else {
        return Err(ApiError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    };

    let price = parse_price(price)?;
    check_image_count(req.images.len())?;

    let listing_id = Uuid::new_v4();
    db.insert_listing(
        &listing_id.to_string(),
        &owner.to_string(),
        &ListingFields {
            title: &title,
            description: &description,
            price,
            category: &category,
            condition: req.condition.unwrap_or_default().as_str(),
            location: &location,
            images: &req.images,
            status: ListingStatus::Active.as_str(),
        },
    )?;

    info!("User {} created listing {} ({})", owner, listing_id, title);
    load_listing(db, listing_id)
}

pub fn update_listing(
    db: &Database,
    requester: Uuid,
    id: &str,
    req: UpdateListingRequest,
) -> ApiResult<Listing> {
    let current = load_owned_listing(db, requester, id)?;

    let text = |new: Option<String>, old: String, field: &str| -> ApiResult<String> {
        match new {
            Some(value) => non_empty(Some(value.as_str()))
                .ok_or_else(|| ApiError::Validation(format!("{field} cannot be empty"))),
            None => Ok(old),
        }
    };

    let title = text(req.title, current.title, "Title")?;
    let description = text(req.description, current.description, "Description")?;
    let category = text(req.category, current.category, "Category")?;
    let location = text(req.location, current.location, "Location")?;
    let price = match &req.price {
        Some(price) => parse_price(price)?,
        None => current.price,
    };
    let images = req.images.unwrap_or(current.images);
    check_image_count(images.len())?;
    let status = match req.status {
        Some(ListingStatus::Deleted) => {
            return Err(ApiError::Validation("Use DELETE to remove a listing".into()));
        }
        Some(status) => status,
        None => current.status,
    };

    db.update_listing(
        &current.id.to_string(),
        &ListingFields {
            title: &title,
            description: &description,
            price,
            category: &category,
            condition: req.condition.unwrap_or(current.condition).as_str(),
            location: &location,
            images: &images,
            status: status.as_str(),
        },
    )?;

    load_listing(db, current.id)
}

/// Soft delete: the row stays with status `deleted`.
pub fn delete_listing(db: &Database, requester: Uuid, id: &str) -> ApiResult<DeleteResponse> {
    let listing = load_owned_listing(db, requester, id)?;

    db.set_listing_status(&listing.id.to_string(), ListingStatus::Deleted)?;

    info!("User {} removed listing {}", requester, listing.id);
    Ok(DeleteResponse {
        id: listing.id,
        message: "Listing removed".into(),
    })
}

/// Records the requester's 1–5 rating. Re-rating overwrites the previous value.
pub fn rate_listing(
    db: &Database,
    requester: Uuid,
    id: &str,
    req: RateListingRequest,
) -> ApiResult<RatingResponse> {
    let value = req
        .rating
        .ok_or_else(|| ApiError::Validation("Rating is required".into()))?;
    if !(1..=5).contains(&value) {
        return Err(ApiError::Validation("Rating must be between 1 and 5".into()));
    }

    let listing_id = parse_listing_id(id)?.to_string();
    let (seller_id, status) = db.get_listing_owner(&listing_id)?.ok_or_else(not_found)?;
    if status == ListingStatus::Deleted.as_str() {
        return Err(not_found());
    }
    if seller_id == requester.to_string() {
        return Err(ApiError::Validation("You cannot rate your own listing".into()));
    }

    let (rating, rating_count) = db.rate_listing(&listing_id, &requester.to_string(), value)?;

    Ok(RatingResponse {
        rating,
        rating_count,
    })
}

pub fn toggle_favorite(db: &Database, user_id: Uuid, id: &str) -> ApiResult<FavoriteResponse> {
    let listing_id = parse_listing_id(id)?.to_string();
    let (_, status) = db.get_listing_owner(&listing_id)?.ok_or_else(not_found)?;
    if status == ListingStatus::Deleted.as_str() {
        return Err(not_found());
    }

    let (favorited, favorites_count) = db.toggle_favorite(&listing_id, &user_id.to_string())?;

    Ok(FavoriteResponse {
        favorited,
        favorites_count,
    })
}

/// The caller's own listings in any status except deleted, newest first.
pub fn my_listings(db: &Database, user_id: Uuid) -> ApiResult<Vec<Listing>> {
    to_listings(db.list_listings(&ListingFilter {
        statuses: vec![ListingStatus::Active, ListingStatus::Sold],
        seller_id: Some(user_id.to_string()),
        ..Default::default()
    })?)
}

pub fn favorite_listings(db: &Database, user_id: Uuid) -> ApiResult<Vec<Listing>> {
    to_listings(db.list_listings(&ListingFilter {
        statuses: vec![ListingStatus::Active, ListingStatus::Sold],
        favorited_by: Some(user_id.to_string()),
        ..Default::default()
    })?)
}

/// Appends already-stored image URLs to an owned listing.
pub fn append_images(
    db: &Database,
    requester: Uuid,
    id: &str,
    urls: Vec<String>,
) -> ApiResult<Listing> {
    let current = load_owned_listing(db, requester, id)?;

    let mut images = current.images.clone();
    images.extend(urls);
    check_image_count(images.len())?;

    update_listing(
        db,
        requester,
        id,
        UpdateListingRequest {
            images: Some(images),
            ..Default::default()
        },
    )
}

// -- Handlers --

pub async fn list(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListingQuery>,
) -> ApiResult<Json<Vec<Listing>>> {
    let listings = run_blocking(&state, move |s| list_listings(&s.db, &query)).await?;
    Ok(Json(listings))
}

/// GET /listings/search?q=...  Accepts the same filters as GET /listings.
pub async fn search(
    state: State<AppState>,
    query: ApiQuery<ListingQuery>,
) -> ApiResult<Json<Vec<Listing>>> {
    list(state, query).await
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Listing>> {
    let listing = run_blocking(&state, move |s| get_listing(&s.db, &id)).await?;
    Ok(Json(listing))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ApiJson(req): ApiJson<CreateListingRequest>,
) -> ApiResult<impl IntoResponse> {
    let owner = auth.id();
    let listing = run_blocking(&state, move |s| create_listing(&s.db, owner, req)).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateListingRequest>,
) -> ApiResult<Json<Listing>> {
    let requester = auth.id();
    let listing = run_blocking(&state, move |s| update_listing(&s.db, requester, &id, req)).await?;
    Ok(Json(listing))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let requester = auth.id();
    let response = run_blocking(&state, move |s| delete_listing(&s.db, requester, &id)).await?;
    Ok(Json(response))
}

pub async fn rate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<RateListingRequest>,
) -> ApiResult<Json<RatingResponse>> {
    let requester = auth.id();
    let response = run_blocking(&state, move |s| rate_listing(&s.db, requester, &id, req)).await?;
    Ok(Json(response))
}

pub async fn favorite(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<FavoriteResponse>> {
    let user_id = auth.id();
    let response = run_blocking(&state, move |s| toggle_favorite(&s.db, user_id, &id)).await?;
    Ok(Json(response))
}

pub async fn mine(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Listing>>> {
    let user_id = auth.id();
    let listings = run_blocking(&state, move |s| my_listings(&s.db, user_id)).await?;
    Ok(Json(listings))
}

/// POST /listings/{id}/images: multipart, one or more image files.
pub async fn upload_images(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<Listing>> {
    let requester = auth.id();

    // Ownership and the image cap are checked before anything touches the disk
    let check_id = id.clone();
    let current =
        run_blocking(&state, move |s| load_owned_listing(&s.db, requester, &check_id)).await?;

    let images = read_images(multipart?).await?;
    check_image_count(current.images.len() + images.len())?;

    let mut urls = Vec::with_capacity(images.len());
    for image in &images {
        urls.push(state.storage.save_image(image).await?);
    }

    let listing = run_blocking(&state, move |s| append_images(&s.db, requester, &id, urls)).await?;
    Ok(Json(listing))
}
