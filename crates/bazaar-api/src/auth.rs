use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};
use uuid::Uuid;

use bazaar_db::Database;
use bazaar_db::models::NewUser;
use bazaar_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use bazaar_types::models::User;

use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::middleware::AuthUser;
use crate::state::{AppState, run_blocking};
use crate::users::non_blank;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Signs and checks HS256 bearer tokens. The only claim besides the
/// timestamps is the user id.
pub struct TokenIssuer {
    secret: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.issue_at(user_id, Utc::now())
    }

    /// Issues a token as if it had been signed at `issued_at`.
    pub fn issue_at(&self, user_id: Uuid, issued_at: DateTime<Utc>) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user_id,
            iat: issued_at.timestamp() as usize,
            exp: (issued_at + self.ttl).timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }

    pub fn decode(&self, token: &str) -> ApiResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            warn!("Rejected token: {}", e);
            ApiError::Unauthorized("Token is not valid".into())
        })?;

        Ok(token_data.claims)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !email.contains(' '),
        None => false,
    }
}

pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// Argon2 verification compares in constant time.
pub fn verify_password(password: &str, hash: &str) -> ApiResult<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Stored hash unreadable: {}", e))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid credentials".into())
}

pub fn register_user(
    db: &Database,
    tokens: &TokenIssuer,
    req: RegisterRequest,
) -> ApiResult<AuthResponse> {
    let name = req.name.trim();
    let email = normalize_email(&req.email);

    if name.is_empty() {
        return Err(ApiError::Validation("Name is required".into()));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::Validation("A valid email is required".into()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    if db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::Conflict("User already exists".into()));
    }

    let password_hash = hash_password(&req.password)?;
    let user_id = Uuid::new_v4();
    let id = user_id.to_string();
    let location = non_blank(req.location);
    let phone = non_blank(req.phone);

    db.create_user(&NewUser {
        id: &id,
        name,
        email: &email,
        password_hash: &password_hash,
        location: location.as_deref(),
        phone: phone.as_deref(),
    })
    .map_err(|e| ApiError::conflict_on_unique(e, "User already exists"))?;

    let user: User = db
        .get_user_by_id(&id)?
        .ok_or_else(|| anyhow::anyhow!("User {} missing right after insert", id))?
        .try_into()?;

    let token = tokens.issue(user_id)?;

    info!("Registered user {} <{}>", user.id, user.email);
    Ok(AuthResponse { token, user })
}

pub fn login_user(db: &Database, tokens: &TokenIssuer, req: LoginRequest) -> ApiResult<AuthResponse> {
    let email = normalize_email(&req.email);

    let row = db.get_user_by_email(&email)?.ok_or_else(invalid_credentials)?;

    if !verify_password(&req.password, &row.password)? {
        warn!("Failed login for {}", email);
        return Err(invalid_credentials());
    }

    let user: User = row.try_into()?;
    let token = tokens.issue(user.id)?;

    Ok(AuthResponse { token, user })
}

/// Resolves a bearer token to the user it names.
pub fn verify_token(db: &Database, tokens: &TokenIssuer, token: &str) -> ApiResult<User> {
    let claims = tokens.decode(token)?;

    let row = db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or_else(|| ApiError::Unauthorized("User no longer exists".into()))?;

    Ok(row.try_into()?)
}

// -- Handlers --

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = run_blocking(&state, move |s| register_user(&s.db, &s.tokens, req)).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let response = run_blocking(&state, move |s| login_user(&s.db, &s.tokens, req)).await?;
    Ok(Json(response))
}

pub async fn verify(Extension(auth): Extension<AuthUser>) -> Json<User> {
    Json(auth.user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> TokenIssuer {
        TokenIssuer::new("test-secret", Duration::hours(24))
    }

    fn alice() -> RegisterRequest {
        RegisterRequest {
            name: "Alice".into(),
            email: "Alice@Example.com ".into(),
            password: "secret1".into(),
            location: Some("Tunis".into()),
            phone: Some("  ".into()),
        }
    }

    #[test]
    fn register_then_login() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();

        let registered = register_user(&db, &tokens, alice()).unwrap();
        assert_eq!(registered.user.email, "alice@example.com");
        assert_eq!(registered.user.location.as_deref(), Some("Tunis"));
        assert_eq!(registered.user.phone, None);

        let logged_in = login_user(
            &db,
            &tokens,
            LoginRequest {
                email: "alice@example.com".into(),
                password: "secret1".into(),
            },
        )
        .unwrap();
        assert_eq!(logged_in.user.id, registered.user.id);

        let verified = verify_token(&db, &tokens, &logged_in.token).unwrap();
        assert_eq!(verified.id, registered.user.id);
    }

    #[test]
    fn duplicate_email_conflicts() {
        let db = Database::open_in_memory().unwrap();
        register_user(&db, &tokens(), alice()).unwrap();

        let err = register_user(&db, &tokens(), alice()).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn losing_an_insert_race_is_a_conflict_not_a_500() {
        let db = Database::open_in_memory().unwrap();
        let row = |id| NewUser {
            id,
            name: "Alice",
            email: "alice@example.com",
            password_hash: "hash",
            location: None,
            phone: None,
        };
        db.create_user(&row("00000000-0000-4000-8000-000000000001")).unwrap();

        // The row another request inserted between our lookup and our insert
        let raced = db
            .create_user(&row("00000000-0000-4000-8000-000000000002"))
            .unwrap_err();
        let err = ApiError::conflict_on_unique(raced, "User already exists");
        assert!(matches!(err, ApiError::Conflict(ref m) if m == "User already exists"));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err = register_user(&db, &tokens(), alice()).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let other = ApiError::conflict_on_unique(anyhow::anyhow!("disk full"), "unused");
        assert!(matches!(other, ApiError::Internal(_)));
    }

    #[test]
    fn short_password_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let mut req = alice();
        req.password = "abc".into();

        let err = register_user(&db, &tokens(), req).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn wrong_password_and_unknown_email_look_the_same() {
        let db = Database::open_in_memory().unwrap();
        register_user(&db, &tokens(), alice()).unwrap();

        for (email, password) in [("alice@example.com", "wrong-pass"), ("nobody@example.com", "secret1")] {
            let err = login_user(
                &db,
                &tokens(),
                LoginRequest {
                    email: email.into(),
                    password: password.into(),
                },
            )
            .unwrap_err();
            assert_eq!(err.to_string(), "Invalid credentials");
            assert!(matches!(err, ApiError::Unauthorized(_)));
        }
    }

    #[test]
    fn expired_token_resolves_no_user() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();
        let user = register_user(&db, &tokens, alice()).unwrap().user;

        let stale = tokens
            .issue_at(user.id, Utc::now() - Duration::hours(25))
            .unwrap();
        let err = verify_token(&db, &tokens, &stale).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn tokens_for_unknown_users_or_other_secrets_fail() {
        let db = Database::open_in_memory().unwrap();
        let tokens = tokens();

        let orphan = tokens.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(
            verify_token(&db, &tokens, &orphan),
            Err(ApiError::Unauthorized(_))
        ));

        let foreign = TokenIssuer::new("other-secret", Duration::hours(1))
            .issue(Uuid::new_v4())
            .unwrap();
        assert!(tokens.decode(&foreign).is_err());
        assert!(tokens.decode("not-a-jwt").is_err());
    }
}
