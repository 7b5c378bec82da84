//! Typed HTTP client for the Bazaar API.
//!
//! Calls are grouped by resource (`auth()`, `listings()`, `users()`,
//! `messages()`). The bearer token lives in an injected [`TokenStore`]; a
//! `401` from any endpoint clears it.

pub mod auth;
pub mod error;
pub mod listings;
pub mod messages;
pub mod token;
pub mod users;

use std::sync::Arc;

use reqwest::{Method, RequestBuilder, StatusCode, multipart::Part};
use serde::de::DeserializeOwned;
use tracing::warn;

use bazaar_types::api::ErrorBody;

pub use error::{ClientError, ClientResult};
pub use token::{FileTokenStore, MemoryTokenStore, TokenStore};

/// An image to upload as one multipart file field.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl ImageFile {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    fn into_part(self) -> ClientResult<Part> {
        Ok(Part::bytes(self.data)
            .file_name(self.file_name)
            .mime_str(&self.content_type)?)
    }
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    tokens: Arc<dyn TokenStore>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenStore>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
            tokens,
        }
    }

    pub fn with_memory_store(base_url: impl Into<String>) -> Self {
        Self::new(base_url, Arc::new(MemoryTokenStore::new()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<String> {
        self.tokens.load()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.load().is_some()
    }

    pub fn auth(&self) -> auth::AuthApi<'_> {
        auth::AuthApi { client: self }
    }

    pub fn listings(&self) -> listings::ListingsApi<'_> {
        listings::ListingsApi { client: self }
    }

    pub fn users(&self) -> users::UsersApi<'_> {
        users::UsersApi { client: self }
    }

    pub fn messages(&self) -> messages::MessagesApi<'_> {
        messages::MessagesApi { client: self }
    }

    /// Starts a request, attaching the stored token if there is one.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match self.tokens.load() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.bytes().await.unwrap_or_default();
        let message = serde_json::from_slice::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_else(|_| fallback_message(status));

        if status == StatusCode::UNAUTHORIZED {
            warn!("Request unauthorized, clearing stored token: {}", message);
            self.tokens.clear();
            return Err(ClientError::Unauthorized(message));
        }

        Err(ClientError::Api { status, message })
    }
}

fn fallback_message(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("Request failed: {reason}"),
        None => format!("Request failed with status {}", status.as_u16()),
    }
}
