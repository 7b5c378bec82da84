use reqwest::Method;
use tracing::info;

use bazaar_types::api::{AuthResponse, LoginRequest, RegisterRequest};
use bazaar_types::models::User;

use crate::{ApiClient, ClientResult};

pub struct AuthApi<'a> {
    pub(crate) client: &'a ApiClient,
}

impl AuthApi<'_> {
    /// Creates the account and stores the returned token.
    #[tracing::instrument(skip_all, fields(email = %req.email))]
    pub async fn register(&self, req: &RegisterRequest) -> ClientResult<AuthResponse> {
        let response: AuthResponse = self
            .client
            .send(self.client.request(Method::POST, "/auth/register").json(req))
            .await?;
        self.client.tokens.save(&response.token);
        info!("Registered as {}", response.user.id);
        Ok(response)
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<AuthResponse> {
        let req = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = self
            .client
            .send(self.client.request(Method::POST, "/auth/login").json(&req))
            .await?;
        self.client.tokens.save(&response.token);
        Ok(response)
    }

    /// The user the stored token belongs to.
    pub async fn verify(&self) -> ClientResult<User> {
        self.client
            .send(self.client.request(Method::GET, "/auth/verify"))
            .await
    }

    pub fn logout(&self) {
        self.client.tokens.clear();
    }
}
