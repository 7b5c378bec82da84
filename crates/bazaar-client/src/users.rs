use reqwest::{Method, multipart::Form};
use serde_json::Value;
use uuid::Uuid;

use bazaar_types::api::{ChangePasswordRequest, PublicProfileResponse, UpdateProfileRequest};
use bazaar_types::models::{Listing, User};

use crate::{ApiClient, ClientResult, ImageFile};

pub struct UsersApi<'a> {
    pub(crate) client: &'a ApiClient,
}

impl UsersApi<'_> {
    pub async fn profile(&self) -> ClientResult<User> {
        self.client
            .send(self.client.request(Method::GET, "/users/profile"))
            .await
    }

    pub async fn update_profile(&self, req: &UpdateProfileRequest) -> ClientResult<User> {
        self.client
            .send(self.client.request(Method::PUT, "/users/profile").json(req))
            .await
    }

    pub async fn upload_avatar(&self, image: ImageFile) -> ClientResult<User> {
        let form = Form::new().part("avatar", image.into_part()?);
        self.client
            .send(self.client.request(Method::PUT, "/users/avatar").multipart(form))
            .await
    }

    pub async fn change_password(&self, current: &str, new: &str) -> ClientResult<()> {
        let req = ChangePasswordRequest {
            current_password: current.to_string(),
            new_password: new.to_string(),
        };
        let _: Value = self
            .client
            .send(self.client.request(Method::PUT, "/users/password").json(&req))
            .await?;
        Ok(())
    }

    pub async fn favorites(&self) -> ClientResult<Vec<Listing>> {
        self.client
            .send(self.client.request(Method::GET, "/users/favorites"))
            .await
    }

    /// Another user's public page.
    pub async fn get(&self, id: Uuid) -> ClientResult<PublicProfileResponse> {
        self.client
            .send(self.client.request(Method::GET, &format!("/users/{id}")))
            .await
    }
}
