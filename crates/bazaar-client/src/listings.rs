use reqwest::{Method, multipart::Form};
use uuid::Uuid;

use bazaar_types::api::{
    CreateListingRequest, DeleteResponse, FavoriteResponse, ListingQuery, RateListingRequest,
    RatingResponse, UpdateListingRequest,
};
use bazaar_types::models::Listing;

use crate::{ApiClient, ClientResult, ImageFile};

pub struct ListingsApi<'a> {
    pub(crate) client: &'a ApiClient,
}

impl ListingsApi<'_> {
    pub async fn list(&self, query: &ListingQuery) -> ClientResult<Vec<Listing>> {
        self.client
            .send(self.client.request(Method::GET, "/listings").query(query))
            .await
    }

    /// Free-text search; the other filters in `query` still apply.
    pub async fn search(&self, term: &str, query: &ListingQuery) -> ClientResult<Vec<Listing>> {
        let query = ListingQuery {
            search: Some(term.to_string()),
            ..query.clone()
        };
        self.client
            .send(self.client.request(Method::GET, "/listings/search").query(&query))
            .await
    }

    pub async fn get(&self, id: Uuid) -> ClientResult<Listing> {
        self.client
            .send(self.client.request(Method::GET, &format!("/listings/{id}")))
            .await
    }

    pub async fn create(&self, req: &CreateListingRequest) -> ClientResult<Listing> {
        self.client
            .send(self.client.request(Method::POST, "/listings").json(req))
            .await
    }

    pub async fn update(&self, id: Uuid, req: &UpdateListingRequest) -> ClientResult<Listing> {
        self.client
            .send(self.client.request(Method::PUT, &format!("/listings/{id}")).json(req))
            .await
    }

    pub async fn delete(&self, id: Uuid) -> ClientResult<DeleteResponse> {
        self.client
            .send(self.client.request(Method::DELETE, &format!("/listings/{id}")))
            .await
    }

    pub async fn rate(&self, id: Uuid, rating: i64) -> ClientResult<RatingResponse> {
        let req = RateListingRequest {
            rating: Some(rating),
        };
        self.client
            .send(
                self.client
                    .request(Method::POST, &format!("/listings/{id}/rate"))
                    .json(&req),
            )
            .await
    }

    pub async fn favorite(&self, id: Uuid) -> ClientResult<FavoriteResponse> {
        self.client
            .send(self.client.request(Method::POST, &format!("/listings/{id}/favorite")))
            .await
    }

    pub async fn mine(&self) -> ClientResult<Vec<Listing>> {
        self.client
            .send(self.client.request(Method::GET, "/listings/mine"))
            .await
    }

    pub async fn upload_images(&self, id: Uuid, images: Vec<ImageFile>) -> ClientResult<Listing> {
        let mut form = Form::new();
        for image in images {
            form = form.part("images", image.into_part()?);
        }
        self.client
            .send(
                self.client
                    .request(Method::POST, &format!("/listings/{id}/images"))
                    .multipart(form),
            )
            .await
    }
}
