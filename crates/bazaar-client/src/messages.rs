use reqwest::Method;
use uuid::Uuid;

use bazaar_types::api::{SendMessageRequest, UnreadCountResponse};
use bazaar_types::models::{Conversation, Message};

use crate::{ApiClient, ClientResult};

pub struct MessagesApi<'a> {
    pub(crate) client: &'a ApiClient,
}

impl MessagesApi<'_> {
    pub async fn send(&self, req: &SendMessageRequest) -> ClientResult<Message> {
        self.client
            .send(self.client.request(Method::POST, "/messages").json(req))
            .await
    }

    pub async fn conversations(&self) -> ClientResult<Vec<Conversation>> {
        self.client
            .send(self.client.request(Method::GET, "/messages/conversations"))
            .await
    }

    /// Messages oldest first. Opening a conversation marks it read.
    pub async fn conversation(&self, id: Uuid) -> ClientResult<Vec<Message>> {
        self.client
            .send(self.client.request(Method::GET, &format!("/messages/conversations/{id}")))
            .await
    }

    pub async fn unread_count(&self) -> ClientResult<i64> {
        let response: UnreadCountResponse = self
            .client
            .send(self.client.request(Method::GET, "/messages/unread-count"))
            .await?;
        Ok(response.count)
    }
}
