use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use bazaar_api::auth::TokenIssuer;
use bazaar_api::storage::Storage;
use bazaar_api::{AppStateInner, router};
use bazaar_client::{ApiClient, ClientError, ImageFile, MemoryTokenStore, TokenStore};
use bazaar_db::Database;
use bazaar_types::api::{
    CreateListingRequest, ListingQuery, PriceInput, RegisterRequest, SendMessageRequest,
    UpdateListingRequest,
};
use bazaar_types::models::ListingStatus;

/// Serves a fresh API on an ephemeral port and returns its base URL.
async fn spawn_server() -> String {
    let upload_dir = std::env::temp_dir().join(format!("bazaar-client-test-{}", Uuid::new_v4()));
    let state = Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        tokens: TokenIssuer::new("client-test-secret", Duration::hours(24)),
        storage: Storage::new(upload_dir).await.unwrap(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    format!("http://{addr}")
}

fn registration(name: &str, email: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        name: name.into(),
        email: email.into(),
        password: password.into(),
        location: None,
        phone: None,
    }
}

fn bike() -> CreateListingRequest {
    CreateListingRequest {
        title: Some("Bike".into()),
        description: Some("...".into()),
        price: Some(PriceInput::Number(120.0)),
        category: Some("Sports".into()),
        location: Some("Tunis".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn alice_lists_a_bike_and_bob_cannot_delete_it() {
    let base = spawn_server().await;
    let alice = ApiClient::with_memory_store(&base);

    alice
        .auth()
        .register(&registration("Alice", "alice@example.com", "secret1"))
        .await
        .unwrap();
    alice.auth().logout();
    assert!(!alice.is_authenticated());

    let session = alice.auth().login("alice@example.com", "secret1").await.unwrap();
    assert_eq!(session.user.name, "Alice");
    assert_eq!(alice.auth().verify().await.unwrap().id, session.user.id);

    let listing = alice.listings().create(&bike()).await.unwrap();
    assert_eq!(listing.status, ListingStatus::Active);
    assert_eq!(listing.views, 0);

    let newest = alice
        .listings()
        .list(&ListingQuery {
            sort: Some("newest".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(newest[0].id, listing.id);
    assert_eq!(newest[0].seller.id, session.user.id);

    let fetched = alice.listings().get(listing.id).await.unwrap();
    assert_eq!(fetched.title, "Bike");
    assert_eq!(fetched.views, 1);

    let bob = ApiClient::with_memory_store(&base);
    bob.auth()
        .register(&registration("Bob", "bob@example.com", "secret2"))
        .await
        .unwrap();
    bob.auth().login("bob@example.com", "secret2").await.unwrap();

    match bob.listings().delete(listing.id).await {
        Err(ClientError::Api { status, .. }) => assert_eq!(status.as_u16(), 403),
        other => panic!("expected 403, got {other:?}"),
    }
    assert!(bob.is_authenticated());

    let rating = bob.listings().rate(listing.id, 5).await.unwrap();
    assert_eq!(rating.rating_count, 1);
    let favorite = bob.listings().favorite(listing.id).await.unwrap();
    assert!(favorite.favorited);
    assert_eq!(bob.users().favorites().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unauthorized_responses_clear_the_token() {
    let base = spawn_server().await;
    let store = Arc::new(MemoryTokenStore::new());
    store.save("not-a-real-token");
    let client = ApiClient::new(&base, store.clone());

    match client.users().profile().await {
        Err(ClientError::Unauthorized(message)) => assert!(!message.is_empty()),
        other => panic!("expected unauthorized, got {other:?}"),
    }
    assert_eq!(store.load(), None);

    match client.auth().login("nobody@example.com", "secret1").await {
        Err(ClientError::Unauthorized(message)) => assert_eq!(message, "Invalid credentials"),
        other => panic!("expected unauthorized, got {other:?}"),
    }
}

#[tokio::test]
async fn validation_errors_carry_the_server_message() {
    let base = spawn_server().await;
    let client = ApiClient::with_memory_store(&base);
    client
        .auth()
        .register(&registration("Alice", "alice@example.com", "secret1"))
        .await
        .unwrap();

    let mut negative = bike();
    negative.price = Some(PriceInput::Number(-1.0));
    match client.listings().create(&negative).await {
        Err(ClientError::Api { status, message }) => {
            assert_eq!(status.as_u16(), 400);
            assert_eq!(message, "Price cannot be negative");
        }
        other => panic!("expected 400, got {other:?}"),
    }

    let err = client.listings().get(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(404));
}

#[tokio::test]
async fn owner_manages_listing_and_profile() {
    let base = spawn_server().await;
    let client = ApiClient::with_memory_store(&base);
    let session = client
        .auth()
        .register(&registration("Alice", "alice@example.com", "secret1"))
        .await
        .unwrap();

    let listing = client.listings().create(&bike()).await.unwrap();
    let updated = client
        .listings()
        .update(
            listing.id,
            &UpdateListingRequest {
                title: Some("Road bike".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "Road bike");

    let found = client
        .listings()
        .search("road", &ListingQuery::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    let with_image = client
        .listings()
        .upload_images(
            listing.id,
            vec![ImageFile::new("bike.jpg", "image/jpeg", b"jpeg-bytes".to_vec())],
        )
        .await
        .unwrap();
    assert_eq!(with_image.images.len(), 1);

    client
        .users()
        .change_password("secret1", "secret9")
        .await
        .unwrap();
    client.auth().login("alice@example.com", "secret9").await.unwrap();

    let profile = client.users().get(session.user.id).await.unwrap();
    assert_eq!(profile.listings.len(), 1);

    let removed = client.listings().delete(listing.id).await.unwrap();
    assert_eq!(removed.id, listing.id);
    assert!(client.listings().mine().await.unwrap().is_empty());
}

#[tokio::test]
async fn buyer_messages_seller() {
    let base = spawn_server().await;
    let seller = ApiClient::with_memory_store(&base);
    let seller_session = seller
        .auth()
        .register(&registration("Alice", "alice@example.com", "secret1"))
        .await
        .unwrap();
    let listing = seller.listings().create(&bike()).await.unwrap();

    let buyer = ApiClient::with_memory_store(&base);
    buyer
        .auth()
        .register(&registration("Bob", "bob@example.com", "secret2"))
        .await
        .unwrap();

    let sent = buyer
        .messages()
        .send(&SendMessageRequest {
            recipient_id: seller_session.user.id,
            content: "Is it still available?".into(),
            listing_id: Some(listing.id),
        })
        .await
        .unwrap();

    assert_eq!(seller.messages().unread_count().await.unwrap(), 1);
    let conversations = seller.messages().conversations().await.unwrap();
    assert_eq!(conversations.len(), 1);

    let thread = seller.messages().conversation(sent.conversation_id).await.unwrap();
    assert_eq!(thread.len(), 1);
    assert_eq!(seller.messages().unread_count().await.unwrap(), 0);
}
