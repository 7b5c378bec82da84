use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, listings, ratings, favorites)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id            TEXT PRIMARY KEY,
                name          TEXT NOT NULL,
                email         TEXT NOT NULL UNIQUE,
                password      TEXT NOT NULL,
                avatar        TEXT,
                location      TEXT,
                phone         TEXT,
                bio           TEXT,
                rating        REAL NOT NULL DEFAULT 0,
                review_count  INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL
            );

            CREATE TABLE listings (
                id            TEXT PRIMARY KEY,
                seller_id     TEXT NOT NULL REFERENCES users(id),
                title         TEXT NOT NULL,
                description   TEXT NOT NULL,
                price         REAL NOT NULL CHECK (price >= 0),
                category      TEXT NOT NULL,
                condition     TEXT NOT NULL DEFAULT 'good',
                location      TEXT NOT NULL,
                images        TEXT NOT NULL DEFAULT '[]',
                status        TEXT NOT NULL DEFAULT 'active'
                              CHECK (status IN ('active', 'sold', 'deleted')),
                views         INTEGER NOT NULL DEFAULT 0,
                rating        REAL NOT NULL DEFAULT 0,
                rating_count  INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE INDEX idx_listings_status_created ON listings(status, created_at);
            CREATE INDEX idx_listings_seller ON listings(seller_id);

            CREATE TABLE listing_ratings (
                listing_id  TEXT NOT NULL REFERENCES listings(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                value       INTEGER NOT NULL CHECK (value BETWEEN 1 AND 5),
                created_at  TEXT NOT NULL,
                PRIMARY KEY (listing_id, user_id)
            );

            CREATE TABLE favorites (
                listing_id  TEXT NOT NULL REFERENCES listings(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL,
                PRIMARY KEY (listing_id, user_id)
            );

            CREATE INDEX idx_favorites_user ON favorites(user_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (conversations, messages)");
        conn.execute_batch(
            "
            CREATE TABLE conversations (
                id          TEXT PRIMARY KEY,
                user_a      TEXT NOT NULL REFERENCES users(id),
                user_b      TEXT NOT NULL REFERENCES users(id),
                listing_id  TEXT REFERENCES listings(id),
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_conversations_a ON conversations(user_a);
            CREATE INDEX idx_conversations_b ON conversations(user_b);

            CREATE TABLE messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                sender_id        TEXT NOT NULL REFERENCES users(id),
                recipient_id     TEXT NOT NULL REFERENCES users(id),
                content          TEXT NOT NULL,
                read             INTEGER NOT NULL DEFAULT 0,
                created_at       TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);
            CREATE INDEX idx_messages_unread ON messages(recipient_id, read);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
