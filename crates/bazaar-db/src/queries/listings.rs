use anyhow::Result;
use rusqlite::types::ToSql;
use rusqlite::{Connection, Row};

use bazaar_types::models::{ListingCondition, ListingSort, ListingStatus};

use super::{OptionalExt, now_timestamp};
use crate::Database;
use crate::models::{ListingFields, ListingRow};

const LISTING_SELECT: &str = "
    SELECT l.id, l.seller_id, l.title, l.description, l.price, l.category, l.condition,
           l.location, l.images, l.status, l.views, l.rating, l.rating_count,
           l.created_at, l.updated_at,
           u.name, u.avatar, u.rating, u.review_count,
           (SELECT COUNT(*) FROM favorites f WHERE f.listing_id = l.id)
    FROM listings l
    JOIN users u ON u.id = l.seller_id";

/// Query-building input for listing searches.
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    /// Empty means any status.
    pub statuses: Vec<ListingStatus>,
    pub category: Option<String>,
    /// Case-insensitive substring matched against title or description.
    pub search: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub condition: Option<ListingCondition>,
    pub seller_id: Option<String>,
    pub favorited_by: Option<String>,
    pub sort: ListingSort,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Database {
    pub fn insert_listing(&self, id: &str, seller_id: &str, fields: &ListingFields<'_>) -> Result<()> {
        let images = serde_json::to_string(fields.images)?;
        let now = now_timestamp();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO listings (id, seller_id, title, description, price, category,
                                       condition, location, images, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                rusqlite::params![
                    id,
                    seller_id,
                    fields.title,
                    fields.description,
                    fields.price,
                    fields.category,
                    fields.condition,
                    fields.location,
                    images,
                    fields.status,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_listing(&self, id: &str) -> Result<Option<ListingRow>> {
        self.with_conn(|conn| {
            let sql = format!("{LISTING_SELECT} WHERE l.id = ?1");
            let row = conn.query_row(&sql, [id], map_listing).optional()?;
            Ok(row)
        })
    }

    /// Returns `(seller_id, status)` for any stored listing, deleted ones included.
    pub fn get_listing_owner(&self, id: &str) -> Result<Option<(String, String)>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row("SELECT seller_id, status FROM listings WHERE id = ?1", [id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .optional()?;
            Ok(row)
        })
    }

    /// Bumps the view counter of a visible listing. Returns false if nothing matched.
    pub fn increment_listing_views(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE listings SET views = views + 1 WHERE id = ?1 AND status != 'deleted'",
                [id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| query_listings(conn, filter))
    }

    pub fn update_listing(&self, id: &str, fields: &ListingFields<'_>) -> Result<()> {
        let images = serde_json::to_string(fields.images)?;

        self.with_conn(|conn| {
            conn.execute(
                "UPDATE listings
                 SET title = ?2, description = ?3, price = ?4, category = ?5, condition = ?6,
                     location = ?7, images = ?8, status = ?9, updated_at = ?10
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    fields.title,
                    fields.description,
                    fields.price,
                    fields.category,
                    fields.condition,
                    fields.location,
                    images,
                    fields.status,
                    now_timestamp(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn set_listing_status(&self, id: &str, status: ListingStatus) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE listings SET status = ?2, updated_at = ?3 WHERE id = ?1",
                (id, status.as_str(), now_timestamp()),
            )?;
            Ok(())
        })
    }

    /// Records or overwrites `user_id`'s rating, then recomputes the listing's
    /// mean and the seller's aggregate over all their listings.
    /// Returns the listing's new `(rating, rating_count)`.
    pub fn rate_listing(&self, listing_id: &str, user_id: &str, value: i64) -> Result<(f64, i64)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO listing_ratings (listing_id, user_id, value, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (listing_id, user_id) DO UPDATE SET value = excluded.value",
                rusqlite::params![listing_id, user_id, value, now_timestamp()],
            )?;

            let (rating, count): (f64, i64) = tx.query_row(
                "SELECT COALESCE(AVG(value), 0), COUNT(*) FROM listing_ratings WHERE listing_id = ?1",
                [listing_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            tx.execute(
                "UPDATE listings SET rating = ?2, rating_count = ?3 WHERE id = ?1",
                rusqlite::params![listing_id, rating, count],
            )?;

            tx.execute(
                "UPDATE users
                 SET (rating, review_count) = (
                     SELECT COALESCE(AVG(r.value), 0), COUNT(*)
                     FROM listing_ratings r
                     JOIN listings l ON l.id = r.listing_id
                     WHERE l.seller_id = users.id
                 )
                 WHERE id = (SELECT seller_id FROM listings WHERE id = ?1)",
                [listing_id],
            )?;

            tx.commit()?;
            Ok((rating, count))
        })
    }

    /// Adds or removes `user_id` from the listing's favorites.
    /// Returns `(favorited, favorites_count)` after the toggle.
    pub fn toggle_favorite(&self, listing_id: &str, user_id: &str) -> Result<(bool, i64)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let removed = tx.execute(
                "DELETE FROM favorites WHERE listing_id = ?1 AND user_id = ?2",
                (listing_id, user_id),
            )?;

            if removed == 0 {
                tx.execute(
                    "INSERT INTO favorites (listing_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                    (listing_id, user_id, now_timestamp()),
                )?;
            }

            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM favorites WHERE listing_id = ?1",
                [listing_id],
                |row| row.get(0),
            )?;

            tx.commit()?;
            Ok((removed == 0, count))
        })
    }
}

fn query_listings(conn: &Connection, filter: &ListingFilter) -> Result<Vec<ListingRow>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if !filter.statuses.is_empty() {
        let placeholders: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| format!("?{}", bind(&mut params, Box::new(s.as_str()))))
            .collect();
        clauses.push(format!("l.status IN ({})", placeholders.join(", ")));
    }
    if let Some(category) = &filter.category {
        let n = bind(&mut params, Box::new(category.clone()));
        clauses.push(format!("fold_case(l.category) = fold_case(?{n})"));
    }
    if let Some(search) = &filter.search {
        let n = bind(&mut params, Box::new(search.clone()));
        clauses.push(format!(
            "(instr(fold_case(l.title), fold_case(?{n})) > 0 \
             OR instr(fold_case(l.description), fold_case(?{n})) > 0)"
        ));
    }
    if let Some(min) = filter.min_price {
        let n = bind(&mut params, Box::new(min));
        clauses.push(format!("l.price >= ?{n}"));
    }
    if let Some(max) = filter.max_price {
        let n = bind(&mut params, Box::new(max));
        clauses.push(format!("l.price <= ?{n}"));
    }
    if let Some(condition) = filter.condition {
        let n = bind(&mut params, Box::new(condition.as_str()));
        clauses.push(format!("l.condition = ?{n}"));
    }
    if let Some(seller_id) = &filter.seller_id {
        let n = bind(&mut params, Box::new(seller_id.clone()));
        clauses.push(format!("l.seller_id = ?{n}"));
    }
    if let Some(user_id) = &filter.favorited_by {
        let n = bind(&mut params, Box::new(user_id.clone()));
        clauses.push(format!("l.id IN (SELECT listing_id FROM favorites WHERE user_id = ?{n})"));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    // rowid breaks ties between listings created in the same microsecond
    let order_sql = match filter.sort {
        ListingSort::PriceAsc => "l.price ASC, l.created_at DESC, l.rowid DESC",
        ListingSort::PriceDesc => "l.price DESC, l.created_at DESC, l.rowid DESC",
        ListingSort::Newest => "l.created_at DESC, l.rowid DESC",
        ListingSort::Oldest => "l.created_at ASC, l.rowid ASC",
    };

    let limit = filter.limit.map(i64::from).unwrap_or(-1);
    let n_limit = bind(&mut params, Box::new(limit));
    let n_offset = bind(&mut params, Box::new(i64::from(filter.offset)));

    let sql = format!(
        "{LISTING_SELECT}{where_sql} ORDER BY {order_sql} LIMIT ?{n_limit} OFFSET ?{n_offset}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), map_listing)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Pushes a parameter and returns its 1-based placeholder number.
fn bind(params: &mut Vec<Box<dyn ToSql>>, value: Box<dyn ToSql>) -> usize {
    params.push(value);
    params.len()
}

fn map_listing(row: &Row<'_>) -> rusqlite::Result<ListingRow> {
    Ok(ListingRow {
        id: row.get(0)?,
        seller_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        price: row.get(4)?,
        category: row.get(5)?,
        condition: row.get(6)?,
        location: row.get(7)?,
        images: row.get(8)?,
        status: row.get(9)?,
        views: row.get(10)?,
        rating: row.get(11)?,
        rating_count: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        seller_name: row.get(15)?,
        seller_avatar: row.get(16)?,
        seller_rating: row.get(17)?,
        seller_review_count: row.get(18)?,
        favorites_count: row.get(19)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;

    const SELLER: &str = "00000000-0000-4000-8000-00000000000a";
    const BUYER: &str = "00000000-0000-4000-8000-00000000000b";
    const OTHER: &str = "00000000-0000-4000-8000-00000000000c";

    fn seed_users(db: &Database) {
        for (id, email) in [(SELLER, "s@example.com"), (BUYER, "b@example.com"), (OTHER, "o@example.com")] {
            db.create_user(&NewUser {
                id,
                name: email,
                email,
                password_hash: "hash",
                location: None,
                phone: None,
            })
            .unwrap();
        }
    }

    fn insert(db: &Database, id: &str, title: &str, price: f64, status: &str) {
        db.insert_listing(
            id,
            SELLER,
            &ListingFields {
                title,
                description: "A thing for sale",
                price,
                category: "Sports",
                condition: "good",
                location: "Tunis",
                images: &[],
                status,
            },
        )
        .unwrap();
    }

    fn titles(rows: &[ListingRow]) -> Vec<&str> {
        rows.iter().map(|r| r.title.as_str()).collect()
    }

    fn active() -> ListingFilter {
        ListingFilter {
            statuses: vec![ListingStatus::Active],
            ..Default::default()
        }
    }

    #[test]
    fn filters_by_status_search_and_price() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);
        insert(&db, "l1", "Road Bike", 120.0, "active");
        insert(&db, "l2", "Tennis racket", 40.0, "active");
        insert(&db, "l3", "Mountain BIKE", 300.0, "sold");
        insert(&db, "l4", "Bike helmet", 25.0, "deleted");

        let rows = db.list_listings(&active()).unwrap();
        assert_eq!(titles(&rows), vec!["Tennis racket", "Road Bike"]);

        let rows = db
            .list_listings(&ListingFilter {
                search: Some("bIkE".into()),
                ..active()
            })
            .unwrap();
        assert_eq!(titles(&rows), vec!["Road Bike"]);

        let rows = db
            .list_listings(&ListingFilter {
                min_price: Some(40.0),
                max_price: Some(120.0),
                sort: ListingSort::PriceAsc,
                ..active()
            })
            .unwrap();
        assert_eq!(titles(&rows), vec!["Tennis racket", "Road Bike"]);

        let rows = db
            .list_listings(&ListingFilter {
                category: Some("sports".into()),
                sort: ListingSort::Oldest,
                limit: Some(1),
                offset: 1,
                ..active()
            })
            .unwrap();
        assert_eq!(titles(&rows), vec!["Tennis racket"]);
    }

    #[test]
    fn search_and_category_fold_accented_capitals() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);
        db.insert_listing(
            "l1",
            SELLER,
            &ListingFields {
                title: "Vélo de route",
                description: "Cadre en aluminium, très léger",
                price: 450.0,
                category: "Électronique",
                condition: "good",
                location: "Sfax",
                images: &[],
                status: "active",
            },
        )
        .unwrap();
        insert(&db, "l2", "Road Bike", 120.0, "active");

        for term in ["VÉLO", "vélo", "TRÈS LÉGER"] {
            let rows = db
                .list_listings(&ListingFilter {
                    search: Some(term.into()),
                    ..active()
                })
                .unwrap();
            assert_eq!(titles(&rows), vec!["Vélo de route"], "search {term}");
        }

        let rows = db
            .list_listings(&ListingFilter {
                category: Some("électronique".into()),
                ..active()
            })
            .unwrap();
        assert_eq!(titles(&rows), vec!["Vélo de route"]);
    }

    #[test]
    fn re_rating_overwrites_and_updates_seller() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);
        insert(&db, "l1", "Road Bike", 120.0, "active");

        assert_eq!(db.rate_listing("l1", BUYER, 2).unwrap(), (2.0, 1));
        assert_eq!(db.rate_listing("l1", OTHER, 5).unwrap(), (3.5, 2));
        assert_eq!(db.rate_listing("l1", BUYER, 4).unwrap(), (4.5, 2));

        let seller = db.get_user_by_id(SELLER).unwrap().unwrap();
        assert_eq!(seller.rating, 4.5);
        assert_eq!(seller.review_count, 2);
    }

    #[test]
    fn favorites_toggle() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);
        insert(&db, "l1", "Road Bike", 120.0, "active");

        assert_eq!(db.toggle_favorite("l1", BUYER).unwrap(), (true, 1));
        assert_eq!(db.toggle_favorite("l1", OTHER).unwrap(), (true, 2));
        assert_eq!(db.toggle_favorite("l1", BUYER).unwrap(), (false, 1));

        let rows = db
            .list_listings(&ListingFilter {
                favorited_by: Some(OTHER.into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(titles(&rows), vec!["Road Bike"]);
        assert_eq!(rows[0].favorites_count, 1);
    }

    #[test]
    fn views_skip_deleted_listings() {
        let db = Database::open_in_memory().unwrap();
        seed_users(&db);
        insert(&db, "l1", "Road Bike", 120.0, "active");

        assert!(db.increment_listing_views("l1").unwrap());
        db.set_listing_status("l1", ListingStatus::Deleted).unwrap();
        assert!(!db.increment_listing_views("l1").unwrap());
        assert!(!db.increment_listing_views("missing").unwrap());

        let row = db.get_listing("l1").unwrap().unwrap();
        assert_eq!(row.views, 1);
        assert_eq!(row.status, "deleted");
    }
}
