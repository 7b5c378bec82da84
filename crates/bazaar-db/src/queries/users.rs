use anyhow::Result;
use rusqlite::{Connection, Row};

use super::{OptionalExt, now_timestamp};
use crate::Database;
use crate::models::{NewUser, UserRow};

const USER_COLUMNS: &str =
    "id, name, email, password, avatar, location, phone, bio, rating, review_count, created_at";

impl Database {
    pub fn create_user(&self, user: &NewUser<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password, location, phone, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    user.id,
                    user.name,
                    user.email,
                    user.password_hash,
                    user.location,
                    user.phone,
                    now_timestamp(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn update_user_profile(
        &self,
        id: &str,
        name: &str,
        email: &str,
        location: Option<&str>,
        phone: Option<&str>,
        bio: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET name = ?2, email = ?3, location = ?4, phone = ?5, bio = ?6
                 WHERE id = ?1",
                rusqlite::params![id, name, email, location, phone, bio],
            )?;
            Ok(())
        })
    }

    pub fn set_user_avatar(&self, id: &str, avatar: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET avatar = ?2 WHERE id = ?1", (id, avatar))?;
            Ok(())
        })
    }

    pub fn set_user_password(&self, id: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET password = ?2 WHERE id = ?1", (id, password_hash))?;
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([value], map_user).optional()?;

    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        avatar: row.get(4)?,
        location: row.get(5)?,
        phone: row.get(6)?,
        bio: row.get(7)?,
        rating: row.get(8)?,
        review_count: row.get(9)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> NewUser<'static> {
        NewUser {
            id: "8d7f6c1e-0000-4000-8000-000000000001",
            name: "Alice",
            email: "alice@example.com",
            password_hash: "hash",
            location: Some("Tunis"),
            phone: None,
        }
    }

    #[test]
    fn email_is_unique() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&alice()).unwrap();

        let mut dup = alice();
        dup.id = "8d7f6c1e-0000-4000-8000-000000000002";
        let err = db.create_user(&dup).unwrap_err();
        assert!(crate::is_unique_violation(&err));
        assert!(!crate::is_unique_violation(&anyhow::anyhow!("unrelated")));
    }

    #[test]
    fn profile_update_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let user = alice();
        db.create_user(&user).unwrap();

        db.update_user_profile(user.id, "Alice B", "alice@example.com", None, Some("555"), Some("hi"))
            .unwrap();
        db.set_user_avatar(user.id, "/uploads/a.png").unwrap();

        let row = db.get_user_by_id(user.id).unwrap().unwrap();
        assert_eq!(row.name, "Alice B");
        assert_eq!(row.location, None);
        assert_eq!(row.phone.as_deref(), Some("555"));
        assert_eq!(row.avatar.as_deref(), Some("/uploads/a.png"));
        assert_eq!(row.review_count, 0);
    }
}
