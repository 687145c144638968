use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::{new_id, opt_ts_col, ts, ts_col};

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub bio: Option<String>,
    pub is_verified: bool,
    pub is_active: bool,
    pub last_active: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Full name when set, otherwise the email.
    pub fn display_name(&self) -> String {
        let name = self.full_name();
        if name.is_empty() {
            self.email.clone()
        } else {
            name
        }
    }
}

/// Compact user embedded in other resources.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
}

impl UserSummary {
    /// Reads `id, email, username, first_name, last_name` starting at `offset`.
    pub fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        let first_name: String = row.get(offset + 3)?;
        let last_name: String = row.get(offset + 4)?;
        Ok(Self {
            id: row.get(offset)?,
            email: row.get(offset + 1)?,
            username: row.get(offset + 2)?,
            full_name: format!("{} {}", first_name, last_name).trim().to_string(),
            first_name,
            last_name,
        })
    }

    pub fn display_name(&self) -> &str {
        if self.full_name.is_empty() {
            &self.email
        } else {
            &self.full_name
        }
    }
}

pub const SUMMARY_COLUMNS: &str = "u.id, u.email, u.username, u.first_name, u.last_name";

const COLUMNS: &str = "id, email, username, password_hash, first_name, last_name, phone_number, \
                       bio, is_verified, is_active, last_active, last_login, created_at";

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        phone_number: row.get(6)?,
        bio: row.get(7)?,
        is_verified: row.get(8)?,
        is_active: row.get(9)?,
        last_active: opt_ts_col(row, 10)?,
        last_login: opt_ts_col(row, 11)?,
        created_at: ts_col(row, 12)?,
    })
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
}

pub fn insert(conn: &Connection, new: &NewUser<'_>) -> rusqlite::Result<User> {
    let id = new_id();
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO users (id, email, username, password_hash, first_name, last_name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![id, new.email, new.username, new.password_hash, new.first_name, new.last_name, now],
    )?;
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", COLUMNS),
        [&id],
        map_user,
    )
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", COLUMNS),
        [id],
        map_user,
    )
    .optional()
}

pub fn find_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE email = ?1 COLLATE NOCASE", COLUMNS),
        [email],
        map_user,
    )
    .optional()
}

/// Login accepts either the email or the username.
pub fn find_by_login(conn: &Connection, ident: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM users WHERE email = ?1 COLLATE NOCASE OR username = ?1 LIMIT 1",
            COLUMNS
        ),
        [ident],
        map_user,
    )
    .optional()
}

pub fn email_exists(conn: &Connection, email: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 COLLATE NOCASE)",
        [email],
        |row| row.get(0),
    )
}

pub fn username_exists(conn: &Connection, username: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
        [username],
        |row| row.get(0),
    )
}

#[derive(Debug, Default)]
pub struct ProfilePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub phone_number: Option<String>,
}

pub fn update_profile(conn: &Connection, id: &str, patch: &ProfilePatch) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE users SET
            first_name = COALESCE(?2, first_name),
            last_name = COALESCE(?3, last_name),
            bio = COALESCE(?4, bio),
            phone_number = COALESCE(?5, phone_number),
            updated_at = ?6
         WHERE id = ?1",
        params![
            id,
            patch.first_name,
            patch.last_name,
            patch.bio,
            patch.phone_number,
            ts(Utc::now())
        ],
    )?;
    Ok(())
}

pub fn touch_last_active(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE users SET last_active = ?2 WHERE id = ?1",
        params![id, ts(Utc::now())],
    )?;
    Ok(())
}

pub fn touch_last_login(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE users SET last_login = ?2, last_active = ?2 WHERE id = ?1",
        params![id, ts(Utc::now())],
    )?;
    Ok(())
}

// --- Tokens ---

pub fn user_for_token(conn: &Connection, key: &str) -> rusqlite::Result<Option<User>> {
    let columns = COLUMNS
        .split(", ")
        .map(|c| format!("u.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    conn.query_row(
        &format!(
            "SELECT {} FROM auth_tokens t JOIN users u ON u.id = t.user_id WHERE t.key = ?1",
            columns
        ),
        [key],
        map_user,
    )
    .optional()
}

/// Return the user's token, creating one if needed.
pub fn ensure_token(
    conn: &Connection,
    user_id: &str,
    generate: impl FnOnce() -> String,
) -> rusqlite::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT key FROM auth_tokens WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(key) = existing {
        return Ok(key);
    }
    let key = generate();
    conn.execute(
        "INSERT INTO auth_tokens (key, user_id, created_at) VALUES (?1, ?2, ?3)",
        params![key, user_id, ts(Utc::now())],
    )?;
    Ok(key)
}

pub fn delete_token(conn: &Connection, key: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM auth_tokens WHERE key = ?1", [key])?;
    Ok(())
}
