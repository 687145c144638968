use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::optional_text;
use crate::auth::password::{generate_token, hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::error::{ApiError, ApiResult, FieldErrors};
use crate::store::users::{self, NewUser, ProfilePatch, User};

lazy_static::lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
            .expect("email pattern compiles");
    static ref USERNAME_RE: Regex =
        Regex::new(r"^[A-Za-z0-9_.@+\-]{1,150}$").expect("username pattern compiles");
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Well-formed, normalized email or a field error on `field`.
pub fn validated_email(field: &str, raw: Option<&str>) -> ApiResult<String> {
    let email = normalize_email(raw.unwrap_or_default());
    if email.is_empty() {
        return Err(ApiError::field(field, "This field is required."));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::field(field, "Enter a valid email address."));
    }
    Ok(email)
}

#[derive(Debug, Deserialize)]
pub struct RegisterInput {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
    pub message: &'static str,
}

/// Derive a free username from the email's local part: `ada`, `ada1`, ...
fn unique_username(conn: &Connection, email: &str) -> ApiResult<String> {
    let base: String = email
        .split('@')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '+'))
        .collect();
    let base = if base.is_empty() { "user".to_string() } else { base };

    let mut candidate = base.clone();
    let mut counter = 1;
    while users::username_exists(conn, &candidate)? {
        candidate = format!("{}{}", base, counter);
        counter += 1;
    }
    Ok(candidate)
}

pub fn register(conn: &mut Connection, input: RegisterInput) -> ApiResult<AuthResponse> {
    let mut errors = FieldErrors::new();

    let email = normalize_email(input.email.as_deref().unwrap_or_default());
    if email.is_empty() {
        errors.add("email", "This field is required.");
    } else if !is_valid_email(&email) {
        errors.add("email", "Enter a valid email address.");
    } else if users::email_exists(conn, &email)? {
        errors.add("email", "A user with this email already exists.");
    }

    let username = optional_text(input.username);
    if let Some(username) = &username {
        if !USERNAME_RE.is_match(username) {
            errors.add(
                "username",
                "Enter a valid username. Letters, digits and @/./+/-/_ only.",
            );
        } else if users::username_exists(conn, username)? {
            errors.add("username", "A user with this username already exists.");
        }
    }

    let password = input.password.unwrap_or_default();
    if password.is_empty() {
        errors.add("password", "This field is required.");
    } else if password.chars().count() < MIN_PASSWORD_LEN {
        errors.add(
            "password",
            format!("Password must be at least {} characters long.", MIN_PASSWORD_LEN),
        );
    }
    if input.password_confirm.as_deref() != Some(password.as_str()) {
        errors.add("password_confirm", "Passwords don't match.");
    }
    errors.into_result()?;

    let tx = conn.transaction()?;
    let username = match username {
        Some(username) => username,
        None => unique_username(&tx, &email)?,
    };
    let first_name = optional_text(input.first_name).unwrap_or_default();
    let last_name = optional_text(input.last_name).unwrap_or_default();
    let user = users::insert(
        &tx,
        &NewUser {
            email: &email,
            username: &username,
            password_hash: &hash_password(&password),
            first_name: &first_name,
            last_name: &last_name,
        },
    )?;
    let token = users::ensure_token(&tx, &user.id, generate_token)?;
    tx.commit()?;

    info!("Registered user {}", user.email);
    Ok(AuthResponse {
        user,
        token,
        message: "User registered successfully",
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub email_or_username: Option<String>,
    pub password: Option<String>,
}

pub fn login(conn: &mut Connection, input: LoginInput) -> ApiResult<AuthResponse> {
    let ident = input.email_or_username.unwrap_or_default();
    let ident = ident.trim();
    let password = input.password.unwrap_or_default();

    let mut errors = FieldErrors::new();
    if ident.is_empty() {
        errors.add("email_or_username", "This field is required.");
    }
    if password.is_empty() {
        errors.add("password", "This field is required.");
    }
    errors.into_result()?;

    let user = users::find_by_login(conn, ident)?
        .filter(|u| verify_password(&password, &u.password_hash))
        .ok_or_else(|| ApiError::bad_request("Invalid email/username or password"))?;
    if !user.is_active {
        return Err(ApiError::bad_request("User account is disabled"));
    }

    let tx = conn.transaction()?;
    users::touch_last_login(&tx, &user.id)?;
    let token = users::ensure_token(&tx, &user.id, generate_token)?;
    tx.commit()?;

    info!("User {} logged in", user.email);
    Ok(AuthResponse {
        user,
        token,
        message: "Login successful",
    })
}

pub fn logout(conn: &Connection, token: &str) -> ApiResult<()> {
    users::delete_token(conn, token)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ProfileInput {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub phone_number: Option<String>,
}

pub fn update_profile(conn: &Connection, user_id: &str, input: ProfileInput) -> ApiResult<User> {
    if let Some(phone) = &input.phone_number {
        if phone.trim().chars().count() > 20 {
            return Err(ApiError::field(
                "phone_number",
                "Ensure this field has no more than 20 characters.",
            ));
        }
    }
    let patch = ProfilePatch {
        first_name: input.first_name.map(|v| v.trim().to_string()),
        last_name: input.last_name.map(|v| v.trim().to_string()),
        bio: input.bio,
        phone_number: input.phone_number.map(|v| v.trim().to_string()),
    };
    users::update_profile(conn, user_id, &patch)?;
    users::get(conn, user_id)?.ok_or(ApiError::NotFound("User"))
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Availability {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username_available: Option<bool>,
}

pub fn check_availability(
    conn: &Connection,
    email: Option<&str>,
    username: Option<&str>,
) -> ApiResult<Availability> {
    let email = email.map(normalize_email).filter(|e| !e.is_empty());
    let username = username.map(str::trim).filter(|u| !u.is_empty());
    if email.is_none() && username.is_none() {
        return Err(ApiError::bad_request("Provide an email or username to check"));
    }
    Ok(Availability {
        email_available: match email {
            Some(email) => Some(!users::email_exists(conn, &email)?),
            None => None,
        },
        username_available: match username {
            Some(username) => Some(!users::username_exists(conn, username)?),
            None => None,
        },
    })
}
