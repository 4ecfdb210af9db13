//! Domain types shared by the session core.
//!
//! - [`Role`] - open set of authorization roles
//! - [`UserProfile`] - cached, denormalized user identity
//! - [`Credential`] - the access/refresh token pair with expiry derived from claims
//! - Wire DTOs for the `/auth/*` endpoints

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::token::{self, DecodedClaims};

// =============================================================================
// Role
// =============================================================================

/// Authorization role carried by tokens and user profiles.
///
/// Roles compare by their upper-case name. A leading `ROLE_` authority prefix
/// (as emitted by some servers) is stripped on construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("ADMIN"));
    pub const APPROVISIONNEMENT: Role = Role(Cow::Borrowed("APPROVISIONNEMENT"));
    pub const PRODUCTION: Role = Role(Cow::Borrowed("PRODUCTION"));
    pub const LIVRAISON: Role = Role(Cow::Borrowed("LIVRAISON"));

    /// Build a role from any textual name.
    pub fn new(name: impl AsRef<str>) -> Self {
        let upper = name.as_ref().trim().to_uppercase();
        let bare = upper.strip_prefix("ROLE_").unwrap_or(&upper);
        Role(Cow::Owned(bare.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::new(value)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::new(value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.0.into_owned()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a comma separated role list (`"ADMIN, production"`).
pub fn parse_roles(list: &str) -> BTreeSet<Role> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Role::new)
        .collect()
}

// =============================================================================
// UserProfile
// =============================================================================

/// Cached copy of the authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "fullName", default)]
    pub display_name: String,
    pub email: String,
    #[serde(default)]
    pub roles: BTreeSet<Role>,
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl UserProfile {
    /// Derive a profile from token claims, used when nothing better is cached.
    pub fn from_claims(claims: &DecodedClaims) -> Self {
        Self {
            id: claims.sub.clone(),
            display_name: display_name_from_email(&claims.email),
            email: claims.email.clone(),
            roles: claims.roles.clone(),
            active: true,
        }
    }
}

/// Local part of an email address, used as a fallback display name.
pub fn display_name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or_default().to_string()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

// =============================================================================
// Credential
// =============================================================================

/// The access/refresh token pair identifying an authenticated session.
///
/// `issued_at` and `expires_at` are read from the access-token claims and are
/// `None` when the token cannot be introspected.
#[derive(Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: Option<i64>,
    pub expires_at: Option<i64>,
}

impl Credential {
    /// Create a credential, deriving timestamps from the access token.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        let access_token = access_token.into();
        let claims = token::decode(&access_token).ok();
        Self {
            issued_at: claims.as_ref().and_then(|c| c.iat),
            expires_at: claims.as_ref().and_then(|c| c.exp),
            access_token,
            refresh_token: refresh_token.into(),
        }
    }

    /// Whether the access token is expired with the given skew.
    pub fn is_expired(&self, skew_secs: i64) -> bool {
        token::is_expired(&self.access_token, skew_secs)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Wire DTOs
// =============================================================================

/// Body of `POST /auth/login`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remember_me: Option<bool>,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            remember_me: None,
        }
    }

    pub fn remember(mut self, remember_me: bool) -> Self {
        self.remember_me = Some(remember_me);
        self
    }

    pub fn persist_refresh(&self) -> bool {
        self.remember_me.unwrap_or(false)
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("remember_me", &self.remember_me)
            .finish()
    }
}

/// Response of `POST /auth/login`.
///
/// Servers answer either with a nested `user` object or with the flat
/// `userId` / `email` / `role` fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl LoginResponse {
    /// Resolve the user profile from the response, falling back to claims.
    pub fn profile(&self) -> Option<UserProfile> {
        if let Some(user) = &self.user {
            return Some(user.clone());
        }
        if let (Some(id), Some(email)) = (&self.user_id, &self.email) {
            return Some(UserProfile {
                id: id.clone(),
                display_name: display_name_from_email(email),
                email: email.clone(),
                roles: self.role.iter().cloned().collect(),
                active: true,
            });
        }
        token::decode(&self.access_token)
            .ok()
            .map(|claims| UserProfile::from_claims(&claims))
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "string_or_number")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

/// Body of `POST /auth/refresh` and `POST /auth/logout`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Response of `POST /auth/refresh`. `refresh_token` is present only when the
/// server rotates it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}
