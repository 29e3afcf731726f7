//! HTTP Basic Authentication
//!
//! Optional layer enabled by `webserver.auth: basic-auth`. Credentials load
//! from a file of `user:bcrypt-hash` lines; verification runs against the
//! stored hash on every request. Unauthenticated requests get the standard
//! 401 challenge.

use anyhow::{Context as _, Result};
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_AUTH_FILE: &str = "./auth.env";

pub struct AuthUsers {
    users: HashMap<String, String>,
}

impl AuthUsers {
    /// Loads the credentials file. Malformed lines are a startup error, not
    /// something to discover at request time.
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read auth file {}", path))?;

        let mut users = HashMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (user, hash) = line
                .split_once(':')
                .with_context(|| format!("invalid auth line: {}", line))?;
            users.insert(user.to_string(), hash.trim().to_string());
        }

        tracing::info!("loaded {} user(s) from {}", users.len(), path);
        Ok(AuthUsers { users })
    }

    pub fn verify(&self, user: &str, password: &str) -> bool {
        match self.users.get(user) {
            Some(hash) => bcrypt::verify(password, hash).unwrap_or(false),
            None => false,
        }
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        AuthUsers {
            users: pairs
                .iter()
                .map(|(u, h)| (u.to_string(), h.to_string()))
                .collect(),
        }
    }
}

/// Axum middleware enforcing basic auth against the loaded credentials.
pub async fn basic_auth_middleware(
    Extension(users): Extension<Arc<AuthUsers>>,
    request: Request,
    next: Next,
) -> Response {
    match credentials_from(&request) {
        Some((user, password)) if users.verify(&user, &password) => next.run(request).await,
        _ => challenge(),
    }
}

fn credentials_from(request: &Request) -> Option<(String, String)> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn challenge() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic")],
        "",
    )
        .into_response()
}
