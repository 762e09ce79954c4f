//! HTTP client for the hosted identity + table backend.
//!
//! Thin wrapper over the GoTrue-style `/auth/v1/*` endpoints and the
//! PostgREST-style `/rest/v1/<table>` endpoint. Response parsing lives in pure
//! functions so it can be tested without a server.
//!
//! SESSION LIFECYCLE
//! =================
//! The signed-in session is cached in memory and mirrored to a
//! [`SessionStore`] file. Every change to it goes through [`RestBackend::adopt`]
//! or [`RestBackend::forget`], which also emit the matching auth event.

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::RequestBuilder;
use tracing::{info, warn};

use super::store::SessionStore;
use super::{AuthBroadcaster, AuthEvent, AuthSubscription, BackendError, IdentityBackend, Session, now_unix};
use crate::config::BackendConfig;
use crate::profile::{ProfileRow, ProfileUpdate};

// =============================================================================
// CLIENT
// =============================================================================

pub struct RestBackend {
    http: reqwest::Client,
    config: BackendConfig,
    store: SessionStore,
    session: Mutex<Option<Session>>,
    events: AuthBroadcaster,
}

impl RestBackend {
    /// Build the HTTP client and load any persisted session.
    ///
    /// An unreadable session file is logged and treated as signed out.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub async fn connect(config: BackendConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| BackendError::HttpClientBuild(e.to_string()))?;
        let store = SessionStore::new(config.session_file.clone());
        let session = match store.load().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable session store");
                None
            }
        };
        Ok(Self { http, config, store, session: Mutex::new(session), events: AuthBroadcaster::new() })
    }

    /// Complete an emailed sign-in out of band by verifying its one-time code.
    ///
    /// On success the new session is persisted and `SIGNED_IN` is emitted.
    pub async fn verify_email_otp(&self, email: &str, token: &str) -> Result<Session, BackendError> {
        let body = VerifyRequest { kind: "email", email, token };
        let request = self.http.post(auth_endpoint(&self.config.url, "verify")).json(&body);
        let text = self.send(self.with_key(request, None)).await?;
        let session = parse_session_response(&text, now_unix())?;
        self.adopt(AuthEvent::SignedIn, session.clone()).await;
        Ok(session)
    }

    fn current(&self) -> Option<Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_current(&self, session: Option<Session>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Make `session` current, persist it, and notify listeners.
    async fn adopt(&self, event: AuthEvent, session: Session) {
        if let Err(e) = self.store.save(&session).await {
            warn!(error = %e, "session not persisted; it will not survive a restart");
        }
        info!(user_id = %session.user_id, %event, "session adopted");
        self.set_current(Some(session.clone()));
        self.events.emit(event, Some(session));
    }

    /// Drop the current session locally and notify listeners.
    async fn forget(&self) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear persisted session");
        }
        self.set_current(None);
        self.events.emit(AuthEvent::SignedOut, None);
    }

    /// Attach the API key and a bearer token (the session's, or the key itself).
    fn with_key(&self, request: RequestBuilder, session: Option<&Session>) -> RequestBuilder {
        let bearer = session.map_or(self.config.anon_key.as_str(), |s| s.access_token.as_str());
        request
            .header("apikey", &self.config.anon_key)
            .bearer_auth(bearer)
    }

    fn with_redirect(&self, request: RequestBuilder, redirect_url: Option<&str>) -> RequestBuilder {
        match redirect_url {
            Some(url) => request.query(&[("redirect_to", url)]),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(BackendError::Response { status, message: error_message(&text) });
        }
        Ok(text)
    }

    async fn refresh(&self, session: &Session) -> Result<Session, BackendError> {
        let body = RefreshRequest { refresh_token: &session.refresh_token };
        let request = self
            .http
            .post(auth_endpoint(&self.config.url, "token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&body);
        let text = self.send(self.with_key(request, None)).await?;
        parse_session_response(&text, now_unix())
    }
}

#[async_trait::async_trait]
impl IdentityBackend for RestBackend {
    async fn get_current_session(&self) -> Result<Option<Session>, BackendError> {
        let Some(session) = self.current() else {
            return Ok(None);
        };
        if !session.is_expired_at(now_unix()) {
            return Ok(Some(session));
        }
        match self.refresh(&session).await {
            Ok(fresh) => {
                self.adopt(AuthEvent::TokenRefreshed, fresh.clone()).await;
                Ok(Some(fresh))
            }
            Err(e @ BackendError::Response { status: 400..=499, .. }) => {
                warn!(user_id = %session.user_id, error = %e, "refresh token rejected; signing out");
                self.forget().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        self.events.subscribe(self.current())
    }

    async fn sign_in_with_email_link(&self, email: &str) -> Result<(), BackendError> {
        let body = OtpRequest { email, create_user: true };
        let request = self.http.post(auth_endpoint(&self.config.url, "otp")).json(&body);
        let request = self.with_redirect(request, self.config.redirect_url.as_deref());
        self.send(self.with_key(request, None)).await?;
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if let Some(session) = self.current() {
            let request = self.http.post(auth_endpoint(&self.config.url, "logout"));
            match self.send(self.with_key(request, Some(&session))).await {
                // An expired or already revoked token is as good as signed out.
                Ok(_) | Err(BackendError::Response { status: 401 | 403 | 404, .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.forget().await;
        Ok(())
    }

    async fn fetch_profile_row(&self, user_id: &str) -> Result<Option<ProfileRow>, BackendError> {
        let session = self.current();
        let request = self
            .http
            .get(table_endpoint(&self.config.url, &self.config.profile_table))
            .query(&[("id", id_filter(user_id).as_str()), ("select", "*")]);
        let text = self.send(self.with_key(request, session.as_ref())).await?;
        parse_profile_rows(&text)
    }

    async fn update_profile_row(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), BackendError> {
        let session = self.current().ok_or(BackendError::NoSession)?;
        let request = self
            .http
            .patch(table_endpoint(&self.config.url, &self.config.profile_table))
            .query(&[("id", id_filter(user_id))])
            .header("Prefer", "return=minimal")
            .json(update);
        self.send(self.with_key(request, Some(&session))).await?;
        Ok(())
    }

    async fn request_password_reset(&self, email: &str, redirect_url: &str) -> Result<(), BackendError> {
        let body = RecoverRequest { email };
        let request = self.http.post(auth_endpoint(&self.config.url, "recover")).json(&body);
        let request = self.with_redirect(request, Some(redirect_url));
        self.send(self.with_key(request, None)).await?;
        Ok(())
    }

    async fn set_new_password(&self, new_password: &str) -> Result<(), BackendError> {
        let session = self.current().ok_or(BackendError::NoSession)?;
        let body = PasswordRequest { password: new_password };
        let request = self.http.put(auth_endpoint(&self.config.url, "user")).json(&body);
        self.send(self.with_key(request, Some(&session))).await?;
        self.events.emit(AuthEvent::UserUpdated, Some(session));
        Ok(())
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(serde::Serialize)]
struct OtpRequest<'a> {
    email: &'a str,
    create_user: bool,
}

#[derive(serde::Serialize)]
struct VerifyRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    email: &'a str,
    token: &'a str,
}

#[derive(serde::Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(serde::Serialize)]
struct RecoverRequest<'a> {
    email: &'a str,
}

#[derive(serde::Serialize)]
struct PasswordRequest<'a> {
    password: &'a str,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: TokenUser,
}

#[derive(serde::Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

// =============================================================================
// ENDPOINTS
// =============================================================================

fn auth_endpoint(base_url: &str, path: &str) -> String {
    format!("{base_url}/auth/v1/{path}")
}

fn table_endpoint(base_url: &str, table: &str) -> String {
    format!("{base_url}/rest/v1/{table}")
}

fn id_filter(user_id: &str) -> String {
    format!("eq.{user_id}")
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_session_response(json: &str, now_unix: i64) -> Result<Session, BackendError> {
    let resp: TokenResponse = serde_json::from_str(json).map_err(|e| BackendError::Parse(e.to_string()))?;
    let expires_at = resp
        .expires_at
        .or_else(|| resp.expires_in.map(|secs| now_unix + secs))
        .ok_or_else(|| BackendError::Parse("token response has no expiry".into()))?;
    Ok(Session {
        access_token: resp.access_token,
        refresh_token: resp.refresh_token,
        expires_at,
        user_id: resp.user.id,
        email: resp.user.email,
    })
}

/// A filtered select returns an array; zero rows is "no profile", more than
/// one means the table's one-row-per-user invariant is broken.
fn parse_profile_rows(json: &str) -> Result<Option<ProfileRow>, BackendError> {
    let rows: Vec<serde_json::Value> = serde_json::from_str(json).map_err(|e| BackendError::Parse(e.to_string()))?;
    if rows.len() > 1 {
        return Err(BackendError::MalformedRow(format!("expected at most one row, got {}", rows.len())));
    }
    rows.into_iter()
        .next()
        .map(|row| serde_json::from_value(row).map_err(|e| BackendError::MalformedRow(e.to_string())))
        .transpose()
}

/// Pull a human-readable message out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|key| v.get(key).and_then(serde_json::Value::as_str))
        })
        .map_or_else(|| body.trim().to_owned(), str::to_owned)
}
