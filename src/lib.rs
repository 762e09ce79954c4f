//! Passport Pals client core.
//!
//! Keeps the signed-in user's profile in sync with a hosted identity backend:
//! restores a persisted session, follows auth notifications, loads and updates
//! the `profiles` row, and exposes a single derived [`auth::AuthViewState`] to
//! the UI through [`auth::AuthFacade`].
//!
//! LAYOUT
//! ======
//! - [`backend`]: the [`backend::IdentityBackend`] seam with REST and
//!   in-memory implementations.
//! - [`auth`]: session tracking, profile loading, and the facade.
//! - [`profile`]: row and profile types plus the onboarding wizard draft.
//! - [`validate`]: input checks that run before any backend call.
//! - [`config`]: environment-driven configuration.

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod profile;
pub mod validate;
