//! Shared error classification.
//!
//! Every layer has its own `thiserror` enum; this trait gives them a common,
//! grepable code and a retryable flag so the UI layer can decide whether to
//! offer a "try again" affordance without matching on concrete types.

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for user-facing notifications.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
