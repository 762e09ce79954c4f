//! Profile loader: one row fetch, mapped to a [`UserProfile`].

#[cfg(test)]
#[path = "loader_test.rs"]
mod tests;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{BackendError, IdentityBackend};
use crate::profile::UserProfile;

/// Outcome of a profile load. "No row" and "backend failed" are kept apart
/// even though both leave the user signed out in the view.
#[derive(Debug)]
pub enum ProfileLoad {
    Found(UserProfile),
    /// Signed up, but the profile row has not been created yet.
    Missing,
    Failed(BackendError),
}

pub struct ProfileLoader {
    backend: Arc<dyn IdentityBackend>,
}

impl ProfileLoader {
    #[must_use]
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self { backend }
    }

    /// Fetch and map the profile for `user_id`. `email` is the session's
    /// identity claim and overrides the stored column.
    pub async fn load_profile(&self, user_id: &str, email: Option<&str>) -> ProfileLoad {
        match self.backend.fetch_profile_row(user_id).await {
            Ok(Some(row)) => {
                debug!(%user_id, "profile loaded");
                ProfileLoad::Found(UserProfile::from_row(row, email))
            }
            Ok(None) => {
                info!(%user_id, "no profile row for signed-in user");
                ProfileLoad::Missing
            }
            Err(e) => {
                warn!(%user_id, error = %e, "profile load failed");
                ProfileLoad::Failed(e)
            }
        }
    }
}
