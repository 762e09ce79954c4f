//! Application-level user profile and its backend row shape.
//!
//! DESIGN
//! ======
//! [`ProfileRow`] mirrors the `profiles` table column-for-column;
//! [`UserProfile`] is what the UI consumes. The mapping between them is field
//! renames only, so overlapping loads for the same user always produce the
//! same profile.

pub mod wizard;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// =============================================================================
// ROLE
// =============================================================================

/// Occupation category shown on a profile.
///
/// Backend values outside the known list are kept verbatim in
/// [`Role::Other`] so a newer schema never fails to load.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Student,
    Professional,
    Entrepreneur,
    DigitalNomad,
    Retiree,
    Other(String),
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Student => "student",
            Self::Professional => "professional",
            Self::Entrepreneur => "entrepreneur",
            Self::DigitalNomad => "digital_nomad",
            Self::Retiree => "retiree",
            Self::Other(tag) => tag,
        }
    }

    /// Whether this is one of the roles the UI offers in its picker.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "student" => Self::Student,
            "professional" => Self::Professional,
            "entrepreneur" => Self::Entrepreneur,
            "digital_nomad" => Self::DigitalNomad,
            "retiree" => Self::Retiree,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for Role {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_owned())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// BACKEND ROW
// =============================================================================

/// One row of the `profiles` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub interests: Option<Vec<String>>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl ProfileRow {
    /// Apply a partial update in place, the way the table would.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        let patch = &update.patch;
        if let Some(name) = &patch.name {
            self.name.clone_from(name);
        }
        if let Some(role) = &patch.role {
            self.role = role.clone();
        }
        if let Some(country) = &patch.country {
            self.country = Some(country.clone());
        }
        if let Some(city) = &patch.city {
            self.city = Some(city.clone());
        }
        if let Some(occupation) = &patch.occupation {
            self.occupation = Some(occupation.clone());
        }
        if let Some(bio) = &patch.bio {
            self.bio = Some(bio.clone());
        }
        if let Some(interests) = &patch.interests {
            self.interests = Some(interests.iter().cloned().collect());
        }
        if let Some(image) = &patch.profile_image {
            self.profile_image_url = Some(image.clone());
        }
        self.updated_at = Some(update.updated_at);
    }
}

// =============================================================================
// USER PROFILE
// =============================================================================

/// In-memory user record consumed by the UI tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub country: String,
    pub city: String,
    pub occupation: String,
    pub bio: String,
    pub interests: BTreeSet<String>,
    pub profile_image: Option<String>,
    pub verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl UserProfile {
    /// Map a backend row to a profile.
    ///
    /// `session_email` is the identity claim from the current session; it
    /// wins over the stored column, which may be stale.
    #[must_use]
    pub fn from_row(row: ProfileRow, session_email: Option<&str>) -> Self {
        let email = match session_email {
            Some(claim) => claim.to_owned(),
            None => row.email.unwrap_or_default(),
        };
        Self {
            id: row.id,
            name: row.name,
            email,
            role: row.role,
            country: row.country.unwrap_or_default(),
            city: row.city.unwrap_or_default(),
            occupation: row.occupation.unwrap_or_default(),
            bio: row.bio.unwrap_or_default(),
            interests: row.interests.unwrap_or_default().into_iter().collect(),
            profile_image: row.profile_image_url,
            verified: row.is_verified,
            created_at: row.created_at,
        }
    }

    /// Merge the fields present in `patch` into this profile.
    pub fn merge(&mut self, patch: &ProfilePatch) {
        if let Some(name) = &patch.name {
            self.name.clone_from(name);
        }
        if let Some(role) = &patch.role {
            self.role = role.clone();
        }
        if let Some(country) = &patch.country {
            self.country.clone_from(country);
        }
        if let Some(city) = &patch.city {
            self.city.clone_from(city);
        }
        if let Some(occupation) = &patch.occupation {
            self.occupation.clone_from(occupation);
        }
        if let Some(bio) = &patch.bio {
            self.bio.clone_from(bio);
        }
        if let Some(interests) = &patch.interests {
            self.interests.clone_from(interests);
        }
        if let Some(image) = &patch.profile_image {
            self.profile_image = Some(image.clone());
        }
    }
}

// =============================================================================
// UPDATES
// =============================================================================

/// Partial profile update. Absent fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interests: Option<BTreeSet<String>>,
    #[serde(rename = "profile_image_url", skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl ProfilePatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A patch as sent to the table, stamped with its write time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(flatten)]
    pub patch: ProfilePatch,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ProfileUpdate {
    /// Stamp `patch` with the current time.
    #[must_use]
    pub fn stamped(patch: ProfilePatch) -> Self {
        Self { patch, updated_at: OffsetDateTime::now_utc() }
    }
}
