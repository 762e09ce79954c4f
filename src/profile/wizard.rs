//! Headless model of the multi-step profile editor.
//!
//! The screens only collect strings; this module decides which fields each
//! step requires and turns a finished draft into a [`ProfilePatch`]. Nothing
//! here talks to the backend, so a failing step never costs a round-trip.

#[cfg(test)]
#[path = "wizard_test.rs"]
mod tests;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{ProfilePatch, Role, UserProfile};
use crate::validate::{ValidationError, is_filled};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Basics,
    Location,
    About,
    Interests,
}

impl WizardStep {
    pub const ALL: [Self; 4] = [Self::Basics, Self::Location, Self::About, Self::Interests];

    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Basics => Some(Self::Location),
            Self::Location => Some(Self::About),
            Self::About => Some(Self::Interests),
            Self::Interests => None,
        }
    }

    #[must_use]
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::Basics => None,
            Self::Location => Some(Self::Basics),
            Self::About => Some(Self::Location),
            Self::Interests => Some(Self::About),
        }
    }
}

/// Controlled-input state for the editor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub name: String,
    pub role: Option<Role>,
    pub country: String,
    pub city: String,
    pub occupation: String,
    pub bio: String,
    pub interests: BTreeSet<String>,
    pub profile_image: Option<String>,
}

impl ProfileDraft {
    /// Pre-fill the editor from an existing profile.
    #[must_use]
    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            name: profile.name.clone(),
            role: Some(profile.role.clone()),
            country: profile.country.clone(),
            city: profile.city.clone(),
            occupation: profile.occupation.clone(),
            bio: profile.bio.clone(),
            interests: profile.interests.clone(),
            profile_image: profile.profile_image.clone(),
        }
    }

    /// Add a tag; blank tags are ignored. Returns whether it was new.
    pub fn add_interest(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() {
            return false;
        }
        self.interests.insert(tag.to_owned())
    }

    pub fn remove_interest(&mut self, tag: &str) -> bool {
        self.interests.remove(tag.trim())
    }

    fn missing_for(&self, step: WizardStep) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match step {
            WizardStep::Basics => {
                if !is_filled(&self.name) {
                    missing.push("name");
                }
                if !self.role.as_ref().is_some_and(|r| is_filled(r.as_str())) {
                    missing.push("role");
                }
            }
            WizardStep::Location => {
                if !is_filled(&self.country) {
                    missing.push("country");
                }
                if !is_filled(&self.city) {
                    missing.push("city");
                }
            }
            WizardStep::About => {
                if !is_filled(&self.occupation) {
                    missing.push("occupation");
                }
            }
            WizardStep::Interests => {
                if self.interests.is_empty() {
                    missing.push("interests");
                }
            }
        }
        missing
    }

    /// Check the required fields of one step.
    pub fn validate_step(&self, step: WizardStep) -> Result<(), ValidationError> {
        let missing = self.missing_for(step);
        if missing.is_empty() { Ok(()) } else { Err(ValidationError::MissingFields(missing)) }
    }

    /// Check every step, reporting all missing fields at once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let missing: Vec<_> = WizardStep::ALL
            .into_iter()
            .flat_map(|step| self.missing_for(step))
            .collect();
        if missing.is_empty() { Ok(()) } else { Err(ValidationError::MissingFields(missing)) }
    }

    /// Convert a complete draft into a full-profile patch with trimmed text.
    pub fn into_patch(self) -> Result<ProfilePatch, ValidationError> {
        self.validate()?;
        Ok(ProfilePatch {
            name: Some(self.name.trim().to_owned()),
            role: self.role,
            country: Some(self.country.trim().to_owned()),
            city: Some(self.city.trim().to_owned()),
            occupation: Some(self.occupation.trim().to_owned()),
            bio: Some(self.bio.trim().to_owned()),
            interests: Some(self.interests),
            profile_image: self.profile_image,
        })
    }
}
