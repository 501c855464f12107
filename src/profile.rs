//! Stored search preferences and the caller identity used to look them up.
//!
//! Both are collaborators owned outside this crate; the traits here are the
//! only surface the search path consumes.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use http::HeaderMap;
use serde::Deserialize;
use tracing::debug;

use crate::entities::trial::{SearchCriteria, SortMode};
use crate::error::TrialFinderError;

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchProfile {
    pub zip: Option<String>,
    pub radius: Option<f64>,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub phase: Option<String>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<Option<SearchProfile>, TrialFinderError>;
}

pub trait SessionIdentity: Send + Sync {
    fn current_user(&self, headers: &HeaderMap) -> Option<String>;
}

/// Store for deployments without profiles.
pub struct NoProfiles;

#[async_trait]
impl ProfileStore for NoProfiles {
    async fn get_profile(&self, _user_id: &str) -> Result<Option<SearchProfile>, TrialFinderError> {
        Ok(None)
    }
}

/// Read-only profiles loaded once from `{"<userId>": {zip, radius, age, gender, phase}}`.
#[derive(Debug, Default)]
pub struct JsonProfileStore {
    profiles: HashMap<String, SearchProfile>,
}

impl JsonProfileStore {
    pub fn from_json(text: &str) -> Result<Self, TrialFinderError> {
        let profiles = serde_json::from_str::<HashMap<String, SearchProfile>>(text)?;
        Ok(Self { profiles })
    }

    pub async fn from_path(path: &Path) -> Result<Self, TrialFinderError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|err| {
            TrialFinderError::Config(format!(
                "cannot read profiles file {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json(&text).map_err(|err| {
            TrialFinderError::Config(format!(
                "invalid profiles file {}: {err}",
                path.display()
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl ProfileStore for JsonProfileStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<SearchProfile>, TrialFinderError> {
        Ok(self.profiles.get(user_id).cloned())
    }
}

/// Trusts the user id forwarded by an authenticating reverse proxy.
pub struct HeaderIdentity;

impl SessionIdentity for HeaderIdentity {
    fn current_user(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Treats every caller as anonymous.
pub struct Anonymous;

impl SessionIdentity for Anonymous {
    fn current_user(&self, _headers: &HeaderMap) -> Option<String> {
        None
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// Fills criteria fields the request left empty. A profile ZIP also makes
/// distance the default ordering when the request named no sort.
pub fn apply_profile(criteria: &mut SearchCriteria, profile: &SearchProfile, sort_explicit: bool) {
    let mut zip_from_profile = false;
    if is_blank(&criteria.location_zip) && !is_blank(&profile.zip) {
        criteria.location_zip = profile.zip.clone();
        zip_from_profile = true;
    }
    if criteria.radius_miles.is_none() {
        criteria.radius_miles = profile.radius.filter(|r| r.is_finite() && *r > 0.0);
    }
    if criteria.min_age.is_none() {
        criteria.min_age = profile.age;
    }
    if is_blank(&criteria.gender) {
        criteria.gender = profile.gender.clone();
    }
    if is_blank(&criteria.phase) {
        criteria.phase = profile.phase.clone();
    }
    if !sort_explicit && zip_from_profile {
        criteria.sort_mode = SortMode::Distance;
    }
    debug!(zip_from_profile, "Applied stored search profile");
}
