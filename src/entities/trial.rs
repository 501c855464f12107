use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{MemoryCache, ResultCache};
use crate::config::Settings;
use crate::entities::ranking;
use crate::error::TrialFinderError;
use crate::geo::GeoPoint;
use crate::sources::clinicaltrials::{ClinicalTrialsClient, CtGovSearchParams, registry_enum};
use crate::sources::zipcodes::ZipGeocoder;

const CACHE_KEY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialSite {
    pub facility: String,
    pub city: String,
    pub state: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_point: Option<GeoPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgeRange {
    pub min: String,
    pub max: String,
}

/// Flat record produced from one registry study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub id: String,
    pub title: String,
    pub status: String,
    pub conditions: Vec<String>,
    pub locations: Vec<TrialSite>,
    pub start_date: String,
    pub last_update_date: Option<String>,
    pub phase: Vec<String>,
    pub age_range: AgeRange,
    /// `None` means all sexes are eligible.
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest_distance_miles: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Recent,
    Distance,
    Phase,
}

impl SortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recent => "recent",
            Self::Distance => "distance",
            Self::Phase => "phase",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = TrialFinderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recent" | "" => Ok(Self::Recent),
            "distance" | "nearest" => Ok(Self::Distance),
            "phase" => Ok(Self::Phase),
            other => Err(TrialFinderError::InvalidArgument(format!(
                "sort must be one of recent, distance, phase (got '{other}')"
            ))),
        }
    }
}

/// One search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchCriteria {
    pub condition: Option<String>,
    pub location_zip: Option<String>,
    /// Only meaningful together with `location_zip`.
    pub radius_miles: Option<f64>,
    pub min_age: Option<u32>,
    pub gender: Option<String>,
    pub phase: Option<String>,
    pub sort_mode: SortMode,
    pub page_token: Option<String>,
    /// Empty means the registry default of actively recruiting statuses.
    pub statuses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialSearchPage {
    pub trials: Vec<Trial>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
}

fn clean_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl SearchCriteria {
    /// Trims text fields and drops values that cannot influence the search
    /// (blank strings, non-positive or non-finite radius).
    pub fn normalized(&self) -> Self {
        let mut statuses = self
            .statuses
            .iter()
            .filter_map(|s| clean_opt(Some(s.as_str())))
            .collect::<Vec<_>>();
        statuses.sort_by_key(|s| s.to_ascii_lowercase());
        statuses.dedup_by(|a, b| a.eq_ignore_ascii_case(b));

        Self {
            condition: clean_opt(self.condition.as_deref()),
            location_zip: clean_opt(self.location_zip.as_deref()),
            radius_miles: self.radius_miles.filter(|r| r.is_finite() && *r > 0.0),
            min_age: self.min_age,
            gender: clean_opt(self.gender.as_deref()),
            phase: clean_opt(self.phase.as_deref()),
            sort_mode: self.sort_mode,
            page_token: clean_opt(self.page_token.as_deref()),
            statuses,
        }
    }

    /// Stable key over every field that changes result content or order.
    pub fn cache_key(&self) -> String {
        let c = self.normalized();
        let mut statuses = c
            .statuses
            .iter()
            .map(|s| registry_enum(s))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        statuses.sort();
        statuses.dedup();
        let payload = serde_json::json!({
            "schema_version": CACHE_KEY_SCHEMA_VERSION,
            "condition": c.condition.map(|v| v.to_lowercase()),
            "location_zip": c.location_zip,
            "radius_miles": c.radius_miles,
            "min_age": c.min_age,
            "gender": c.gender.map(|v| v.to_ascii_lowercase()),
            "phase": c.phase.map(|v| v.to_ascii_lowercase()),
            "sort_mode": c.sort_mode.as_str(),
            "page_token": c.page_token,
            "statuses": statuses,
        });
        format!("{:x}", md5::compute(payload.to_string().as_bytes()))
    }

    fn to_registry_params(&self, page_size: usize) -> CtGovSearchParams {
        CtGovSearchParams {
            condition: self.condition.clone(),
            statuses: self.statuses.clone(),
            min_age: self.min_age,
            sex: self.gender.clone(),
            phase: self.phase.clone(),
            page_size,
            page_token: self.page_token.clone(),
        }
    }
}

/// Human-readable summary of the active filters, used in CLI headings.
pub fn search_query_summary(criteria: &SearchCriteria) -> String {
    let c = criteria.normalized();
    let mut parts: Vec<String> = Vec::new();
    if let Some(v) = c.condition {
        parts.push(format!("condition={v}"));
    }
    if let Some(v) = c.location_zip {
        parts.push(format!("zip={v}"));
    }
    if let Some(v) = c.radius_miles {
        parts.push(format!("radius={v}mi"));
    }
    if let Some(v) = c.min_age {
        parts.push(format!("age={v}"));
    }
    if let Some(v) = c.gender {
        parts.push(format!("gender={v}"));
    }
    if let Some(v) = c.phase {
        parts.push(format!("phase={v}"));
    }
    if !c.statuses.is_empty() {
        parts.push(format!("status={}", c.statuses.join("|")));
    }
    parts.push(format!("sort={}", c.sort_mode));
    parts.join(", ")
}

fn nct_id_pattern() -> &'static Regex {
    static NCT_RE: OnceLock<Regex> = OnceLock::new();
    NCT_RE.get_or_init(|| Regex::new(r"(?i)^NCT\d{8}$").expect("valid regex"))
}

pub(crate) fn normalize_nct_id(raw: &str) -> Result<String, TrialFinderError> {
    let id = raw.trim();
    if !nct_id_pattern().is_match(id) {
        return Err(TrialFinderError::InvalidArgument(format!(
            "'{id}' is not an NCT number (expected NCT followed by 8 digits)"
        )));
    }
    Ok(id.to_ascii_uppercase())
}

/// Runs the search pipeline: cache, registry fetch, normalization, distance
/// annotation, local filters, and ranking.
///
/// Concurrent misses on the same key each fetch upstream; there is no
/// request coalescing.
pub struct TrialSearchEngine {
    client: ClinicalTrialsClient,
    geocoder: Arc<ZipGeocoder>,
    cache: Arc<dyn ResultCache>,
    page_size: usize,
}

impl TrialSearchEngine {
    pub fn new(
        client: ClinicalTrialsClient,
        geocoder: Arc<ZipGeocoder>,
        cache: Arc<dyn ResultCache>,
        page_size: usize,
    ) -> Self {
        Self {
            client,
            geocoder,
            cache,
            page_size: page_size.max(1),
        }
    }

    /// Wires the engine from settings with an in-memory result cache.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be built or the ZIP table
    /// override cannot be read.
    pub fn from_settings(settings: &Settings) -> Result<Self, TrialFinderError> {
        Ok(Self::new(
            ClinicalTrialsClient::new(settings)?,
            Arc::new(ZipGeocoder::from_settings(settings)?),
            Arc::new(MemoryCache::new(settings.cache_ttl)),
            settings.page_size,
        ))
    }

    async fn cached(&self, key: &str) -> Option<TrialSearchPage> {
        match self.cache.get(key).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(error = %err, "Result cache read failed; treating as miss");
                None
            }
        }
    }

    async fn store(&self, key: &str, page: &TrialSearchPage) {
        if let Err(err) = self.cache.set(key, page).await {
            warn!(error = %err, "Result cache write failed; continuing without caching");
        }
    }

    /// Searches the registry and returns one ranked page.
    ///
    /// # Errors
    ///
    /// Only registry failures (transport, HTTP status, unusable payload) are
    /// returned; bad ZIPs, unlocated sites, and empty condition matches degrade
    /// silently.
    pub async fn search(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<TrialSearchPage, TrialFinderError> {
        let criteria = criteria.normalized();
        let key = criteria.cache_key();
        if let Some(hit) = self.cached(&key).await {
            debug!(key = %key, "Result cache hit");
            return Ok(hit);
        }

        let origin = criteria
            .location_zip
            .as_deref()
            .and_then(|zip| self.geocoder.resolve(zip));
        if criteria.location_zip.is_some() && origin.is_none() {
            debug!(zip = ?criteria.location_zip, "No origin for ZIP; distance data disabled");
        }

        let response = self
            .client
            .search_page(&criteria.to_registry_params(self.page_size))
            .await?;

        let mut trials = crate::transform::trial::normalize(&response.studies);
        if let Some(origin) = origin {
            ranking::annotate_distances(&mut trials, origin);
        }

        let mut trials = ranking::filter_by_condition(trials, criteria.condition.as_deref());
        if let (Some(radius), Some(_)) = (criteria.radius_miles, origin) {
            trials = ranking::filter_by_radius(trials, radius);
        }
        let applied = ranking::sort_trials(&mut trials, criteria.sort_mode, origin.is_some());
        if applied != criteria.sort_mode {
            debug!(requested = %criteria.sort_mode, applied = %applied, "Sort mode fell back");
        }

        let page = TrialSearchPage {
            trials,
            next_page_token: clean_opt(response.next_page_token.as_deref()),
            total_count: response.total_count,
        };
        self.store(&key, &page).await;
        Ok(page)
    }

    /// Fetches and normalizes a single study by NCT number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed id, `NotFound` when the registry
    /// has no such study, and registry errors otherwise.
    pub async fn get(&self, nct_id: &str) -> Result<Trial, TrialFinderError> {
        let nct_id = normalize_nct_id(nct_id)?;
        let study = self.client.get_study(&nct_id).await?;
        let mut trial = crate::transform::trial::from_ctgov_study(&study);
        if trial.id.is_empty() {
            trial.id = nct_id;
        }
        Ok(trial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::geo::EARTH_RADIUS_MILES;

    const JAX_LAT: f64 = 30.3253;
    const JAX_LON: f64 = -81.649;

    fn miles_north(miles: f64) -> f64 {
        JAX_LAT + (miles / EARTH_RADIUS_MILES).to_degrees()
    }

    fn study(id: &str, conditions: &[&str], geo: Option<(f64, f64)>, updated: &str) -> serde_json::Value {
        let mut location = json!({
            "facility": format!("{id} Clinic"),
            "city": "Jacksonville",
            "state": "Florida",
            "country": "United States"
        });
        if let Some((lat, lon)) = geo {
            location["geoPoint"] = json!({"lat": lat, "lon": lon});
        }
        json!({
            "protocolSection": {
                "identificationModule": {"nctId": id, "briefTitle": format!("Study {id}")},
                "statusModule": {
                    "overallStatus": "RECRUITING",
                    "startDateStruct": {"date": "2022-01"},
                    "lastUpdateSubmitDate": updated
                },
                "conditionsModule": {"conditions": conditions},
                "designModule": {"phases": ["PHASE2"]},
                "contactsLocationsModule": {"locations": [location]}
            }
        })
    }

    fn engine(server: &MockServer, cache: Arc<dyn ResultCache>) -> TrialSearchEngine {
        TrialSearchEngine::new(
            ClinicalTrialsClient::new_for_test(server.uri()).unwrap(),
            Arc::new(ZipGeocoder::parse(&format!("32202,{JAX_LAT},{JAX_LON}\n"))),
            cache,
            20,
        )
    }

    fn memory_cache() -> Arc<dyn ResultCache> {
        Arc::new(MemoryCache::new(Duration::from_secs(300)))
    }

    struct BrokenCache;

    #[async_trait]
    impl ResultCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<TrialSearchPage>, TrialFinderError> {
            Err(TrialFinderError::CacheUnavailable("connection refused".into()))
        }

        async fn set(&self, _key: &str, _page: &TrialSearchPage) -> Result<(), TrialFinderError> {
            Err(TrialFinderError::CacheUnavailable("connection refused".into()))
        }
    }

    #[test]
    fn sort_mode_parses_known_values() {
        assert_eq!("distance".parse::<SortMode>().unwrap(), SortMode::Distance);
        assert_eq!(" Phase ".parse::<SortMode>().unwrap(), SortMode::Phase);
        assert_eq!("".parse::<SortMode>().unwrap(), SortMode::Recent);
        assert!("closest-first".parse::<SortMode>().is_err());
    }

    #[test]
    fn cache_key_discriminates_sort_mode_and_page_token() {
        let base = SearchCriteria {
            condition: Some("diabetes".into()),
            location_zip: Some("32202".into()),
            radius_miles: Some(25.0),
            ..Default::default()
        };
        let by_distance = SearchCriteria {
            sort_mode: SortMode::Distance,
            ..base.clone()
        };
        let next_page = SearchCriteria {
            page_token: Some("tok".into()),
            ..base.clone()
        };
        assert_ne!(base.cache_key(), by_distance.cache_key());
        assert_ne!(base.cache_key(), next_page.cache_key());
    }

    #[test]
    fn cache_key_ignores_cosmetic_differences() {
        let a = SearchCriteria {
            condition: Some("Diabetes ".into()),
            statuses: vec!["Recruiting".into(), "Completed".into()],
            gender: Some("".into()),
            ..Default::default()
        };
        let b = SearchCriteria {
            condition: Some("diabetes".into()),
            statuses: vec!["COMPLETED".into(), "recruiting".into(), "Recruiting".into()],
            ..Default::default()
        };
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn normalized_drops_meaningless_radius() {
        let c = SearchCriteria {
            radius_miles: Some(-5.0),
            ..Default::default()
        };
        assert_eq!(c.normalized().radius_miles, None);
        let c = SearchCriteria {
            radius_miles: Some(f64::NAN),
            ..Default::default()
        };
        assert_eq!(c.normalized().radius_miles, None);
    }

    #[test]
    fn nct_ids_are_validated_and_uppercased() {
        assert_eq!(normalize_nct_id(" nct01234567 ").unwrap(), "NCT01234567");
        assert!(normalize_nct_id("NCT123").is_err());
        assert!(normalize_nct_id("01234567").is_err());
    }

    #[test]
    fn query_summary_lists_active_filters() {
        let summary = search_query_summary(&SearchCriteria {
            condition: Some("asthma".into()),
            location_zip: Some("32202".into()),
            radius_miles: Some(50.0),
            sort_mode: SortMode::Distance,
            ..Default::default()
        });
        assert_eq!(
            summary,
            "condition=asthma, zip=32202, radius=50mi, sort=distance"
        );
    }

    #[tokio::test]
    async fn diabetes_near_jacksonville_returns_only_the_close_trial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/studies"))
            .and(query_param("query.cond", "diabetes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "studies": [
                    study("NCT00000030", &["Diabetes"], Some((miles_north(30.0), JAX_LON)), "2024-01-01"),
                    study("NCT00000010", &["Diabetes"], Some((miles_north(10.0), JAX_LON)), "2023-01-01"),
                    study("NCT00000000", &["Diabetes"], None, "2025-01-01")
                ],
                "totalCount": 3
            })))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(&server, memory_cache());
        let page = engine
            .search(&SearchCriteria {
                condition: Some("diabetes".into()),
                location_zip: Some("32202".into()),
                radius_miles: Some(25.0),
                sort_mode: SortMode::Distance,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(page.trials.len(), 1);
        let trial = &page.trials[0];
        assert_eq!(trial.id, "NCT00000010");
        let distance = trial.nearest_distance_miles.expect("distance");
        assert!((distance - 10.0).abs() < 0.01, "got {distance}");
        assert_eq!(page.total_count, Some(3));
    }

    #[tokio::test]
    async fn repeat_query_is_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/studies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "studies": [study("NCT00000001", &["Asthma"], None, "2024-01-01")],
                "nextPageToken": "next-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(&server, memory_cache());
        let criteria = SearchCriteria {
            condition: Some("asthma".into()),
            ..Default::default()
        };
        let first = engine.search(&criteria).await.unwrap();
        let second = engine.search(&criteria).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.next_page_token.as_deref(), Some("next-1"));
    }

    #[tokio::test]
    async fn sort_modes_are_cached_separately() {
        let server = MockServer::start().await;
        let mut phase3 = study("NCT00000003", &["Asthma"], None, "2020-01-01");
        phase3["protocolSection"]["designModule"]["phases"] = json!(["PHASE3"]);
        Mock::given(method("GET"))
            .and(path("/studies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "studies": [study("NCT00000002", &["Asthma"], None, "2024-01-01"), phase3]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let engine = engine(&server, memory_cache());
        let recent = engine.search(&SearchCriteria::default()).await.unwrap();
        let by_phase = engine
            .search(&SearchCriteria {
                sort_mode: SortMode::Phase,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(recent.trials[0].id, "NCT00000002");
        assert_eq!(by_phase.trials[0].id, "NCT00000003");
    }

    #[tokio::test]
    async fn unknown_zip_degrades_to_recent_without_distances() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/studies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "studies": [
                    study("NCT00000001", &["Asthma"], Some((JAX_LAT, JAX_LON)), "2020-01-01"),
                    study("NCT00000002", &["Asthma"], None, "2024-01-01")
                ]
            })))
            .mount(&server)
            .await;

        let engine = engine(&server, memory_cache());
        let page = engine
            .search(&SearchCriteria {
                location_zip: Some("99999".into()),
                radius_miles: Some(5.0),
                sort_mode: SortMode::Distance,
                ..Default::default()
            })
            .await
            .unwrap();

        // No origin: radius is not applied and ordering is by recency.
        assert_eq!(page.trials.len(), 2);
        assert_eq!(page.trials[0].id, "NCT00000002");
        assert!(page.trials.iter().all(|t| t.nearest_distance_miles.is_none()));
    }

    #[tokio::test]
    async fn registry_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/studies"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let engine = engine(&server, memory_cache());
        let err = engine.search(&SearchCriteria::default()).await.unwrap_err();
        assert!(err.is_registry_unavailable());
    }

    #[tokio::test]
    async fn broken_cache_is_bypassed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/studies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "studies": [study("NCT00000001", &["Asthma"], None, "2024-01-01")]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let engine = engine(&server, Arc::new(BrokenCache));
        let criteria = SearchCriteria::default();
        assert_eq!(engine.search(&criteria).await.unwrap().trials.len(), 1);
        assert_eq!(engine.search(&criteria).await.unwrap().trials.len(), 1);
    }

    #[tokio::test]
    async fn get_normalizes_single_study() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/studies/NCT00000010"))
            .respond_with(ResponseTemplate::new(200).set_body_json(study(
                "NCT00000010",
                &["Diabetes"],
                None,
                "2023-01-01",
            )))
            .mount(&server)
            .await;

        let engine = engine(&server, memory_cache());
        let trial = engine.get("nct00000010").await.unwrap();
        assert_eq!(trial.id, "NCT00000010");
        assert_eq!(trial.phase, vec!["Phase 2"]);

        let err = engine.get("bogus").await.unwrap_err();
        assert!(matches!(err, TrialFinderError::InvalidArgument(_)));
    }
}
