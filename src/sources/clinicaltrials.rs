use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::Settings;
use crate::error::TrialFinderError;

const CTGOV_API: &str = "clinicaltrials.gov";

/// Statuses requested when the caller does not override the allow-list.
pub(crate) const DEFAULT_STATUSES: &[&str] = &["RECRUITING", "NOT_YET_RECRUITING"];

/// Most recently updated first; local ranking re-sorts from this baseline.
const UPSTREAM_SORT: &str = "LastUpdatePostDate:desc";

/// Minimal projection needed by the normalizer.
const SEARCH_FIELDS: &[&str] = &[
    "NCTId",
    "BriefTitle",
    "OverallStatus",
    "Condition",
    "Phase",
    "MinimumAge",
    "MaximumAge",
    "Sex",
    "StartDate",
    "LastUpdateSubmitDate",
    "LastUpdatePostDate",
    "LocationFacility",
    "LocationCity",
    "LocationState",
    "LocationCountry",
    "LocationGeoPoint",
];

#[derive(Clone)]
pub struct ClinicalTrialsClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: String,
}

/// One page request against `/studies`. Enumerated fields carry the caller's
/// vocabulary; [`ClinicalTrialsClient::search_page`] maps them to registry enums.
#[derive(Debug, Clone, Default)]
pub struct CtGovSearchParams {
    pub condition: Option<String>,
    pub statuses: Vec<String>,
    pub min_age: Option<u32>,
    pub sex: Option<String>,
    pub phase: Option<String>,
    pub page_size: usize,
    pub page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtGovSearchResponse {
    #[serde(default)]
    pub studies: Vec<serde_json::Value>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub total_count: Option<usize>,
}

impl ClinicalTrialsClient {
    pub fn new(settings: &Settings) -> Result<Self, TrialFinderError> {
        Ok(Self {
            client: crate::sources::registry_http_client(settings)?,
            base: settings.ctgov_base.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(base: String) -> Result<Self, TrialFinderError> {
        Self::new(&Settings {
            ctgov_base: base,
            ..Settings::default()
        })
    }

    pub(crate) fn base(&self) -> &str {
        &self.base
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn decode_json<T: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, TrialFinderError> {
        let status = resp.status();
        let content_type = resp.headers().get(reqwest::header::CONTENT_TYPE).cloned();
        let bytes = crate::sources::read_limited_body(resp, CTGOV_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(TrialFinderError::Api {
                api: CTGOV_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        crate::sources::ensure_json_content_type(CTGOV_API, content_type.as_ref(), &bytes)?;
        serde_json::from_slice(&bytes).map_err(|source| TrialFinderError::ApiJson {
            api: CTGOV_API.to_string(),
            source,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        req: reqwest_middleware::RequestBuilder,
    ) -> Result<T, TrialFinderError> {
        Self::decode_json(req.send().await?).await
    }

    /// Fetches exactly one page of studies. The continuation token in the
    /// response is passed through untouched.
    pub async fn search_page(
        &self,
        params: &CtGovSearchParams,
    ) -> Result<CtGovSearchResponse, TrialFinderError> {
        let url = self.endpoint("studies");
        let mut req = self.client.get(&url).query(&[("format", "json")]);

        if let Some(v) = params
            .condition
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            req = req.query(&[("query.cond", v)]);
        }

        req = req.query(&[("filter.overallStatus", status_filter(&params.statuses))]);

        if let Some(advanced) = advanced_filter(params) {
            req = req.query(&[("filter.advanced", advanced)]);
        }

        let page_size = params.page_size.max(1).to_string();
        req = req.query(&[
            ("pageSize", page_size.as_str()),
            ("sort", UPSTREAM_SORT),
            ("countTotal", "true"),
        ]);
        req = req.query(&[("fields", SEARCH_FIELDS.join(","))]);

        if let Some(token) = params
            .page_token
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            req = req.query(&[("pageToken", token)]);
        }

        self.get_json(req).await
    }

    /// Fetches the full record for one study.
    pub async fn get_study(&self, nct_id: &str) -> Result<serde_json::Value, TrialFinderError> {
        let url = self.endpoint(&format!("studies/{nct_id}"));
        let resp = self
            .client
            .get(&url)
            .query(&[("format", "json")])
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TrialFinderError::NotFound {
                entity: "trial".into(),
                id: nct_id.to_string(),
                suggestion: "Check the NCT number or try: trialfinder search -c <condition>"
                    .into(),
            });
        }
        Self::decode_json(resp).await
    }

    /// One-row request used by `trialfinder health`.
    pub(crate) async fn ping(&self) -> Result<(), TrialFinderError> {
        let url = self.endpoint("studies");
        let req = self
            .client
            .get(&url)
            .query(&[("format", "json"), ("pageSize", "1"), ("fields", "NCTId")]);
        self.get_json::<CtGovSearchResponse>(req).await.map(|_| ())
    }
}

/// Upper-snake form used by registry enums: `Active, not recruiting` -> `ACTIVE_NOT_RECRUITING`.
pub(crate) fn registry_enum(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

fn status_filter(statuses: &[String]) -> String {
    let mapped = statuses
        .iter()
        .map(|s| registry_enum(s))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    if mapped.is_empty() {
        DEFAULT_STATUSES.join(",")
    } else {
        mapped.join(",")
    }
}

pub(crate) fn registry_phase(label: &str) -> Option<String> {
    let compact = label
        .trim()
        .to_ascii_lowercase()
        .replace([' ', '_', '-', '/'], "");
    let mapped = match compact.as_str() {
        "" => return None,
        "earlyphase1" | "phase0" => "EARLY_PHASE1",
        "phase1" => "PHASE1",
        "phase2" => "PHASE2",
        "phase3" => "PHASE3",
        "phase4" => "PHASE4",
        "na" | "notapplicable" => "NA",
        _ => return Some(label.trim().to_ascii_uppercase().replace(' ', "_")),
    };
    Some(mapped.to_string())
}

pub(crate) fn registry_sex(value: &str) -> Option<String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "all" | "any" => None,
        "male" | "m" => Some("MALE".into()),
        "female" | "f" => Some("FEMALE".into()),
        other => Some(other.to_ascii_uppercase().replace(' ', "_")),
    }
}

fn advanced_filter(params: &CtGovSearchParams) -> Option<String> {
    let mut clauses: Vec<String> = Vec::new();
    if let Some(age) = params.min_age {
        clauses.push(format!(
            "AREA[MinimumAge]RANGE[MIN, {age} years] AND AREA[MaximumAge]RANGE[{age} years, MAX]"
        ));
    }
    // Studies open to all sexes stay eligible for a sex-specific search.
    if let Some(sex) = params.sex.as_deref().and_then(registry_sex) {
        clauses.push(format!("(AREA[Sex]{sex} OR AREA[Sex]ALL)"));
    }
    if let Some(phase) = params.phase.as_deref().and_then(registry_phase) {
        clauses.push(format!("AREA[Phase]{phase}"));
    }
    (!clauses.is_empty()).then(|| clauses.join(" AND "))
}
