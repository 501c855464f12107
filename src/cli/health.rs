use std::time::Instant;

use crate::config::Settings;
use crate::error::TrialFinderError;
use crate::sources::clinicaltrials::ClinicalTrialsClient;
use crate::sources::zipcodes::ZipGeocoder;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub api: String,
    pub status: String,
    pub latency: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# TrialFinder Health Check\n\n");
        out.push_str("| Component | Status | Detail |\n");
        out.push_str("|-----------|--------|--------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                row.api, row.status, row.latency
            ));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} components healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

async fn check_registry(client: &ClinicalTrialsClient) -> HealthRow {
    let start = Instant::now();
    let result = client.ping().await;
    let elapsed = start.elapsed().as_millis();
    let api = format!("ClinicalTrials.gov ({})", client.base());
    match result {
        Ok(()) => HealthRow {
            api,
            status: "ok".into(),
            latency: format!("{elapsed}ms"),
        },
        Err(err) => {
            let transport = match &err {
                TrialFinderError::Http(e)
                | TrialFinderError::HttpMiddleware(reqwest_middleware::Error::Reqwest(e)) => {
                    Some(e)
                }
                _ => None,
            };
            let reason = match (&err, transport) {
                (_, Some(e)) if e.is_timeout() => "timeout".to_string(),
                (_, Some(e)) if e.is_connect() => "connect".to_string(),
                (TrialFinderError::Api { message, .. }, _) => message.clone(),
                _ => "error".to_string(),
            };
            HealthRow {
                api,
                status: "error".into(),
                latency: format!("{elapsed}ms ({reason})"),
            }
        }
    }
}

fn check_zip_table(settings: &Settings) -> HealthRow {
    let api = match &settings.zip_table {
        Some(path) => format!("ZIP table ({})", path.display()),
        None => "ZIP table (embedded)".to_string(),
    };
    match ZipGeocoder::from_settings(settings) {
        Ok(table) if !table.is_empty() => HealthRow {
            api,
            status: "ok".into(),
            latency: format!("{} ZIPs", table.len()),
        },
        Ok(_) => HealthRow {
            api,
            status: "error".into(),
            latency: "no usable rows".into(),
        },
        Err(err) => HealthRow {
            api,
            status: "error".into(),
            latency: err.to_string(),
        },
    }
}

async fn check_profiles(settings: &Settings) -> Option<HealthRow> {
    let path = settings.profiles.as_ref()?;
    let api = format!("Profiles ({})", path.display());
    Some(match crate::profile::JsonProfileStore::from_path(path).await {
        Ok(store) => HealthRow {
            api,
            status: "ok".into(),
            latency: format!("{} profiles", store.len()),
        },
        Err(err) => HealthRow {
            api,
            status: "error".into(),
            latency: err.to_string(),
        },
    })
}

/// Checks registry reachability and, unless `apis_only`, the local data files.
///
/// # Errors
///
/// Returns an error when the HTTP client cannot be created.
pub async fn check(settings: &Settings, apis_only: bool) -> Result<HealthReport, TrialFinderError> {
    let client = ClinicalTrialsClient::new(settings)?;
    let mut rows = vec![check_registry(&client).await];
    if !apis_only {
        rows.push(check_zip_table(settings));
        if let Some(row) = check_profiles(settings).await {
            rows.push(row);
        }
    }
    let healthy = rows.iter().filter(|r| r.status == "ok").count();
    Ok(HealthReport {
        healthy,
        total: rows.len(),
        rows,
    })
}
