use serde_json::Value;

use crate::entities::trial::{AgeRange, Trial, TrialSite};
use crate::geo::GeoPoint;

const TITLE_PLACEHOLDER: &str = "No title available";

fn clean_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn text_at(value: &Value, pointer: &str) -> Option<String> {
    clean_opt(value.pointer(pointer).and_then(Value::as_str))
}

fn text_list_at(value: &Value, pointer: &str) -> Vec<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| clean_opt(v.as_str()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

/// `PHASE3` -> `Phase 3`, `EARLY_PHASE1` -> `Early Phase 1`, `NA` -> `Not Applicable`.
/// Labels that are already human-readable pass through unchanged.
pub(crate) fn humanize_phase(raw: &str) -> String {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase().replace([' ', '-'], "_");
    if upper == "NA" || upper == "N/A" {
        return "Not Applicable".to_string();
    }
    let (early, rest) = match upper.strip_prefix("EARLY_") {
        Some(rest) => (true, rest),
        None => (false, upper.as_str()),
    };
    let Some(number) = rest
        .strip_prefix("PHASE")
        .map(|n| n.trim_start_matches('_'))
        .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    else {
        return trimmed.to_string();
    };
    if early {
        format!("Early Phase {number}")
    } else {
        format!("Phase {number}")
    }
}

fn humanize_sex(raw: &str) -> Option<String> {
    let lower = raw.trim().to_ascii_lowercase();
    match lower.as_str() {
        "" | "all" => None,
        "male" => Some("Male".to_string()),
        "female" => Some("Female".to_string()),
        _ => {
            let mut chars = lower.chars();
            chars
                .next()
                .map(|first| first.to_uppercase().chain(chars).collect())
        }
    }
}

fn identification(protocol: &Value) -> (String, String) {
    let id = text_at(protocol, "/identificationModule/nctId").unwrap_or_default();
    let title = text_at(protocol, "/identificationModule/briefTitle")
        .or_else(|| text_at(protocol, "/identificationModule/officialTitle"))
        .unwrap_or_else(|| TITLE_PLACEHOLDER.to_string());
    (id, title)
}

struct StatusFields {
    status: String,
    start_date: String,
    last_update_date: Option<String>,
}

fn status(protocol: &Value) -> StatusFields {
    StatusFields {
        status: text_at(protocol, "/statusModule/overallStatus").unwrap_or_default(),
        start_date: text_at(protocol, "/statusModule/startDateStruct/date").unwrap_or_default(),
        last_update_date: text_at(protocol, "/statusModule/lastUpdateSubmitDate")
            .or_else(|| text_at(protocol, "/statusModule/lastUpdatePostDateStruct/date")),
    }
}

fn phases(protocol: &Value) -> Vec<String> {
    text_list_at(protocol, "/designModule/phases")
        .iter()
        .map(|p| humanize_phase(p))
        .collect()
}

fn eligibility(protocol: &Value) -> (AgeRange, Option<String>) {
    let age_range = AgeRange {
        min: text_at(protocol, "/eligibilityModule/minimumAge").unwrap_or_default(),
        max: text_at(protocol, "/eligibilityModule/maximumAge").unwrap_or_default(),
    };
    let gender = text_at(protocol, "/eligibilityModule/sex").and_then(|s| humanize_sex(&s));
    (age_range, gender)
}

fn site(location: &Value) -> TrialSite {
    let field = |key: &str| clean_opt(location.get(key).and_then(Value::as_str)).unwrap_or_default();
    let geo_point = location
        .get("geoPoint")
        .and_then(GeoPoint::from_json)
        .or_else(|| GeoPoint::from_json(location));
    TrialSite {
        facility: field("facility"),
        city: field("city"),
        state: field("state"),
        country: field("country"),
        geo_point,
    }
}

fn locations(protocol: &Value) -> Vec<TrialSite> {
    protocol
        .pointer("/contactsLocationsModule/locations")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter(|v| v.is_object()).map(site).collect())
        .unwrap_or_default()
}

/// Flattens one registry study. Total: missing or mistyped fields become
/// empty values rather than errors.
pub fn from_ctgov_study(study: &Value) -> Trial {
    let protocol = study.get("protocolSection").unwrap_or(&Value::Null);
    let (id, title) = identification(protocol);
    let status = status(protocol);
    let (age_range, gender) = eligibility(protocol);

    Trial {
        id,
        title,
        status: status.status,
        conditions: text_list_at(protocol, "/conditionsModule/conditions"),
        locations: locations(protocol),
        start_date: status.start_date,
        last_update_date: status.last_update_date,
        phase: phases(protocol),
        age_range,
        gender,
        nearest_distance_miles: None,
    }
}

/// Input order is preserved and duplicates are kept.
pub fn normalize(studies: &[Value]) -> Vec<Trial> {
    studies.iter().map(from_ctgov_study).collect()
}
