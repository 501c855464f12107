use serde::Serialize;

use crate::error::TrialFinderError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, TrialFinderError> {
    Ok(serde_json::to_string_pretty(value)?)
}
