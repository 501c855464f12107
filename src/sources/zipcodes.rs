//! ZIP code -> centroid lookup backed by static tables.
//!
//! Every `.csv` or `.txt` file under `data/` is embedded at build time. Two
//! layouts are read: `zip,lat,lon` CSV and the Census ZCTA Gazetteer file
//! (tab-separated, `GEOID`/`INTPTLAT`/`INTPTLONG` columns), so the national
//! Gazetteer download can be dropped into `data/` as-is.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use rust_embed::RustEmbed;
use tracing::debug;

use crate::config::Settings;
use crate::error::TrialFinderError;
use crate::geo::GeoPoint;

#[derive(RustEmbed)]
#[folder = "data/"]
struct EmbeddedData;

fn zip_pattern() -> &'static Regex {
    static ZIP_RE: OnceLock<Regex> = OnceLock::new();
    ZIP_RE.get_or_init(|| Regex::new(r"^\d{5}$").expect("valid ZIP regex"))
}

/// Returns true for exactly five ASCII digits after trimming.
pub(crate) fn is_valid_zip(zip: &str) -> bool {
    zip_pattern().is_match(zip.trim())
}

/// Column positions for one table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TableLayout {
    separator: char,
    zip: usize,
    lat: usize,
    lon: usize,
}

impl TableLayout {
    const CSV: Self = Self {
        separator: ',',
        zip: 0,
        lat: 1,
        lon: 2,
    };

    /// Picks the layout from the first non-comment line. Named header
    /// columns win over positions; anything else is read as `zip,lat,lon`.
    fn detect(first_line: &str) -> Self {
        let separator = if first_line.contains('\t') { '\t' } else { ',' };
        let names: Vec<String> = first_line
            .split(separator)
            .map(|c| c.trim().trim_matches('"').to_ascii_uppercase())
            .collect();
        let find = |candidates: &[&str]| names.iter().position(|n| candidates.contains(&n.as_str()));
        match (
            find(&["GEOID", "ZCTA5", "ZIP", "ZIPCODE"]),
            find(&["INTPTLAT", "LAT", "LATITUDE"]),
            find(&["INTPTLONG", "LON", "LNG", "LONGITUDE"]),
        ) {
            (Some(zip), Some(lat), Some(lon)) => Self {
                separator,
                zip,
                lat,
                lon,
            },
            _ => Self {
                separator,
                ..Self::CSV
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ZipGeocoder {
    table: HashMap<String, GeoPoint>,
}

impl ZipGeocoder {
    /// Loads the table named by `TRIALFINDER_ZIP_TABLE`, or the embedded ones.
    ///
    /// # Errors
    ///
    /// Returns an error when the override file cannot be read.
    pub fn from_settings(settings: &Settings) -> Result<Self, TrialFinderError> {
        match settings.zip_table.as_deref() {
            Some(path) => Self::from_path(path),
            None => Self::embedded(),
        }
    }

    /// Merges every embedded table, in file-name order.
    pub fn embedded() -> Result<Self, TrialFinderError> {
        let mut names: Vec<_> = EmbeddedData::iter()
            .filter(|name| name.ends_with(".csv") || name.ends_with(".txt"))
            .collect();
        names.sort();
        let mut geocoder = Self::default();
        for name in &names {
            let Some(file) = EmbeddedData::get(name.as_ref()) else {
                continue;
            };
            let parsed = Self::parse(&String::from_utf8_lossy(&file.data));
            debug!(file = %name, rows = parsed.len(), "Loaded embedded ZIP table");
            geocoder.table.extend(parsed.table);
        }
        if geocoder.is_empty() {
            return Err(TrialFinderError::Config(
                "no embedded ZIP centroid table under data/".into(),
            ));
        }
        Ok(geocoder)
    }

    pub fn from_path(path: &Path) -> Result<Self, TrialFinderError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            TrialFinderError::Config(format!("cannot read ZIP table {}: {err}", path.display()))
        })?;
        Ok(Self::parse(&text))
    }

    /// Parses a `zip,lat,lon` CSV or a Gazetteer ZCTA file. Header rows and
    /// malformed rows are skipped.
    pub fn parse(text: &str) -> Self {
        let mut table = HashMap::new();
        let mut layout = None;
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let layout = *layout.get_or_insert_with(|| TableLayout::detect(line));
            let cols: Vec<&str> = line
                .split(layout.separator)
                .map(|c| c.trim().trim_matches('"'))
                .collect();
            let (Some(zip), Some(lat), Some(lon)) = (
                cols.get(layout.zip).copied(),
                cols.get(layout.lat).copied(),
                cols.get(layout.lon).copied(),
            ) else {
                debug!(line = idx + 1, "Skipping short ZIP table row");
                continue;
            };
            if !is_valid_zip(zip) {
                if idx > 0 {
                    debug!(line = idx + 1, zip, "Skipping ZIP table row with invalid ZIP");
                }
                continue;
            }
            let point = lat
                .parse::<f64>()
                .ok()
                .zip(lon.parse::<f64>().ok())
                .and_then(|(lat, lon)| GeoPoint::new(lat, lon));
            match point {
                Some(point) => {
                    table.insert(zip.to_string(), point);
                }
                None => debug!(line = idx + 1, zip, "Skipping ZIP table row with bad coordinates"),
            }
        }
        Self { table }
    }

    /// Resolves a five-digit ZIP. Malformed input is rejected without a lookup.
    pub fn resolve(&self, zip: &str) -> Option<GeoPoint> {
        let zip = zip.trim();
        if !is_valid_zip(zip) {
            debug!(zip, "Ignoring malformed ZIP code");
            return None;
        }
        let point = self.table.get(zip).copied();
        if point.is_none() {
            debug!(zip, "ZIP code not found in centroid table");
        }
        point
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
