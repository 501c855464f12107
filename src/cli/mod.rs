//! Command-line surface: search, single-study lookup, server, and health.

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::entities::trial::{SearchCriteria, SortMode, TrialSearchEngine, search_query_summary};
use crate::profile::{JsonProfileStore, ProfileStore, apply_profile};
use crate::render;

pub mod health;

#[derive(Parser, Debug)]
#[command(name = "trialfinder", version, about = "Search ClinicalTrials.gov by condition and distance")]
pub struct Cli {
    /// Print JSON instead of markdown
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Search recruiting trials and rank them locally
    Search {
        /// Condition or disease text
        #[arg(short, long)]
        condition: Option<String>,

        /// 5-digit US ZIP used as the distance origin
        #[arg(long)]
        zip: Option<String>,

        /// Keep only trials with a site within this many miles of --zip
        #[arg(long)]
        radius: Option<f64>,

        /// Participant age in years
        #[arg(long)]
        age: Option<u32>,

        /// Participant sex (male or female)
        #[arg(long)]
        gender: Option<String>,

        /// Trial phase, e.g. "Phase 3" or PHASE3
        #[arg(long)]
        phase: Option<String>,

        /// Ordering: recent, distance, or phase (default: recent)
        #[arg(long)]
        sort: Option<String>,

        /// Recruitment status; repeat to allow several (default: recruiting, not yet recruiting)
        #[arg(long = "status")]
        statuses: Vec<String>,

        /// Continuation token from a previous page
        #[arg(long)]
        page_token: Option<String>,

        /// Fill unset filters from this user's stored profile
        #[arg(long)]
        user: Option<String>,
    },

    /// Show one study by NCT number
    Get {
        /// NCT number, e.g. NCT04000001
        nct_id: String,
    },

    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value = "8080")]
        port: u16,
    },

    /// Check registry reachability and local data files
    Health {
        /// Skip local file checks
        #[arg(long)]
        apis_only: bool,
    },
}

async fn apply_stored_profile(
    settings: &Settings,
    user: Option<&str>,
    criteria: &mut SearchCriteria,
    sort_explicit: bool,
) -> anyhow::Result<()> {
    let Some(user) = user.map(str::trim).filter(|u| !u.is_empty()) else {
        return Ok(());
    };
    let Some(path) = settings.profiles.as_deref() else {
        anyhow::bail!("--user requires TRIALFINDER_PROFILES to name a profiles file");
    };
    let store = JsonProfileStore::from_path(path).await?;
    match store.get_profile(user).await? {
        Some(profile) => apply_profile(criteria, &profile, sort_explicit),
        None => tracing::warn!(user, "No stored profile; using flags only"),
    }
    Ok(())
}

/// Executes a parsed command and returns what should be printed.
///
/// # Errors
///
/// Returns configuration, registry, and rendering failures.
pub async fn run(cli: Cli) -> anyhow::Result<String> {
    let settings = Settings::from_env()?;
    let json_output = cli.json;

    match cli.command {
        Commands::Search {
            condition,
            zip,
            radius,
            age,
            gender,
            phase,
            sort,
            statuses,
            page_token,
            user,
        } => {
            let sort_explicit = sort.is_some();
            let sort_mode = match sort {
                Some(raw) => raw.parse::<SortMode>()?,
                None => SortMode::default(),
            };
            let mut criteria = SearchCriteria {
                condition,
                location_zip: zip,
                radius_miles: radius,
                min_age: age,
                gender,
                phase,
                sort_mode,
                page_token,
                statuses,
            };
            apply_stored_profile(&settings, user.as_deref(), &mut criteria, sort_explicit).await?;

            let engine = TrialSearchEngine::from_settings(&settings)?;
            let page = engine.search(&criteria).await?;
            if json_output {
                Ok(render::json::to_pretty(&page)?)
            } else {
                Ok(render::markdown::trial_search_markdown(
                    &search_query_summary(&criteria),
                    &page,
                )?)
            }
        }
        Commands::Get { nct_id } => {
            let engine = TrialSearchEngine::from_settings(&settings)?;
            let trial = engine.get(&nct_id).await?;
            if json_output {
                Ok(render::json::to_pretty(&trial)?)
            } else {
                Ok(render::markdown::trial_markdown(&trial)?)
            }
        }
        Commands::Serve { host, port } => {
            crate::server::run_server(&settings, &host, port).await?;
            Ok(String::new())
        }
        Commands::Health { apis_only } => {
            let report = health::check(&settings, apis_only).await?;
            let out = if json_output {
                render::json::to_pretty(&report)?
            } else {
                report.to_markdown()
            };
            if !report.all_healthy() {
                anyhow::bail!("{out}");
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_flags_parse() {
        let cli = Cli::try_parse_from([
            "trialfinder",
            "search",
            "-c",
            "diabetes",
            "--zip",
            "32202",
            "--radius",
            "25",
            "--sort",
            "distance",
            "--status",
            "Recruiting",
            "--status",
            "Completed",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Search {
                condition,
                zip,
                radius,
                sort,
                statuses,
                ..
            } => {
                assert_eq!(condition.as_deref(), Some("diabetes"));
                assert_eq!(zip.as_deref(), Some("32202"));
                assert_eq!(radius, Some(25.0));
                assert_eq!(sort.as_deref(), Some("distance"));
                assert_eq!(statuses, vec!["Recruiting", "Completed"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["trialfinder", "serve"]).unwrap();
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 8080);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn get_requires_an_id() {
        assert!(Cli::try_parse_from(["trialfinder", "get"]).is_err());
    }

    #[tokio::test]
    async fn user_profile_requires_profiles_file() {
        let mut criteria = SearchCriteria::default();
        let err = apply_stored_profile(&Settings::default(), Some("u1"), &mut criteria, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("TRIALFINDER_PROFILES"));
        apply_stored_profile(&Settings::default(), None, &mut criteria, false)
            .await
            .unwrap();
        assert_eq!(criteria, SearchCriteria::default());
    }
}
