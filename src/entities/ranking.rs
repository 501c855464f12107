//! Local post-filtering and deterministic ordering of normalized trials.

use std::cmp::Ordering;

use time::Date;

use crate::entities::trial::{SortMode, Trial};
use crate::geo::{GeoPoint, nearest_site_miles};
use crate::utils::date::parse_registry_date;

/// Numeric rank for one phase label. Accepts display labels (`Phase 3`) and
/// registry enums (`PHASE3`); anything unlisted ranks 0.
pub fn phase_rank(label: &str) -> f64 {
    let compact = label
        .trim()
        .to_ascii_lowercase()
        .replace([' ', '_', '-'], "");
    match compact.as_str() {
        "phase4" => 4.0,
        "phase3" => 3.0,
        "phase2" => 2.0,
        "phase1" => 1.0,
        "earlyphase1" => 0.5,
        _ => 0.0,
    }
}

/// Highest rank among a trial's phase labels; multi-phase studies rank by their
/// most advanced phase.
pub fn trial_phase_rank(trial: &Trial) -> f64 {
    trial
        .phase
        .iter()
        .map(|p| phase_rank(p))
        .fold(0.0, f64::max)
}

/// Most recent timestamp for a trial: last update, else start date.
pub fn recency(trial: &Trial) -> Option<Date> {
    trial
        .last_update_date
        .as_deref()
        .and_then(parse_registry_date)
        .or_else(|| parse_registry_date(&trial.start_date))
}

pub fn annotate_distances(trials: &mut [Trial], origin: GeoPoint) {
    for trial in trials.iter_mut() {
        trial.nearest_distance_miles = nearest_site_miles(origin, &trial.locations);
    }
}

fn matches_condition(trial: &Trial, needle: &str) -> bool {
    trial
        .conditions
        .iter()
        .any(|c| c.to_lowercase().contains(needle))
}

/// Keeps only trials whose conditions mention `term`, unless none do, in which
/// case the registry's own relevance wins and everything is kept.
pub fn filter_by_condition(trials: Vec<Trial>, term: Option<&str>) -> Vec<Trial> {
    let Some(needle) = term
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
    else {
        return trials;
    };

    if !trials.iter().any(|t| matches_condition(t, &needle)) {
        return trials;
    }
    trials
        .into_iter()
        .filter(|t| matches_condition(t, &needle))
        .collect()
}

/// Drops trials without a known distance or farther than `radius_miles`.
/// The boundary is inclusive.
pub fn filter_by_radius(trials: Vec<Trial>, radius_miles: f64) -> Vec<Trial> {
    trials
        .into_iter()
        .filter(|t| t.nearest_distance_miles.is_some_and(|d| d <= radius_miles))
        .collect()
}

fn by_recency_desc(a: &Trial, b: &Trial) -> Ordering {
    recency(b).cmp(&recency(a))
}

fn by_distance_asc(a: &Trial, b: &Trial) -> Ordering {
    match (a.nearest_distance_miles, b.nearest_distance_miles) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn by_title_asc(a: &Trial, b: &Trial) -> Ordering {
    a.title
        .to_lowercase()
        .cmp(&b.title.to_lowercase())
        .then_with(|| a.title.cmp(&b.title))
}

fn by_phase_desc(a: &Trial, b: &Trial) -> Ordering {
    trial_phase_rank(b)
        .total_cmp(&trial_phase_rank(a))
        .then_with(|| by_recency_desc(a, b))
        .then_with(|| by_title_asc(a, b))
}

/// Sorts in place and returns the mode actually applied: `Distance` without an
/// origin degrades to `Recent`. All sorts are stable.
pub fn sort_trials(trials: &mut [Trial], mode: SortMode, has_origin: bool) -> SortMode {
    let effective = match mode {
        SortMode::Distance if !has_origin => SortMode::Recent,
        other => other,
    };
    match effective {
        SortMode::Recent => trials.sort_by(by_recency_desc),
        SortMode::Distance => trials.sort_by(by_distance_asc),
        SortMode::Phase => trials.sort_by(by_phase_desc),
    }
    effective
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::trial::{AgeRange, TrialSite};

    fn trial(id: &str) -> Trial {
        Trial {
            id: id.to_string(),
            title: format!("Trial {id}"),
            status: "RECRUITING".into(),
            conditions: Vec::new(),
            locations: Vec::new(),
            start_date: String::new(),
            last_update_date: None,
            phase: Vec::new(),
            age_range: AgeRange::default(),
            gender: None,
            nearest_distance_miles: None,
        }
    }

    fn ids(trials: &[Trial]) -> Vec<&str> {
        trials.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn phase_rank_table() {
        assert_eq!(phase_rank("Phase 4"), 4.0);
        assert_eq!(phase_rank("PHASE3"), 3.0);
        assert_eq!(phase_rank("Phase 2"), 2.0);
        assert_eq!(phase_rank("phase 1"), 1.0);
        assert_eq!(phase_rank("Early Phase 1"), 0.5);
        assert_eq!(phase_rank("EARLY_PHASE1"), 0.5);
        assert_eq!(phase_rank("Not Applicable"), 0.0);
        assert_eq!(phase_rank(""), 0.0);
    }

    #[test]
    fn multi_phase_trial_ranks_by_highest_phase() {
        let mut t = trial("a");
        t.phase = vec!["Phase 1".into(), "Phase 2".into()];
        assert_eq!(trial_phase_rank(&t), 2.0);
        assert_eq!(trial_phase_rank(&trial("none")), 0.0);
    }

    #[test]
    fn phase_sort_orders_by_rank_with_unlabeled_last() {
        let mut p1 = trial("p1");
        p1.phase = vec!["Phase 1".into()];
        let mut early = trial("early");
        early.phase = vec!["Early Phase 1".into()];
        let mut p3 = trial("p3");
        p3.phase = vec!["Phase 3".into()];
        let unlabeled = trial("none");

        let mut trials = vec![unlabeled, p1, early, p3];
        sort_trials(&mut trials, SortMode::Phase, false);
        assert_eq!(ids(&trials), vec!["p3", "p1", "early", "none"]);
    }

    #[test]
    fn phase_ties_break_by_recency_then_title() {
        let mut old = trial("old");
        old.phase = vec!["Phase 2".into()];
        old.last_update_date = Some("2020-01-01".into());
        let mut new_b = trial("new-b");
        new_b.title = "Beta study".into();
        new_b.phase = vec!["Phase 2".into()];
        new_b.last_update_date = Some("2024-05-01".into());
        let mut new_a = trial("new-a");
        new_a.title = "alpha study".into();
        new_a.phase = vec!["Phase 2".into()];
        new_a.start_date = "2024-05-01".into();

        let mut trials = vec![old, new_b, new_a];
        sort_trials(&mut trials, SortMode::Phase, false);
        assert_eq!(ids(&trials), vec!["new-a", "new-b", "old"]);
    }

    #[test]
    fn recency_falls_back_to_start_date() {
        let mut updated = trial("updated");
        updated.last_update_date = Some("2020-01-01".into());
        let mut started = trial("started");
        started.start_date = "2020-01-01".into();
        assert_eq!(recency(&updated), recency(&started));

        // Equal keys keep input order under the stable recent sort.
        let mut a = vec![updated.clone(), started.clone()];
        sort_trials(&mut a, SortMode::Recent, false);
        assert_eq!(ids(&a), vec!["updated", "started"]);
        let mut b = vec![started, updated];
        sort_trials(&mut b, SortMode::Recent, false);
        assert_eq!(ids(&b), vec!["started", "updated"]);
    }

    #[test]
    fn recent_sort_is_descending_with_undated_last() {
        let mut older = trial("older");
        older.last_update_date = Some("2019-03".into());
        let mut newer = trial("newer");
        newer.last_update_date = Some("2023-11-20".into());
        let undated = trial("undated");
        let mut mixed = trial("mixed");
        mixed.start_date = "2021-06-01".into();

        let mut trials = vec![undated, older, newer, mixed];
        let applied = sort_trials(&mut trials, SortMode::Recent, true);
        assert_eq!(applied, SortMode::Recent);
        assert_eq!(ids(&trials), vec!["newer", "mixed", "older", "undated"]);
    }

    #[test]
    fn distance_sort_puts_unknown_last_and_falls_back_without_origin() {
        let mut far = trial("far");
        far.nearest_distance_miles = Some(30.0);
        far.last_update_date = Some("2024-01-01".into());
        let mut near = trial("near");
        near.nearest_distance_miles = Some(10.0);
        near.last_update_date = Some("2020-01-01".into());
        let mut unknown = trial("unknown");
        unknown.last_update_date = Some("2025-01-01".into());

        let mut trials = vec![unknown.clone(), far.clone(), near.clone()];
        assert_eq!(
            sort_trials(&mut trials, SortMode::Distance, true),
            SortMode::Distance
        );
        assert_eq!(ids(&trials), vec!["near", "far", "unknown"]);

        let mut trials = vec![far, near, unknown];
        assert_eq!(
            sort_trials(&mut trials, SortMode::Distance, false),
            SortMode::Recent
        );
        assert_eq!(ids(&trials), vec!["unknown", "far", "near"]);
    }

    #[test]
    fn radius_boundary_is_inclusive() {
        let mut at = trial("at");
        at.nearest_distance_miles = Some(25.0);
        let mut beyond = trial("beyond");
        beyond.nearest_distance_miles = Some(25.01);
        let mut inside = trial("inside");
        inside.nearest_distance_miles = Some(0.0);
        let unknown = trial("unknown");

        let kept = filter_by_radius(vec![at, beyond, inside, unknown], 25.0);
        assert_eq!(ids(&kept), vec!["at", "inside"]);
    }

    #[test]
    fn condition_filter_keeps_everything_when_nothing_matches() {
        let mut a = trial("a");
        a.conditions = vec!["Hypertension".into()];
        let mut b = trial("b");
        b.conditions = vec!["Obesity".into()];

        let kept = filter_by_condition(vec![a, b], Some("diabetes"));
        assert_eq!(ids(&kept), vec!["a", "b"]);
    }

    #[test]
    fn condition_filter_tightens_when_some_match() {
        let mut a = trial("a");
        a.conditions = vec!["Type 2 Diabetes Mellitus".into()];
        let mut b = trial("b");
        b.conditions = vec!["Obesity".into()];
        let mut c = trial("c");
        c.conditions = vec!["Prediabetes".into(), "Obesity".into()];

        let kept = filter_by_condition(vec![a, b, c], Some("  DIABETES "));
        assert_eq!(ids(&kept), vec!["a", "c"]);
    }

    #[test]
    fn condition_filter_ignores_blank_term() {
        let kept = filter_by_condition(vec![trial("a"), trial("b")], Some("   "));
        assert_eq!(kept.len(), 2);
        let kept = filter_by_condition(vec![trial("a")], None);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn annotate_distances_leaves_unlocated_trials_empty() {
        let origin = GeoPoint::new(30.0, -81.0).unwrap();
        let mut located = trial("located");
        located.locations = vec![TrialSite {
            facility: "Clinic".into(),
            city: "Jacksonville".into(),
            state: "Florida".into(),
            country: "United States".into(),
            geo_point: GeoPoint::new(30.0, -81.0),
        }];
        let mut trials = vec![located, trial("bare")];
        annotate_distances(&mut trials, origin);
        assert_eq!(trials[0].nearest_distance_miles, Some(0.0));
        assert_eq!(trials[1].nearest_distance_miles, None);
    }
}
