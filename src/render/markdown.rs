use std::sync::OnceLock;

use minijinja::{Environment, context};

use crate::entities::trial::{Trial, TrialSearchPage};
use crate::error::TrialFinderError;

static ENV: OnceLock<Environment<'static>> = OnceLock::new();

fn truncate_utf8(s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    if max_bytes == 0 {
        return "…".to_string();
    }
    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let mut out = s[..boundary].trim_end().to_string();
    out.push('…');
    out
}

/// `NOT_YET_RECRUITING` -> `Not yet recruiting`.
fn status_label(status: String) -> String {
    let lower = status.trim().replace('_', " ").to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "-".to_string(),
    }
}

fn env() -> Result<&'static Environment<'static>, TrialFinderError> {
    if let Some(env) = ENV.get() {
        return Ok(env);
    }

    let mut env = Environment::new();
    env.add_filter("truncate", truncate_utf8);
    env.add_filter("status_label", status_label);
    env.add_filter("miles", |v: f64| -> String { format!("{v:.1} mi") });
    env.add_template("trial.md.j2", include_str!("../../templates/trial.md.j2"))?;
    env.add_template(
        "trial_search.md.j2",
        include_str!("../../templates/trial_search.md.j2"),
    )?;

    let _ = ENV.set(env);
    ENV.get()
        .ok_or_else(|| TrialFinderError::Config("template environment unavailable".into()))
}

fn with_next_page_footer(mut body: String, next_page_token: Option<&str>) -> String {
    let Some(token) = next_page_token.map(str::trim).filter(|t| !t.is_empty()) else {
        return body;
    };
    if !body.ends_with('\n') {
        body.push('\n');
    }
    body.push_str(&format!("\nMore results available. Use --page-token {token}\n"));
    body
}

pub fn trial_markdown(trial: &Trial) -> Result<String, TrialFinderError> {
    let tmpl = env()?.get_template("trial.md.j2")?;
    Ok(tmpl.render(context! { trial => trial })?)
}

pub fn trial_search_markdown(
    query: &str,
    page: &TrialSearchPage,
) -> Result<String, TrialFinderError> {
    let tmpl = env()?.get_template("trial_search.md.j2")?;
    let body = tmpl.render(context! {
        query => query,
        count => page.trials.len(),
        total => page.total_count,
        trials => &page.trials,
    })?;
    Ok(with_next_page_footer(body, page.next_page_token.as_deref()))
}
