use time::{Date, Month};

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

fn month_from_name(name: &str) -> Option<Month> {
    let name = name.trim().trim_end_matches('.').to_ascii_lowercase();
    if name.len() < 3 {
        return None;
    }
    let idx = MONTH_NAMES.iter().position(|m| m.starts_with(&name))?;
    Month::try_from(idx as u8 + 1).ok()
}

fn parse_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if raw.len() != 4 || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

fn parse_iso(v: &str) -> Option<Date> {
    let mut parts = v.split('-');
    let year = parse_year(parts.next()?)?;
    let month = match parts.next() {
        Some(m) => m.trim().parse::<u8>().ok()?,
        None => 1,
    };
    let day = match parts.next() {
        Some(d) => d.trim().parse::<u8>().ok()?,
        None => 1,
    };
    if parts.next().is_some() {
        return None;
    }
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}

/// `March 2021` or `March 5, 2021`.
fn parse_month_name(v: &str) -> Option<Date> {
    let cleaned = v.replace(',', " ");
    let tokens = cleaned.split_whitespace().collect::<Vec<_>>();
    match tokens.as_slice() {
        [month, year] => Date::from_calendar_date(parse_year(year)?, month_from_name(month)?, 1).ok(),
        [month, day, year] => Date::from_calendar_date(
            parse_year(year)?,
            month_from_name(month)?,
            day.parse::<u8>().ok()?,
        )
        .ok(),
        _ => None,
    }
}

/// Parses the date shapes the registry emits: `YYYY-MM-DD`, `YYYY-MM`, `YYYY`,
/// and the older `Month YYYY` / `Month D, YYYY`. Partial dates anchor to the
/// first day of the period.
pub(crate) fn parse_registry_date(value: &str) -> Option<Date> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    // Timestamps such as `2024-01-05T10:00:00` keep only the date part.
    let v = v.split('T').next().unwrap_or(v);
    if v.starts_with(|c: char| c.is_ascii_digit()) {
        parse_iso(v)
    } else {
        parse_month_name(v)
    }
}
