use tracing::{debug, warn};

use crate::models::{HistoryRow, RatingDelta, RatingField};

const UNRATED_SENTINEL: &str = "-";

/// Find the history row for `contest_id` and derive its rating change.
///
/// Returns `None` when the user has no row for the contest or when either
/// rating cell cannot be read. Callers treat both as "try again next cycle".
pub fn extract(contest_id: &str, rows: &[HistoryRow]) -> Option<RatingDelta> {
    let row = find_row(contest_id, rows)?;

    let (old_rating, new_rating) = match parse_rating_columns(&row.old_rating, &row.new_rating) {
        Some(ratings) => ratings,
        None => {
            warn!(
                contest_id = %contest_id,
                old_cell = %row.old_rating,
                new_cell = %row.new_rating,
                "Could not read rating cells, treating result as not found"
            );
            return None;
        }
    };

    let delta = RatingDelta::new(
        contest_id.to_string(),
        old_rating,
        new_rating,
        row.share_href.clone(),
    );

    debug!(
        contest_id = %contest_id,
        old_rating = %delta.old_rating,
        new_rating = %delta.new_rating,
        delta = delta.delta,
        is_rated = delta.is_rated,
        "Extracted rating change"
    );

    Some(delta)
}

/// A row belongs to `contest_id` only when one of its link's path segments
/// equals the id. Containment is never enough: "abc1" must not land on
/// "abc100".
fn find_row<'a>(contest_id: &str, rows: &'a [HistoryRow]) -> Option<&'a HistoryRow> {
    if contest_id.is_empty() {
        return None;
    }

    let row = rows
        .iter()
        .find(|r| path_segments(&r.contest_href).any(|s| s == contest_id));

    if row.is_none() {
        debug!(contest_id = %contest_id, "No history row for contest");
    }
    row
}

fn path_segments(href: &str) -> impl Iterator<Item = &str> {
    let path = href.split(['?', '#']).next().unwrap_or("");
    path.split('/').filter(|s| !s.is_empty())
}

/// Read the two rating cells.
///
/// The second cell is either a new rating (first cell = old rating) or a
/// signed difference like `+51` (first cell = new rating).
fn parse_rating_columns(first: &str, second: &str) -> Option<(RatingField, RatingField)> {
    let second = second.trim();

    if let Some(diff) = parse_signed_diff(second) {
        let new_rating = parse_rating_field(first)?;
        let old_rating = match new_rating {
            RatingField::Value(v) => RatingField::Value(v - diff),
            other => other,
        };
        return Some((old_rating, new_rating));
    }

    Some((parse_rating_field(first)?, parse_rating_field(second)?))
}

fn parse_rating_field(text: &str) -> Option<RatingField> {
    let text = text.trim();
    if text.is_empty() {
        return Some(RatingField::Missing);
    }
    if text == UNRATED_SENTINEL {
        return Some(RatingField::Unrated);
    }
    text.parse::<i32>().ok().map(RatingField::Value)
}

fn parse_signed_diff(text: &str) -> Option<i32> {
    let mut chars = text.chars();
    let sign = chars.next()?;
    if sign != '+' && sign != '-' {
        return None;
    }
    let digits = chars.as_str();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let magnitude: i32 = digits.parse().ok()?;
    Some(if sign == '-' { -magnitude } else { magnitude })
}
