//! Small pure text helpers.

/// Truncate a string to a maximum length, adding `...` if needed.
///
/// - Trims surrounding whitespace before truncating.
/// - Uses `char` count (not bytes) to avoid splitting Unicode scalar values.
/// - Enforces a minimum `max` of 3 so the ellipsis fits.
#[must_use]
pub fn truncate_with_ellipsis(raw: &str, max: usize) -> String {
    let max = max.max(3);
    let raw = raw.trim();
    if raw.chars().count() <= max {
        return raw.to_string();
    }
    let head: String = raw.chars().take(max - 3).collect();
    format!("{head}...")
}

/// Collapse a multi-line prompt into one line for list rows.
#[must_use]
pub fn single_line_preview(raw: &str, max: usize) -> String {
    let joined = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_with_ellipsis(&joined, max)
}
