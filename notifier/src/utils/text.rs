//! Text helpers for notification bodies.

/// Suffix appended to truncated text.
const ELLIPSIS: &str = "...";

/// Truncates `text` to at most `max_chars` characters, ending in `...` when
/// anything was cut. Counts characters, not bytes, so multi-byte text is
/// never split mid-character.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Returns the last path component of a Syncthing item path.
///
/// Item paths use the separator of the device that reported them, so both
/// `/` and `\` are treated as separators.
#[must_use]
pub fn file_name(item: &str) -> &str {
    item.rsplit(&['/', '\\'][..]).next().unwrap_or(item)
}
