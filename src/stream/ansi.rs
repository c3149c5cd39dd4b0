//! Helpers for turning raw script output into log-friendly text.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

/// SGR color/style sequences, e.g. `ESC[31m` or `ESC[1;32m`.
const ANSI_COLOR_PATTERN: &str = r"\x1b\[[0-9;]*m";

fn ansi_color_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| {
            Regex::new(ANSI_COLOR_PATTERN)
                .inspect_err(|e| tracing::error!(error = %e, "Invalid ANSI color pattern, colors kept"))
                .ok()
        })
        .as_ref()
}

/// Remove ANSI color escape sequences from a line.
///
/// Other escape sequences (cursor movement, erase) are left untouched.
#[must_use]
pub fn strip_ansi_colors(line: &str) -> Cow<'_, str> {
    if !line.contains('\x1b') {
        return Cow::Borrowed(line);
    }
    match ansi_color_regex() {
        Some(re) => re.replace_all(line, ""),
        None => Cow::Borrowed(line),
    }
}

/// Whether a line is empty or only whitespace.
#[must_use]
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}
