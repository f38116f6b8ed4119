//! Output post-processing for JSON-mode jobs.

/// Strip a surrounding markdown code fence from `s`.
///
/// Models sometimes wrap JSON output in ```` ```json ... ``` ```` despite
/// instructions. The opening fence line (including any language tag) and a
/// trailing fence are removed; text without a leading fence is returned
/// trimmed but otherwise unchanged. Applying this twice is a no-op.
pub fn strip_code_fences(s: &str) -> String {
    let s = s.trim();
    if !s.starts_with("```") {
        return s.to_string();
    }

    // Drop the opening fence line (with any language tag) when one is
    // present; a fence with no newline passes through to the suffix pass
    // untouched.
    let inner = match s.find('\n') {
        Some(idx) => &s[idx + 1..],
        None => s,
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    inner.trim().to_string()
}
