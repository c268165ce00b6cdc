//! Pulling a unified diff out of free-form model output.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Result, TanukiError};
use crate::text::preview;

/// Characters of unrecognized output quoted in the extraction error.
const PREVIEW_CHARS: usize = 500;

/// Failure texts that a corrected diff can plausibly fix.
const REPAIRABLE_MARKERS: &[&str] = &[
    "corrupt patch",
    "patch failed",
    "git apply --check failed",
    "git apply failed",
];

const FENCE_LINES: &[&str] = &["```", "```diff", "```patch"];

fn fence_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?ms)^```(?:diff|patch)?[ \t]*\n(.*?)^```[ \t]*$").ok()
        })
        .as_ref()
}

fn header_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?m)^---\s+.+\n\+\+\+\s+.+\n").ok())
        .as_ref()
}

/// Body of the first fenced block, or the whole text.
///
/// Fences count only at the start of a line, so a diff that adds a
/// Markdown code block (`+```bash`) is never mistaken for one.
fn strip_code_fence(text: &str) -> &str {
    fence_pattern()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map_or(text, |m| m.as_str())
        .trim_matches('\n')
}

/// Byte offset of the first line starting with `diff --git`.
fn find_git_header(text: &str) -> Option<usize> {
    text.match_indices("diff --git")
        .map(|(idx, _)| idx)
        .find(|&idx| idx == 0 || text[..idx].ends_with('\n'))
}

fn normalize_newlines(text: &str) -> String {
    let mut out = text.replace("\r\n", "\n").replace('\r', "\n");
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Keep the patch body, dropping anything before its first header and
/// anything after a stray fence or a bare `---` separator.
///
/// Terminators must match the whole raw line. Context (` ---`) and added
/// (`+```) lines carry a diff prefix and never end the patch.
fn trim_trailing_noise(diff: &str) -> String {
    let mut out = String::with_capacity(diff.len());
    let mut started = false;

    for line in diff.split_inclusive('\n') {
        if !started {
            if line.starts_with("diff --git") || line.starts_with("--- ") {
                started = true;
                out.push_str(line);
            }
            continue;
        }
        let raw = line.trim_end_matches('\n');
        if FENCE_LINES.contains(&raw) || raw == "---" {
            break;
        }
        out.push_str(line);
    }

    let mut out = out.trim_end_matches('\n').to_string();
    out.push('\n');
    out
}

/// Extract a unified diff from model output.
///
/// # Errors
///
/// Returns a patch error with a bounded preview when no `diff --git` or
/// `---`/`+++` header pair can be found.
pub fn extract_unified_diff(text: &str) -> Result<String> {
    let normalized = normalize_newlines(text);
    let raw = normalize_newlines(strip_code_fence(&normalized));

    if let Some(idx) = find_git_header(&raw) {
        return Ok(trim_trailing_noise(&raw[idx..]));
    }
    if let Some(found) = header_pattern().and_then(|re| re.find(&raw)) {
        return Ok(trim_trailing_noise(&raw[found.start()..]));
    }

    Err(TanukiError::patch(format!(
        "Model did not return a recognizable unified diff. First {} chars: {}",
        PREVIEW_CHARS,
        preview(&raw, PREVIEW_CHARS)
    )))
}

/// Whether a failure text describes an invalid or corrupt patch.
#[must_use]
pub fn is_repairable(message: &str) -> bool {
    let lower = message.to_lowercase();
    REPAIRABLE_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIT_DIFF: &str = "diff --git a/README.md b/README.md\n--- a/README.md\n+++ b/README.md\n@@ -1 +1 @@\n-old\n+new\n";

    #[test]
    fn test_plain_git_diff_passes_through() {
        assert_eq!(extract_unified_diff(GIT_DIFF).unwrap(), GIT_DIFF);
    }

    #[test]
    fn test_fenced_diff_with_prose() {
        let text = format!("Sure! Here is the change:\n\n```diff\n{GIT_DIFF}```\n\nLet me know.");
        assert_eq!(extract_unified_diff(&text).unwrap(), GIT_DIFF);
    }

    #[test]
    fn test_crlf_is_normalized() {
        let text = GIT_DIFF.replace('\n', "\r\n");
        assert_eq!(extract_unified_diff(&text).unwrap(), GIT_DIFF);
    }

    #[test]
    fn test_plain_header_pair_without_git_prefix() {
        let text = "Patch follows\n--- a/x.txt\n+++ b/x.txt\n@@ -1 +1 @@\n-a\n+b\n";
        let diff = extract_unified_diff(text).unwrap();
        assert!(diff.starts_with("--- a/x.txt\n+++ b/x.txt\n"));
        assert!(diff.ends_with("+b\n"));
    }

    #[test]
    fn test_trailing_separator_and_prose_dropped() {
        let text = format!("{GIT_DIFF}---\nThis change updates the README.\n");
        assert_eq!(extract_unified_diff(&text).unwrap(), GIT_DIFF);
    }

    #[test]
    fn test_unfenced_trailing_fence_dropped() {
        let text = format!("{GIT_DIFF}```\nextra words\n");
        assert_eq!(extract_unified_diff(&text).unwrap(), GIT_DIFF);
    }

    #[test]
    fn test_unfenced_diff_adding_code_block_is_kept_whole() {
        let diff = "diff --git a/README.md b/README.md\n--- a/README.md\n+++ b/README.md\n@@ -1 +1,5 @@\n # Demo\n+\n+```bash\n+cargo run\n+```\n";
        assert_eq!(extract_unified_diff(diff).unwrap(), diff);
    }

    #[test]
    fn test_fenced_diff_adding_code_block() {
        let diff = "diff --git a/README.md b/README.md\n--- a/README.md\n+++ b/README.md\n@@ -1 +1,4 @@\n # Demo\n+```sh\n+make\n+```\n";
        let text = format!("Here you go:\n```diff\n{diff}```\nDone.");
        assert_eq!(extract_unified_diff(&text).unwrap(), diff);
    }

    #[test]
    fn test_front_matter_context_lines_survive() {
        let diff = "diff --git a/docs/post.md b/docs/post.md\n--- a/docs/post.md\n+++ b/docs/post.md\n@@ -1,3 +1,3 @@\n ---\n-title: Old\n+title: New\n ---\n";
        assert_eq!(extract_unified_diff(diff).unwrap(), diff);
    }

    #[test]
    fn test_missing_header_reports_preview() {
        let err = extract_unified_diff("I could not do that.\nSorry.").unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, TanukiError::Patch { .. }));
        assert!(message.contains("recognizable unified diff"));
        assert!(message.contains("I could not do that.\\nSorry."));
    }

    #[test]
    fn test_preview_is_bounded() {
        let err = extract_unified_diff(&"x".repeat(5000)).unwrap_err();
        assert!(err.to_string().len() < 700);
    }

    #[test]
    fn test_repairable_markers() {
        assert!(is_repairable("error: corrupt patch at line 7"));
        assert!(is_repairable("git apply --check failed:\nCommand failed"));
        assert!(is_repairable("error: patch failed: index.html:3"));
        assert!(!is_repairable("Command failed: npm test"));
        assert!(!is_repairable("Model did not return a recognizable unified diff"));
    }
}
