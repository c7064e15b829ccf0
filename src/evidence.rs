//! Supporting-evidence extraction for question-answering responses.
//!
//! The model is asked to quote the document. We pull every quoted span out of its answer and keep
//! only the ones that literally occur in the source text, so made-up quotes never get highlighted.

use std::sync::OnceLock;

use regex::Regex;

/// Upper bound on returned snippets.
pub const MAX_EVIDENCE: usize = 3;

/// Spans shorter than this (after trimming) are too weak to count as evidence.
const MIN_SNIPPET_CHARS: usize = 10;

fn patterns() -> &'static [Regex; 3] {
  static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
  PATTERNS.get_or_init(|| {
    [
      Regex::new(r#"(?is)"([^"]+)""#).expect("double-quote pattern"),
      Regex::new(r#"(?is)'([^']+)'"#).expect("single-quote pattern"),
      Regex::new(r#"(?is)Supporting Evidence.*?["']([^"']+)["']"#).expect("marker pattern"),
    ]
  })
}

/// Quoted spans from `response` that also appear (case-insensitively) in `source`.
/// Order: double-quote matches, then single-quote matches, then marker matches. At most 3.
pub fn extract_evidence(response: &str, source: &str) -> Vec<String> {
  let haystack = source.to_lowercase();
  patterns()
    .iter()
    .flat_map(|re| re.captures_iter(response).filter_map(|c| c.get(1)))
    .map(|m| m.as_str().trim())
    .filter(|s| s.chars().count() > MIN_SNIPPET_CHARS && haystack.contains(&s.to_lowercase()))
    .take(MAX_EVIDENCE)
    .map(str::to_string)
    .collect()
}
