//! External identifier normalization
//!
//! DOIs arrive with resolver prefixes, mixed case and, for preprint servers,
//! a trailing `.vN` revision marker. Entries store the canonical form; lookups
//! also accept legacy rows that still carry the revision marker.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.v\d+$").unwrap());

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// Canonical DOI form, or `None` when nothing usable is left.
pub fn canonical_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim().to_lowercase();
    for prefix in DOI_PREFIXES {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim_start().to_string();
            break;
        }
    }
    let doi = strip_version(&doi).trim().to_string();
    if doi.is_empty() {
        None
    } else {
        Some(doi)
    }
}

/// Drop a trailing `.vN` revision marker.
pub fn strip_version(doi: &str) -> &str {
    match VERSION_SUFFIX.find(doi) {
        Some(m) => &doi[..m.start()],
        None => doi,
    }
}

/// Whether a stored DOI refers to the same work as a canonical one.
pub fn doi_matches(stored: &str, canonical: &str) -> bool {
    stored == canonical || strip_version(stored) == canonical
}

/// SQL `LIKE` pattern matching legacy `canonical.vN` rows.
pub fn versioned_like_pattern(canonical: &str) -> String {
    let escaped = canonical
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{escaped}.v%")
}

/// Trimmed, non-empty identifier value.
pub fn present(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
