//! Text cleanup for merged entries
//!
//! Every rule here is a fixed point: cleaning already-clean text changes
//! nothing, which keeps repeated sweeps from drifting.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use scholarmerge_common::identifiers;
use scholarmerge_common::models::{Author, EntryDocument};

const PRE_PROOF_MARKERS: [&str; 2] = ["Journal Pre-proofs", "Journal Pre-proof"];

const SPACED_ABSTRACT_MARKER: &str = "a b s t r a c t";

/// Longest first, so "Abstract Background" wins over "Abstract".
const PREAMBLES: &[&str] = &[
    "Graphical Abstract Highlights d",
    "Abstract Background",
    "Abstract:",
    "Abstract",
    "Resumen",
    "Résumé",
    "publicly funded repositories, such as the WHO COVID database with rights for unrestricted \
     research re-use and analyses in any form or by any means with acknowledgement of the \
     original source. These permissions are granted for free by Elsevier for as long as the \
     COVID-19 resource centre remains active.",
];

const JOURNAL_ALIASES: &[(&str, &str)] = &[
    ("PLoS ONE", "PLOS ONE"),
    ("PLoS One", "PLOS ONE"),
    ("PLoS Med", "PLOS Medicine"),
    ("PLoS Pathog", "PLOS Pathogens"),
];

/// Bound on clean passes; each pass only ever shortens the text.
const MAX_PASSES: usize = 8;

static JATS_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*<jats:title>.*?</jats:title>").unwrap());
static JATS_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?jats:[^>]*>").unwrap());
static OPEN_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([A-Za-z][A-Za-z0-9]*)[^<>]*>").unwrap());
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[A-Za-z][^<>]*>").unwrap());
static LEADING_TAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\s*</?[A-Za-z][^<>]*>)+").unwrap());
static TRAILING_TAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:</?[A-Za-z][^<>]*>\s*)+$").unwrap());
static SPACED_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:[\w.!?,]\s)+").unwrap());
static CHAR_THEN_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\S)\s").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strip pre-proof markers. Returns the title (None when nothing is left)
/// and whether a marker was found.
pub fn clean_title(title: &str) -> (Option<String>, bool) {
    let found = PRE_PROOF_MARKERS.iter().any(|m| title.contains(m));
    let mut cleaned = title.to_string();
    for marker in PRE_PROOF_MARKERS {
        cleaned = cleaned.replace(marker, " ");
    }
    let cleaned = cleaned.trim();
    let cleaned = (!cleaned.is_empty()).then(|| cleaned.to_string());
    (cleaned, found)
}

pub fn clean_abstract(text: &str) -> Option<String> {
    let mut current = text.trim().to_string();
    for _ in 0..MAX_PASSES {
        let next = clean_abstract_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    (!current.is_empty()).then_some(current)
}

fn clean_abstract_once(text: &str) -> String {
    let mut text = match text.rfind(SPACED_ABSTRACT_MARKER) {
        Some(at) => text[at + SPACED_ABSTRACT_MARKER.len()..].to_string(),
        None => text.to_string(),
    };

    text = JATS_TITLE.replace(&text, "").into_owned();
    text = JATS_TAG.replace_all(&text, "").into_owned();

    if has_paired_tag(&text) {
        text = ANY_TAG.replace_all(&text, "").into_owned();
    }

    text = strip_preambles(text.trim());
    text = collapse_letter_spacing(&text);
    text.trim().to_string()
}

/// Only markup with a matching close tag counts; bare comparison signs stay.
fn has_paired_tag(text: &str) -> bool {
    OPEN_TAG
        .captures_iter(text)
        .any(|caps| text.contains(&format!("</{}>", &caps[1])))
}

fn strip_preambles(text: &str) -> String {
    let mut rest = text;
    loop {
        let before = rest;
        rest = LEADING_TAGS.find(rest).map_or(rest, |m| &rest[m.end()..]).trim_start();
        rest = TRAILING_TAGS.find(rest).map_or(rest, |m| &rest[..m.start()]).trim_end();

        if let Some(preamble) = PREAMBLES.iter().find(|p| starts_with_word(rest, p)) {
            rest = rest[preamble.len()..].trim_start();
        }
        if rest == before {
            return rest.to_string();
        }
    }
}

/// Prefix match that refuses to split a word ("Abstraction" keeps its head).
fn starts_with_word(text: &str, prefix: &str) -> bool {
    if !text.starts_with(prefix) {
        return false;
    }
    let ends_in_word = prefix.chars().last().is_some_and(char::is_alphanumeric);
    let next_in_word = text[prefix.len()..]
        .chars()
        .next()
        .is_some_and(char::is_alphanumeric);
    !(ends_in_word && next_in_word)
}

/// "T h i s  i s" extraction artifacts become "This is".
fn collapse_letter_spacing(text: &str) -> String {
    let total = text.chars().count();
    if total == 0 {
        return String::new();
    }
    let spaced: usize = SPACED_RUN
        .find_iter(text)
        .map(|m| m.as_str().chars().count())
        .sum();
    if spaced * 4 <= total * 3 {
        return text.to_string();
    }
    let joined = CHAR_THEN_SPACE.replace_all(text, "$1");
    WHITESPACE.replace_all(&joined, " ").into_owned()
}

pub fn canonical_journal(journal: &str) -> String {
    let journal = journal.trim();
    JOURNAL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == journal)
        .map_or_else(|| journal.to_string(), |(_, name)| name.to_string())
}

/// Splits "Last, First". Names with any other comma count are not inverted.
fn last_first(name: &str) -> Option<(&str, &str)> {
    if name.matches(',').count() != 1 {
        return None;
    }
    let (last, first) = name.split_once(',')?;
    let (last, first) = (last.trim(), first.trim());
    (!last.is_empty() && !first.is_empty()).then_some((last, first))
}

/// "Last, First" becomes "First Last"; anything else is kept.
pub fn display_name(name: &str) -> String {
    let name = name.trim();
    match last_first(name) {
        Some((last, first)) => format!("{} {}", first, last),
        None => name.to_string(),
    }
}

fn clean_author(author: &mut Author) {
    if author.first.is_none() && author.last.is_none() {
        if let Some((last, first)) = last_first(author.name.trim()) {
            author.last = Some(last.to_string());
            author.first = Some(first.to_string());
        }
    }
    author.name = display_name(&author.name);
}

/// Apply every cleanup rule to a freshly merged entry.
///
/// `carried_pre_proof` is the flag of the document the title came from, so a
/// title cleaned on an earlier merge keeps its marker history.
pub fn finish(entry: &mut EntryDocument, carried_pre_proof: bool, now: DateTime<Utc>) {
    let record = &mut entry.record;

    let (title, marker) = match record.title.as_deref() {
        Some(title) => clean_title(title),
        None => (None, false),
    };
    record.title = title;
    entry.is_pre_proof = marker || carried_pre_proof;

    record.abstract_text = record.abstract_text.as_deref().and_then(clean_abstract);

    record.journal = record
        .journal
        .as_deref()
        .map(canonical_journal)
        .filter(|j| !j.is_empty());

    // Missing, unparsable, and placeholder future dates all fall back to
    // ingestion time.
    if !record.publication_date.is_some_and(|date| date <= now) {
        record.publication_date = Some(record.created_at);
        record.has_year = false;
        record.has_month = false;
        record.has_day = false;
    }

    record.doi = record.canonical_doi();
    record.pmcid = identifiers::present(record.pmcid.as_deref());
    record.pubmed_id = identifiers::present(record.pubmed_id.as_deref());
    record.scopus_eid = identifiers::present(record.scopus_eid.as_deref());

    for author in &mut record.authors {
        clean_author(author);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use scholarmerge_common::models::PaperRecord;

    #[test]
    fn test_pre_proof_title() {
        assert_eq!(
            clean_title("Journal Pre-proof Masks work"),
            (Some("Masks work".to_string()), true)
        );
        assert_eq!(
            clean_title("Journal Pre-proofs Masks work"),
            (Some("Masks work".to_string()), true)
        );
        assert_eq!(clean_title("Journal Pre-proof"), (None, true));
        assert_eq!(clean_title(" Plain "), (Some("Plain".to_string()), false));
    }

    #[test]
    fn test_spaced_marker_discards_prefix() {
        assert_eq!(
            clean_abstract("Elsevier header a b s t r a c t The virus spreads.").as_deref(),
            Some("The virus spreads.")
        );
    }

    #[test]
    fn test_preambles() {
        assert_eq!(clean_abstract("Abstract: Results").as_deref(), Some("Results"));
        assert_eq!(
            clean_abstract("Abstract Background We studied").as_deref(),
            Some("We studied")
        );
        assert_eq!(clean_abstract("Abstract Abstract Text").as_deref(), Some("Text"));
        assert_eq!(
            clean_abstract("Abstraction layers help").as_deref(),
            Some("Abstraction layers help")
        );
        assert_eq!(clean_abstract("Résumé Le texte").as_deref(), Some("Le texte"));
        assert_eq!(clean_abstract("Abstract"), None);
    }

    #[test]
    fn test_elsevier_notice_removed() {
        let text = format!("{} Findings follow.", PREAMBLES[6]);
        assert_eq!(clean_abstract(&text).as_deref(), Some("Findings follow."));
    }

    #[test]
    fn test_jats_markup() {
        let text = "<jats:title>Abstract</jats:title><jats:p>Cases rose <jats:italic>sharply</jats:italic>.</jats:p>";
        assert_eq!(clean_abstract(text).as_deref(), Some("Cases rose sharply."));
    }

    #[test]
    fn test_html_only_stripped_when_paired() {
        assert_eq!(
            clean_abstract("<p>Viral <b>load</b> fell</p>").as_deref(),
            Some("Viral load fell")
        );
        assert_eq!(
            clean_abstract("Risk was p < 0.05 and n > 10").as_deref(),
            Some("Risk was p < 0.05 and n > 10")
        );
        assert_eq!(clean_abstract("<br>Text").as_deref(), Some("Text"));
    }

    #[test]
    fn test_letter_spacing_collapsed() {
        assert_eq!(
            clean_abstract("T h e  v i r u s  s p r e a d s").as_deref(),
            Some("The virus spreads")
        );
        let normal = "The virus spreads quickly in dense settings.";
        assert_eq!(clean_abstract(normal).as_deref(), Some(normal));
    }

    #[test]
    fn test_cleanup_is_a_fixed_point() {
        let inputs = [
            "a b s t r a c t Abstract: <p>Body <i>text</i></p>",
            "Abstract Background <jats:p>Resumen Texto</jats:p>",
            "Graphical Abstract Highlights d Something happened",
        ];
        for input in inputs {
            let once = clean_abstract(input);
            let twice = once.as_deref().and_then(clean_abstract);
            assert_eq!(once, twice, "not stable for {input:?}");
        }
    }

    #[test]
    fn test_journal_aliases() {
        assert_eq!(canonical_journal("PLoS ONE"), "PLOS ONE");
        assert_eq!(canonical_journal("PLoS Pathog"), "PLOS Pathogens");
        assert_eq!(canonical_journal("Lancet"), "Lancet");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("Lovelace, Ada"), "Ada Lovelace");
        assert_eq!(display_name("Ada Lovelace"), "Ada Lovelace");
        assert_eq!(display_name("Smith, J., Jr"), "Smith, J., Jr");
        assert_eq!(display_name("Lovelace,"), "Lovelace,");
    }

    #[test]
    fn test_author_parts_follow_display_rule() {
        let mut entry = EntryDocument::new(PaperRecord {
            authors: vec![
                Author {
                    name: "Smith, J., Jr".into(),
                    ..Default::default()
                },
                Author {
                    name: "Hopper, Grace".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        });
        finish(&mut entry, false, Utc::now());

        let suffixed = &entry.record.authors[0];
        assert_eq!(suffixed.name, "Smith, J., Jr");
        assert_eq!((suffixed.first.as_deref(), suffixed.last.as_deref()), (None, None));

        let plain = &entry.record.authors[1];
        assert_eq!(plain.name, "Grace Hopper");
        assert_eq!(plain.first.as_deref(), Some("Grace"));
        assert_eq!(plain.last.as_deref(), Some("Hopper"));
    }

    #[test]
    fn test_finish_normalizes_record() {
        let now = Utc::now();
        let created = now - Duration::days(2);
        let mut entry = EntryDocument::new(PaperRecord {
            doi: Some(" https://doi.org/10.1/X.v3 ".into()),
            title: Some("Journal Pre-proof Title".into()),
            journal: Some("PLoS ONE".into()),
            pmcid: Some(" ".into()),
            publication_date: Some(now + Duration::days(365)),
            has_year: true,
            created_at: created,
            authors: vec![Author {
                name: "Lovelace, Ada".into(),
                ..Default::default()
            }],
            ..Default::default()
        });

        finish(&mut entry, false, now);
        let r = &entry.record;
        assert_eq!(r.doi.as_deref(), Some("10.1/x"));
        assert_eq!(r.title.as_deref(), Some("Title"));
        assert!(entry.is_pre_proof);
        assert_eq!(r.journal.as_deref(), Some("PLOS ONE"));
        assert_eq!(r.pmcid, None);
        assert_eq!(r.publication_date, Some(created));
        assert!(!r.has_year);
        assert_eq!(r.authors[0].name, "Ada Lovelace");
        assert_eq!(r.authors[0].last.as_deref(), Some("Lovelace"));

        let snapshot = entry.clone();
        finish(&mut entry, snapshot.is_pre_proof, now);
        assert_eq!(entry, snapshot);
    }

    #[test]
    fn test_finish_keeps_past_dates() {
        let now = Utc::now();
        let published = now - Duration::days(30);
        let mut entry = EntryDocument::new(PaperRecord {
            publication_date: Some(published),
            has_year: true,
            has_month: true,
            ..Default::default()
        });
        finish(&mut entry, false, now);
        assert_eq!(entry.record.publication_date, Some(published));
        assert!(entry.record.has_year && entry.record.has_month);
    }
}
