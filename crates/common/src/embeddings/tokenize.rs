//! Tokenization shared by every embedding provider
//!
//! Lowercased word tokens with URLs, numbers, single characters and common
//! English function words removed.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::collections::HashSet;

use crate::errors::{AppError, Result};

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(https?://|www\.)\S+").unwrap());
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z][a-z0-9\-]*[a-z0-9]").unwrap());

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "able", "about", "above", "according", "across", "after", "again", "against", "all",
        "almost", "also", "although", "always", "am", "among", "an", "and", "another", "any",
        "are", "around", "as", "at", "available", "be", "became", "because", "been", "before",
        "being", "below", "between", "both", "but", "by", "can", "cannot", "could", "did",
        "different", "do", "does", "doi", "doing", "done", "down", "during", "each", "either",
        "else", "et", "al", "etc", "even", "ever", "every", "for", "from", "further", "had",
        "has", "have", "having", "he", "her", "here", "his", "how", "however", "i", "ie", "if",
        "in", "into", "is", "it", "its", "itself", "just", "less", "license", "like", "many",
        "may", "might", "more", "most", "much", "must", "new", "no", "non", "nor", "not",
        "novel", "now", "of", "off", "often", "on", "once", "only", "onto", "or", "other",
        "our", "out", "over", "overall", "own", "per", "rather", "respectively", "same",
        "several", "should", "since", "so", "some", "such", "than", "that", "the", "their",
        "them", "then", "there", "therefore", "these", "they", "this", "those", "though",
        "through", "thus", "to", "together", "too", "toward", "towards", "under", "until",
        "up", "upon", "us", "use", "used", "using", "various", "very", "via", "vs", "was",
        "we", "well", "were", "what", "when", "where", "whereas", "whether", "which", "while",
        "who", "whom", "whose", "why", "will", "with", "within", "without", "would", "yet",
        "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Content tokens of `text`, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let stripped = URL.replace_all(&lowered, " ");
    WORD.find_iter(&stripped)
        .map(|m| m.as_str())
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Reject texts too short to produce a meaningful embedding.
pub fn ensure_min_tokens(tokens: &[String], minimum: usize) -> Result<()> {
    if tokens.len() < minimum {
        return Err(AppError::EmbeddingTooShort {
            tokens: tokens.len(),
            minimum,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_stopwords_urls_and_numbers() {
        let tokens = tokenize("The SARS-CoV-2 spike binds ACE2 in 95 % of cases, see https://x.org/a");
        assert_eq!(tokens, vec!["sars-cov-2", "spike", "binds", "ace2", "cases", "see"]);
    }

    #[test]
    fn test_min_tokens() {
        let tokens = tokenize("viral load");
        assert!(matches!(
            ensure_min_tokens(&tokens, 10),
            Err(AppError::EmbeddingTooShort { tokens: 2, minimum: 10 })
        ));
        assert!(ensure_min_tokens(&tokens, 2).is_ok());
    }
}
