//! Rerank scoring: one scoring-model call per recalled candidate.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::llm_client::{fill_template, ChatModel};
use crate::retrieval::prompts::RERANK_PROMPT_TEMPLATE;

static FIRST_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+").expect("static regex is valid"));

/// A recalled candidate with its rerank score. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub content: String,
    /// 0–100.
    pub score: u8,
}

/// Parses the first integer anywhere in `response` and clamps it to [0, 100].
///
/// A model that ignores the "integer only" instruction and leads with an
/// unrelated number gets that number; callers accept this.
pub fn parse_score(response: &str) -> Option<u8> {
    let m = FIRST_INTEGER.find(response)?;
    let digits = m.as_str();
    let value = digits.parse::<i64>().unwrap_or(if digits.starts_with('-') {
        i64::MIN
    } else {
        i64::MAX
    });
    Some(value.clamp(0, 100) as u8)
}

/// Truncates to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Scores one candidate. Provider and parse failures score 0 and never
/// propagate.
pub async fn score_candidate(
    model: &dyn ChatModel,
    query: &str,
    candidate: &str,
    max_chars: usize,
) -> u8 {
    let prompt = fill_template(
        RERANK_PROMPT_TEMPLATE,
        &[
            ("query", query),
            ("candidate", truncate_chars(candidate, max_chars)),
        ],
    );

    match model.chat(&prompt).await {
        Ok(response) => parse_score(&response).unwrap_or_else(|| {
            warn!(
                "Rerank response had no integer, scoring 0: {:?}",
                response.chars().take(60).collect::<String>()
            );
            0
        }),
        Err(e) => {
            warn!("Rerank call failed, scoring candidate 0: {e}");
            0
        }
    }
}

/// Stable descending sort: equal scores keep recall order.
pub fn sort_by_score(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| b.score.cmp(&a.score));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_integer() {
        assert_eq!(parse_score("87"), Some(87));
        assert_eq!(parse_score("  42\n"), Some(42));
    }

    #[test]
    fn test_parse_takes_first_integer() {
        assert_eq!(parse_score("Score: 75 out of 100"), Some(75));
    }

    #[test]
    fn test_parse_clamps_out_of_range() {
        assert_eq!(parse_score("150"), Some(100));
        assert_eq!(parse_score("-5"), Some(0));
        assert_eq!(parse_score("99999999999999999999999"), Some(100));
    }

    #[test]
    fn test_parse_without_integer_is_none() {
        assert_eq!(parse_score("highly relevant"), None);
        assert_eq!(parse_score(""), None);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 2000), "short");
    }

    #[test]
    fn test_sort_is_stable_for_ties() {
        let candidate = |content: &str, score: u8| ScoredCandidate {
            content: content.to_string(),
            score,
        };
        let mut candidates = vec![candidate("a", 50), candidate("b", 80), candidate("c", 50)];
        sort_by_score(&mut candidates);
        let order: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }
}
