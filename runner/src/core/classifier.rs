//! Deterministic classification of coding-agent transcripts.
//!
//! Error categories come from an ordered rule table; the first matching rule
//! wins. Completion detection runs independently and requires both a CI-pass
//! marker and an issue-closed marker, each stated affirmatively: a marker whose
//! clause carries a negation ("not", "never", "n't", ...) does not count.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Classification, ErrorCategory};

enum Matcher {
    /// Transcript is empty or whitespace only.
    Blank,
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, transcript: &str) -> bool {
        match self {
            Matcher::Blank => transcript.trim().is_empty(),
            Matcher::Pattern(re) => re.is_match(transcript),
        }
    }
}

struct Rule {
    category: ErrorCategory,
    matcher: Matcher,
}

/// Error rules in priority order. `Success` is the fallthrough.
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let pattern = |category, re: &str| Rule {
        category,
        matcher: Matcher::Pattern(Regex::new(re).unwrap()),
    };
    vec![
        Rule {
            category: ErrorCategory::EmptyOutput,
            matcher: Matcher::Blank,
        },
        pattern(ErrorCategory::NoMessagesTransient, r"(?i)no messages (were )?returned"),
        pattern(
            ErrorCategory::NetworkTransient,
            r"(?i)\b(econnreset|econnrefused|etimedout|socket hang up|fetch failed|network error|connection (refused|reset|error|closed)|(request |operation )?timed out)\b",
        ),
        pattern(ErrorCategory::GenericError, r"(?im)^\s*error:"),
    ]
});

static CI_PASSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bci (checks )?(has |have )?(passed|succeeded)\b|\bci is (green|passing)\b|\ball (ci )?checks (have )?passed\b").unwrap()
});

static ISSUE_CLOSED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bclosed issue\b|\bissue #?\d+ (has been |was |is now )?closed\b").unwrap()
});

static NEGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(not|never|cannot|unable to|failed to)\b|n['’]t\b").unwrap()
});

/// Whether `marker` occurs in a clause that does not negate it.
///
/// The clause runs from the previous punctuation mark or line break to the
/// end of the match.
fn affirmed(marker: &Regex, transcript: &str) -> bool {
    marker.find_iter(transcript).any(|found| {
        let clause_start = transcript[..found.start()]
            .rfind(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '\n'))
            .map_or(0, |idx| idx + 1);
        !NEGATION.is_match(&transcript[clause_start..found.end()])
    })
}

/// Classify a transcript into an error category plus an independent completion flag.
pub fn classify(transcript: &str) -> Classification {
    let work_completed = affirmed(&CI_PASSED, transcript) && affirmed(&ISSUE_CLOSED, transcript);
    let category = RULES
        .iter()
        .find(|rule| rule.matcher.matches(transcript))
        .map(|rule| rule.category)
        .unwrap_or(ErrorCategory::Success);
    Classification {
        category,
        work_completed,
    }
}

/// Whether the transcript contains the literal batch-ending signal.
pub fn has_completion_signal(transcript: &str, signal: &str) -> bool {
    !signal.is_empty() && transcript.contains(signal)
}
