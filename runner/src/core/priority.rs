//! Priority derivation from issue body markers.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Priority;

/// Body markers in priority order. The first match (highest priority) wins.
static MARKERS: LazyLock<[(Priority, Regex); 5]> = LazyLock::new(|| {
    let marker = |level: u8, name: &str| {
        let pattern = format!(r"(?i)\b{level}\s*-\s*{name}\b");
        (Priority(level), Regex::new(&pattern).unwrap())
    };
    [
        marker(1, "critical"),
        marker(2, "high"),
        marker(3, "medium"),
        marker(4, "low"),
        marker(5, "trivial"),
    ]
});

/// Derive the priority of an item from its body text.
///
/// Returns [`Priority::UNKNOWN`] when no marker is present.
pub fn priority_of(body: &str) -> Priority {
    MARKERS
        .iter()
        .find(|(_, re)| re.is_match(body))
        .map(|(priority, _)| *priority)
        .unwrap_or(Priority::UNKNOWN)
}
