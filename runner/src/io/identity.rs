//! Worker identity generation.

use std::fs;

use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};

use crate::core::types::WorkerId;

/// Build the identity for this process: host, pid, start time, random suffix.
///
/// Call once at startup and thread the value through the orchestration calls.
pub fn new_worker_id() -> WorkerId {
    let host = sanitize(&hostname());
    let pid = std::process::id();
    let started = Utc::now().format("%Y%m%dT%H%M%S");
    WorkerId::new(format!("{host}-{pid}-{started}-{}", short_suffix()))
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

/// Keep identities safe to embed in comment markers.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn short_suffix() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_are_unique_and_marker_safe() {
        let a = new_worker_id();
        let b = new_worker_id();
        assert_ne!(a, b);
        assert!(!a.as_str().chars().any(char::is_whitespace));
        assert!(!a.as_str().contains("-->"));
        assert!(a.as_str().contains(&format!("-{}-", std::process::id())));
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize("build box 01"), "build_box_01");
        assert_eq!(sanitize("ci-runner.local"), "ci_runner.local");
    }
}
