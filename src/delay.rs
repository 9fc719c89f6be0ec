//! Latency specifications.
//!
//! A delay string encodes how long to wait before and after a unit of work:
//!
//! | Form         | Before | After |
//! |--------------|--------|-------|
//! | `<100ms>`    | 100ms  | 100ms |
//! | `50ms<>2s`   | 50ms   | 2s    |
//! | `100ms<`     | 100ms  | 0     |
//! | `100ms`      | 100ms  | 0     |
//! | `>100ms`     | 0      | 100ms |
//!
//! Forms are tried in the order above. Anything else is a no-op delay.

use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error};

/// A parsed latency specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParsedDelay {
    /// False when one of the duration tokens failed to parse
    pub enabled: bool,
    /// Wait applied before the work
    pub before: Duration,
    /// Wait applied after the work
    pub after: Duration,
}

struct DelayPatterns {
    around: Regex,
    both: Regex,
    before: Regex,
    after: Regex,
}

fn patterns() -> &'static DelayPatterns {
    static PATTERNS: OnceLock<DelayPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| DelayPatterns {
        around: Regex::new(r"^<([0-9a-z]*)>$").expect("valid around pattern"),
        both: Regex::new(r"([0-9a-z]*)<>([0-9a-z]*)").expect("valid both pattern"),
        before: Regex::new(r"^([0-9a-z]+)<?").expect("valid before pattern"),
        after: Regex::new(r">([0-9a-z]*)$").expect("valid after pattern"),
    })
}

impl ParsedDelay {
    /// A delay that never waits.
    pub const NONE: ParsedDelay = ParsedDelay {
        enabled: true,
        before: Duration::ZERO,
        after: Duration::ZERO,
    };

    /// Parse a latency specification.
    ///
    /// Malformed duration tokens are logged and produce a disabled delay.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec.is_empty() {
            return Self::NONE;
        }

        let p = patterns();
        let (before, after) = if let Some(caps) = p.around.captures(spec) {
            (Some(caps[1].to_string()), Some(caps[1].to_string()))
        } else if let Some(caps) = p.both.captures(spec) {
            (Some(caps[1].to_string()), Some(caps[2].to_string()))
        } else if let Some(caps) = p.before.captures(spec) {
            (Some(caps[1].to_string()), None)
        } else if let Some(caps) = p.after.captures(spec) {
            (None, Some(caps[1].to_string()))
        } else {
            (None, None)
        };

        let mut enabled = true;
        let mut resolve = |token: Option<String>| match token {
            None => Duration::ZERO,
            Some(token) => match humantime::parse_duration(&token) {
                Ok(duration) => duration,
                Err(e) => {
                    error!(delay = %spec, duration = %token, error = %e, "Failed to parse duration");
                    enabled = false;
                    Duration::ZERO
                }
            },
        };

        let before = resolve(before);
        let after = resolve(after);

        Self {
            enabled,
            before,
            after,
        }
    }

    /// Whether applying this delay would wait at all.
    pub fn is_noop(&self) -> bool {
        !self.enabled || (self.before.is_zero() && self.after.is_zero())
    }

    /// Sleep for the before duration.
    pub async fn apply_before(&self, phase: &str, target: &str) {
        if self.enabled && !self.before.is_zero() {
            debug!(
                phase,
                target,
                ms = self.before.as_millis() as u64,
                "Latency before"
            );
            tokio::time::sleep(self.before).await;
        }
    }

    /// Sleep for the after duration.
    pub async fn apply_after(&self, phase: &str, target: &str) {
        if self.enabled && !self.after.is_zero() {
            debug!(
                phase,
                target,
                ms = self.after.as_millis() as u64,
                "Latency after"
            );
            tokio::time::sleep(self.after).await;
        }
    }
}
