//! Approximate context-window accounting.
//!
//! Token counts are estimated, not tokenized: one token per four bytes of
//! UTF-8, rounded down. The estimate is only ever compared against itself, so
//! consistency matters more than accuracy.

/// Context window of the on-device model, in estimated tokens.
pub const MAX_CONTEXT_SIZE: usize = 4096;

/// Usage percentage above which a session counts as near its limit.
pub const NEAR_LIMIT_PERCENT: f64 = 80.0;

/// Instruction size above which session creation logs a warning.
pub const LONG_INSTRUCTIONS_TOKENS: usize = 1000;

/// Estimates the token count of `text` as `floor(bytes / 4)`.
#[must_use]
pub const fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// The pre-flight check failed: sending would overflow the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("context size would exceed limit: current={current}, new={new}, max={max}")]
pub struct ContextOverflow {
    pub current: usize,
    pub new: usize,
    pub max: usize,
}

/// Running total of estimated tokens for one session.
///
/// The counter only grows; a fresh session is the only way back to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextTracker {
    size: usize,
    max: usize,
}

impl ContextTracker {
    #[must_use]
    pub const fn new(max: usize) -> Self {
        Self { size: 0, max }
    }

    /// Starts the counter at the estimate of the session instructions.
    #[must_use]
    pub const fn seeded(instructions: &str, max: usize) -> Self {
        Self {
            size: estimate_tokens(instructions),
            max,
        }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }

    /// Fails if adding `text` would push the total past the maximum.
    ///
    /// Reaching the maximum exactly is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`ContextOverflow`] describing the rejected request.
    pub const fn check(&self, text: &str) -> Result<(), ContextOverflow> {
        let new = estimate_tokens(text);
        if self.size.saturating_add(new) > self.max {
            return Err(ContextOverflow {
                current: self.size,
                new,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Adds the estimate of `text` to the total.
    pub const fn add(&mut self, text: &str) {
        self.size = self.size.saturating_add(estimate_tokens(text));
    }

    /// `size / max * 100`.
    #[must_use]
    #[expect(
        clippy::cast_precision_loss,
        reason = "token counts stay far below 2^52"
    )]
    pub fn usage_percent(&self) -> f64 {
        if self.max == 0 {
            return 100.0;
        }
        self.size as f64 / self.max as f64 * 100.0
    }

    #[must_use]
    pub fn is_near_limit(&self) -> bool {
        self.usage_percent() > NEAR_LIMIT_PERCENT
    }

    /// Tokens left before the maximum; zero once it is reached.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.max.saturating_sub(self.size)
    }
}

impl Default for ContextTracker {
    fn default() -> Self {
        Self::new(MAX_CONTEXT_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_is_floor_of_bytes_over_four() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("2+2?"), 1);
        assert_eq!(estimate_tokens("abcdefghi"), 2);
    }

    #[test]
    fn test_estimate_tokens_counts_bytes_not_chars() {
        // Each of these characters is three bytes in UTF-8.
        assert_eq!(estimate_tokens("✓✓✓✓"), 3);
    }

    #[test]
    fn test_new_tracker_starts_empty_with_default_window() {
        let tracker = ContextTracker::default();

        assert_eq!(tracker.size(), 0);
        assert_eq!(tracker.max(), 4096);
        assert_eq!(tracker.remaining(), 4096);
    }

    #[test]
    fn test_seeded_tracker_counts_instructions() {
        let tracker = ContextTracker::seeded("You are a helpful assistant.", MAX_CONTEXT_SIZE);

        assert_eq!(tracker.size(), 7);
    }

    #[test]
    fn test_add_accumulates_prompt_and_response_estimates() {
        // Arrange
        let mut tracker = ContextTracker::default();
        let exchanges = [("2+2?", "4"), ("What is the capital of France?", "Paris.")];

        // Act
        for (prompt, response) in exchanges {
            tracker.add(prompt);
            tracker.add(response);
        }

        // Assert
        let expected: usize = exchanges
            .iter()
            .map(|(p, r)| estimate_tokens(p) + estimate_tokens(r))
            .sum();
        assert_eq!(tracker.size(), expected);
    }

    #[test]
    fn test_check_allows_exact_fill_and_rejects_overflow() {
        // Arrange
        let tracker = ContextTracker::new(10);
        let fits = "x".repeat(40);
        let overflows = "x".repeat(44);

        // Act
        let ok = tracker.check(&fits);
        let err = tracker.check(&overflows);

        // Assert
        assert!(ok.is_ok());
        assert_eq!(
            err,
            Err(ContextOverflow {
                current: 0,
                new: 11,
                max: 10
            })
        );
    }

    #[test]
    fn test_overflow_message_reports_all_counts() {
        let err = ContextOverflow {
            current: 4000,
            new: 200,
            max: 4096,
        };

        assert_eq!(
            err.to_string(),
            "context size would exceed limit: current=4000, new=200, max=4096"
        );
    }

    #[test]
    fn test_usage_and_near_limit_threshold() {
        let mut tracker = ContextTracker::new(100);
        tracker.add(&"x".repeat(320));

        assert!((tracker.usage_percent() - 80.0).abs() < f64::EPSILON);
        assert!(!tracker.is_near_limit());

        tracker.add("xxxx");
        assert!(tracker.is_near_limit());
        assert_eq!(tracker.remaining(), 19);
    }

    #[test]
    fn test_remaining_saturates_at_zero() {
        let mut tracker = ContextTracker::new(1);
        tracker.add("xxxxxxxx");

        assert_eq!(tracker.remaining(), 0);
    }
}
