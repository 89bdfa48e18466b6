//! Pure timing decisions for placeholder and loading display.
//!
//! Stateless given a clock: the engine passes timestamps in, so every
//! decision is exact under a paused test clock.

use std::time::Duration;

use tokio::time::Instant;

use latch_types::{LoadingConfig, PlaceholderConfig};

/// When optional content becomes eligible for display after a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayTiming {
    ShowNow,
    ShowAfter(Duration),
}

/// Whether a settled load may surface while the loading block is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionGate {
    ReadyNow,
    /// The loading block's minimum display duration has not elapsed yet.
    HoldFor(Duration),
}

/// Decide when the placeholder block may appear after the trigger.
#[must_use]
pub fn placeholder_display(config: PlaceholderConfig) -> DisplayTiming {
    delay_timing(config.after_delay)
}

/// Decide when the loading block may appear after the trigger. If the load
/// settles before this delay elapses, the loading block is skipped entirely.
#[must_use]
pub fn loading_display(config: LoadingConfig) -> DisplayTiming {
    delay_timing(config.after_delay)
}

/// Gate the terminal transition on the loading block's minimum display
/// duration, measured from when the loading block became visible.
#[must_use]
pub fn completion_gate(config: LoadingConfig, entered_loading: Instant, now: Instant) -> CompletionGate {
    let Some(minimum) = config.minimum_duration else {
        return CompletionGate::ReadyNow;
    };
    let shown_for = now.saturating_duration_since(entered_loading);
    if shown_for >= minimum {
        CompletionGate::ReadyNow
    } else {
        CompletionGate::HoldFor(minimum - shown_for)
    }
}

fn delay_timing(after_delay: Option<Duration>) -> DisplayTiming {
    match after_delay {
        None => DisplayTiming::ShowNow,
        Some(delay) if delay.is_zero() => DisplayTiming::ShowNow,
        Some(delay) => DisplayTiming::ShowAfter(delay),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_zero_delay_shows_immediately() {
        assert_eq!(
            placeholder_display(PlaceholderConfig { after_delay: None }),
            DisplayTiming::ShowNow
        );
        assert_eq!(
            placeholder_display(PlaceholderConfig {
                after_delay: Some(Duration::ZERO)
            }),
            DisplayTiming::ShowNow
        );
        assert_eq!(
            loading_display(LoadingConfig {
                after_delay: Some(Duration::from_millis(250)),
                minimum_duration: None,
            }),
            DisplayTiming::ShowAfter(Duration::from_millis(250))
        );
    }

    #[test]
    fn completion_gate_without_minimum_is_ready() {
        let entered = Instant::now();
        let gate = completion_gate(LoadingConfig::default(), entered, entered);
        assert_eq!(gate, CompletionGate::ReadyNow);
    }

    #[test]
    fn completion_gate_holds_for_remaining_minimum() {
        let config = LoadingConfig {
            minimum_duration: Some(Duration::from_millis(500)),
            after_delay: None,
        };
        let entered = Instant::now();

        let gate = completion_gate(config, entered, entered + Duration::from_millis(100));
        assert_eq!(gate, CompletionGate::HoldFor(Duration::from_millis(400)));

        let gate = completion_gate(config, entered, entered + Duration::from_millis(500));
        assert_eq!(gate, CompletionGate::ReadyNow);

        let gate = completion_gate(config, entered, entered + Duration::from_millis(900));
        assert_eq!(gate, CompletionGate::ReadyNow);
    }
}
