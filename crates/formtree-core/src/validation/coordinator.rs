#![forbid(unsafe_code)]

//! Token-based staleness tracking for async field validation.
//!
//! Every validation run of a field is issued a monotonically increasing
//! [`ValidationToken`]. A result is applied only if its token is still the
//! field's current token; any value change or newer run supersedes older
//! tokens. Every lifecycle step is recorded in a bounded [`ValidationTrace`]
//! that can be checksummed and checked against its invariants.
//!
//! # Invariants
//!
//! 1. Tokens are strictly monotonic per coordinator; token 0 means "none".
//! 2. A result whose token is older than the current token is never applied.
//! 3. At most one validation is in flight: starting a run cancels the rest.

use std::collections::VecDeque;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use crate::scheduler::Clock;

// ---------------------------------------------------------------------------
// ValidationToken
// ---------------------------------------------------------------------------

/// Version stamp of one validation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValidationToken(u64);

impl ValidationToken {
    /// The null token representing no validation.
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ValidationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ValidationEvent
// ---------------------------------------------------------------------------

/// One step in the validation lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValidationEvent {
    Started {
        token: ValidationToken,
        elapsed_ns: u64,
    },
    /// Superseded by a newer run or a value change.
    Cancelled {
        token: ValidationToken,
        superseded_by: ValidationToken,
        elapsed_ns: u64,
    },
    Completed {
        token: ValidationToken,
        is_valid: bool,
        duration_ns: u64,
        elapsed_ns: u64,
    },
    Applied {
        token: ValidationToken,
        is_valid: bool,
        elapsed_ns: u64,
    },
    StaleDiscarded {
        token: ValidationToken,
        current_token: ValidationToken,
        elapsed_ns: u64,
    },
}

impl ValidationEvent {
    #[must_use]
    pub fn token(&self) -> ValidationToken {
        match self {
            Self::Started { token, .. }
            | Self::Cancelled { token, .. }
            | Self::Completed { token, .. }
            | Self::Applied { token, .. }
            | Self::StaleDiscarded { token, .. } => *token,
        }
    }

    /// Event type name for logging.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Cancelled { .. } => "cancelled",
            Self::Completed { .. } => "completed",
            Self::Applied { .. } => "applied",
            Self::StaleDiscarded { .. } => "stale_discarded",
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationTrace
// ---------------------------------------------------------------------------

const DEFAULT_TRACE_CAPACITY: usize = 256;

/// Bounded log of validation events; the oldest events are dropped first.
#[derive(Debug, Clone)]
pub struct ValidationTrace {
    events: VecDeque<ValidationEvent>,
    capacity: usize,
}

impl Default for ValidationTrace {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRACE_CAPACITY)
    }
}

impl ValidationTrace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, event: ValidationEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn events(&self) -> impl Iterator<Item = &ValidationEvent> {
        self.events.iter()
    }

    #[must_use]
    pub fn contains_event_type(&self, token: ValidationToken, event_type: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.token() == token && e.event_type() == event_type)
    }

    #[must_use]
    pub fn events_for_token(&self, token: ValidationToken) -> Vec<&ValidationEvent> {
        self.events.iter().filter(|e| e.token() == token).collect()
    }

    /// Order-sensitive hash of every retained event.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for event in &self.events {
            event.hash(&mut hasher);
        }
        hasher.finish()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Descriptions of every broken invariant; empty when the trace is sound.
    #[must_use]
    pub fn verify_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();

        let mut last_started = ValidationToken::NONE;
        for event in &self.events {
            if let ValidationEvent::Started { token, .. } = event {
                if *token <= last_started {
                    violations.push(format!(
                        "non-monotonic start token: {token} after {last_started}"
                    ));
                }
                last_started = *token;
            }
        }

        for event in &self.events {
            if let ValidationEvent::StaleDiscarded {
                token,
                current_token,
                ..
            } = event
                && token >= current_token
            {
                violations.push(format!(
                    "stale discard of a current token: {token} >= {current_token}"
                ));
            }
        }

        violations
    }
}

// ---------------------------------------------------------------------------
// AsyncValidationCoordinator
// ---------------------------------------------------------------------------

/// A validation run that has not reported back yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightValidation {
    pub token: ValidationToken,
    pub started_at: Duration,
}

/// Issues tokens and decides which results are still fresh.
pub struct AsyncValidationCoordinator {
    next_token: u64,
    current_token: ValidationToken,
    in_flight: VecDeque<InFlightValidation>,
    trace: ValidationTrace,
    clock: Clock,
    last_outcome: Option<bool>,
}

impl std::fmt::Debug for AsyncValidationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncValidationCoordinator")
            .field("current_token", &self.current_token)
            .field("in_flight_count", &self.in_flight.len())
            .field("trace_events", &self.trace.len())
            .finish()
    }
}

impl Default for AsyncValidationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncValidationCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Clock::system())
    }

    /// Timestamp trace events with `clock`; use a manual clock for
    /// reproducible checksums.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            next_token: 1,
            current_token: ValidationToken::NONE,
            in_flight: VecDeque::new(),
            trace: ValidationTrace::new(),
            clock,
            last_outcome: None,
        }
    }

    fn elapsed_ns(&self) -> u64 {
        u64::try_from(self.clock.now().as_nanos()).unwrap_or(u64::MAX)
    }

    fn issue(&mut self) -> ValidationToken {
        let token = ValidationToken(self.next_token);
        self.next_token += 1;
        self.current_token = token;
        token
    }

    fn cancel_in_flight(&mut self, superseded_by: ValidationToken) -> bool {
        let elapsed_ns = self.elapsed_ns();
        let cancelled = !self.in_flight.is_empty();
        for validation in self.in_flight.drain(..) {
            self.trace.push(ValidationEvent::Cancelled {
                token: validation.token,
                superseded_by,
                elapsed_ns,
            });
        }
        cancelled
    }

    /// Begin a run, cancelling whatever was in flight.
    pub fn start_validation(&mut self) -> ValidationToken {
        let token = self.issue();
        self.cancel_in_flight(token);
        let elapsed_ns = self.elapsed_ns();
        self.in_flight.push_back(InFlightValidation {
            token,
            started_at: self.clock.now(),
        });
        self.trace.push(ValidationEvent::Started { token, elapsed_ns });
        token
    }

    /// Invalidate every outstanding token without starting a run. Returns
    /// whether anything was in flight.
    pub fn supersede(&mut self) -> bool {
        let token = self.issue();
        self.cancel_in_flight(token)
    }

    /// Report a finished run. Returns `true` if the result may be applied.
    pub fn try_apply(&mut self, token: ValidationToken, is_valid: bool) -> bool {
        let now = self.clock.now();
        let elapsed_ns = self.elapsed_ns();
        let duration_ns = self
            .in_flight
            .iter()
            .find(|v| v.token == token)
            .map_or(0, |v| {
                u64::try_from(now.saturating_sub(v.started_at).as_nanos()).unwrap_or(u64::MAX)
            });
        self.trace.push(ValidationEvent::Completed {
            token,
            is_valid,
            duration_ns,
            elapsed_ns,
        });
        self.in_flight.retain(|v| v.token != token);

        if token < self.current_token {
            tracing::trace!(%token, current = %self.current_token, "stale validation result discarded");
            self.trace.push(ValidationEvent::StaleDiscarded {
                token,
                current_token: self.current_token,
                elapsed_ns,
            });
            return false;
        }

        self.last_outcome = Some(is_valid);
        self.trace.push(ValidationEvent::Applied {
            token,
            is_valid,
            elapsed_ns,
        });
        true
    }

    #[must_use]
    pub fn current_token(&self) -> ValidationToken {
        self.current_token
    }

    /// Outcome of the most recently applied run.
    #[must_use]
    pub fn last_outcome(&self) -> Option<bool> {
        self.last_outcome
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    #[must_use]
    pub fn trace(&self) -> &ValidationTrace {
        &self.trace
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    pub fn verify_trace(&self) -> Result<(), Vec<String>> {
        let violations = self.trace.verify_invariants();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualClock;

    fn manual() -> (ManualClock, AsyncValidationCoordinator) {
        let clock = ManualClock::new();
        let coordinator = AsyncValidationCoordinator::with_clock(Clock::manual(&clock));
        (clock, coordinator)
    }

    #[test]
    fn token_basics() {
        assert!(ValidationToken::NONE.is_none());
        assert_eq!(ValidationToken::from_raw(42).raw(), 42);
        assert!(ValidationToken::from_raw(1) < ValidationToken::from_raw(2));
        assert_eq!(ValidationToken::from_raw(123).to_string(), "Token(123)");
    }

    #[test]
    fn tokens_are_monotonic() {
        let (clock, mut coordinator) = manual();
        let mut tokens = Vec::new();
        for _ in 0..10 {
            clock.advance(Duration::from_micros(1));
            tokens.push(coordinator.start_validation());
        }
        assert!(tokens.windows(2).all(|w| w[0] < w[1]));
        assert!(coordinator.trace().verify_invariants().is_empty());
    }

    #[test]
    fn stale_result_is_ignored() {
        let (clock, mut coordinator) = manual();
        let first = coordinator.start_validation();
        clock.advance(Duration::from_millis(1));
        let second = coordinator.start_validation();
        clock.advance(Duration::from_millis(1));

        assert!(!coordinator.try_apply(first, false));
        assert!(coordinator.try_apply(second, true));
        assert_eq!(coordinator.last_outcome(), Some(true));
        assert!(coordinator.trace().contains_event_type(first, "cancelled"));
        assert!(coordinator.trace().contains_event_type(first, "stale_discarded"));
        assert!(coordinator.verify_trace().is_ok());
    }

    #[test]
    fn supersede_invalidates_without_starting() {
        let (_clock, mut coordinator) = manual();
        let token = coordinator.start_validation();
        assert!(coordinator.supersede());
        assert!(!coordinator.has_in_flight());
        assert!(!coordinator.try_apply(token, true));
        assert!(!coordinator.supersede());
    }

    #[test]
    fn trace_records_full_lifecycle() {
        let (clock, mut coordinator) = manual();
        let token = coordinator.start_validation();
        clock.advance(Duration::from_millis(5));
        assert!(coordinator.try_apply(token, true));

        let events = coordinator.trace().events_for_token(token);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[1],
            ValidationEvent::Completed { duration_ns: 5_000_000, .. }
        ));
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[test]
    fn checksum_is_deterministic_under_manual_clock() {
        let run = || {
            let (clock, mut coordinator) = manual();
            for _ in 0..5 {
                let token = coordinator.start_validation();
                clock.advance(Duration::from_micros(500));
                coordinator.try_apply(token, true);
            }
            coordinator.trace().checksum()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn checksum_differs_on_different_outcomes() {
        let (_clock, mut coordinator) = manual();
        let t1 = coordinator.start_validation();
        coordinator.try_apply(t1, true);
        let before = coordinator.trace().checksum();
        let t2 = coordinator.start_validation();
        coordinator.try_apply(t2, false);
        assert_ne!(before, coordinator.trace().checksum());
    }

    #[test]
    fn trace_is_bounded() {
        let mut trace = ValidationTrace::with_capacity(3);
        for raw in 1..=5 {
            trace.push(ValidationEvent::Started {
                token: ValidationToken::from_raw(raw),
                elapsed_ns: 0,
            });
        }
        assert_eq!(trace.len(), 3);
        assert_eq!(
            trace.events().next().map(ValidationEvent::token),
            Some(ValidationToken::from_raw(3))
        );
    }

    #[test]
    fn verify_flags_broken_traces() {
        let mut trace = ValidationTrace::new();
        trace.push(ValidationEvent::Started {
            token: ValidationToken::from_raw(2),
            elapsed_ns: 0,
        });
        trace.push(ValidationEvent::Started {
            token: ValidationToken::from_raw(1),
            elapsed_ns: 0,
        });
        trace.push(ValidationEvent::StaleDiscarded {
            token: ValidationToken::from_raw(3),
            current_token: ValidationToken::from_raw(3),
            elapsed_ns: 0,
        });
        assert_eq!(trace.verify_invariants().len(), 2);
    }
}
