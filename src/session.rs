//! Session state and turn-admission guards
//!
//! All mutable conversation state lives in one [`SessionController`]:
//! the listening/speaking state, the interrupt and in-flight flags, and
//! the timestamps that back the debounce / duplicate / echo guards.
//! Other components mutate it only through the methods here and read it
//! through accessors; nothing shares raw flags.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::clock::Clock;

/// Derived conversation state; never simultaneously listening and speaking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No conversation activity
    Idle,
    /// Microphone has the floor
    Listening,
    /// Agent audio has the floor
    Speaking,
}

/// Named timeout policies for every debounce / cooldown window
///
/// Durations are contracts, not tuning knobs: tests assert the exact
/// boundary values.
#[derive(Debug, Clone)]
pub struct TimingPolicy {
    /// Minimum gap between two accepted submissions
    pub submit_lockout_ms: u64,
    /// Window in which a near-duplicate of the previous turn is rejected
    pub duplicate_window_ms: u64,
    /// Window after playback completion in which submissions are
    /// rejected as post-agent echo
    pub echo_guard_ms: u64,
    /// Window after a submission in which interim transcripts are
    /// discarded as stale recognizer output
    pub absorption_window_ms: u64,
    /// Grace period before the interrupt flag is lowered, absorbing
    /// residual asynchronous playback events
    pub interrupt_grace_ms: u64,
    /// Delay before the signal channel attempts reconnection
    pub reconnect_delay_ms: u64,
    /// Minimum trimmed transcript length for a commit to produce a turn
    pub min_commit_chars: usize,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            submit_lockout_ms: 1201,
            duplicate_window_ms: 4001,
            echo_guard_ms: 1200,
            absorption_window_ms: 2000,
            interrupt_grace_ms: 200,
            reconnect_delay_ms: 2000,
            min_commit_chars: 3,
        }
    }
}

/// Why a submission was not admitted
///
/// Guard rejections are silent policy decisions, not errors; they are
/// logged at debug level and have no user-visible effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A submission is already in flight
    InFlight,
    /// Less than the lockout window has elapsed since the previous
    /// submission
    Lockout,
    /// Near-duplicate of the previous submitted text within the
    /// duplicate window
    NearDuplicate,
    /// Within the post-agent echo window after playback completion
    EchoGuard,
}

/// One committed user utterance, submitted as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Raw transcript text at commit time
    pub text: String,
    /// Submission timestamp, clock milliseconds
    pub submitted_at: u64,
}

/// Owns all session-wide conversation state
pub struct SessionController {
    clock: Arc<dyn Clock>,
    policy: TimingPolicy,
    state: Mutex<SessionState>,
    active: AtomicBool,
    interrupted: AtomicBool,
    submitting: AtomicBool,
    last_submission_ms: AtomicU64,
    last_playback_end_ms: AtomicU64,
    last_submitted_text: Mutex<String>,
    language: Mutex<String>,
}

impl SessionController {
    /// Create a controller with the given clock and timing policy
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, policy: TimingPolicy, language: &str) -> Self {
        Self {
            clock,
            policy,
            state: Mutex::new(SessionState::Idle),
            active: AtomicBool::new(true),
            interrupted: AtomicBool::new(false),
            submitting: AtomicBool::new(false),
            last_submission_ms: AtomicU64::new(0),
            last_playback_end_ms: AtomicU64::new(0),
            last_submitted_text: Mutex::new(String::new()),
            language: Mutex::new(language.to_string()),
        }
    }

    /// Current clock time in milliseconds
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// The timing policy in effect
    #[must_use]
    pub const fn policy(&self) -> &TimingPolicy {
        &self.policy
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Transition the session state
    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock().unwrap();
        if *current != state {
            tracing::debug!(from = ?*current, to = ?state, "session state");
            *current = state;
        }
    }

    /// Whether the session is still active (controls reconnect attempts)
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Deactivate the session; the signal channel stops reconnecting
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Whether the global interrupt flag is raised
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_interrupted(&self, value: bool) {
        self.interrupted.store(value, Ordering::SeqCst);
    }

    /// Whether a submission is currently in flight
    #[must_use]
    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::SeqCst)
    }

    /// Timestamp of the most recent accepted submission, 0 if none
    #[must_use]
    pub fn last_submission_ms(&self) -> u64 {
        self.last_submission_ms.load(Ordering::SeqCst)
    }

    /// Current response language
    #[must_use]
    pub fn language(&self) -> String {
        self.language.lock().unwrap().clone()
    }

    /// Update the response language
    pub fn set_language(&self, lang: &str) {
        *self.language.lock().unwrap() = lang.to_string();
    }

    /// Whether an interim transcript arriving now falls inside the
    /// absorption window after the last submission
    #[must_use]
    pub fn in_absorption_window(&self) -> bool {
        let last = self.last_submission_ms.load(Ordering::SeqCst);
        last != 0 && self.clock.now_ms().saturating_sub(last) < self.policy.absorption_window_ms
    }

    /// Run the admission guards for a new turn and, on acceptance, mark
    /// the submission in flight and record its timestamp and normalized
    /// text
    ///
    /// Guards are evaluated in order: in-flight, hard lockout,
    /// near-duplicate, post-agent echo.
    ///
    /// # Errors
    ///
    /// Returns the guard that rejected the turn. Rejections are policy
    /// decisions, not failures.
    pub fn try_begin_submission(&self, normalized: &str) -> Result<u64, Rejection> {
        if self.submitting.load(Ordering::SeqCst) {
            return Err(Rejection::InFlight);
        }

        let now = self.clock.now_ms();
        let last = self.last_submission_ms.load(Ordering::SeqCst);

        if last != 0 && now.saturating_sub(last) < self.policy.submit_lockout_ms {
            return Err(Rejection::Lockout);
        }

        {
            let previous = self.last_submitted_text.lock().unwrap();
            if !previous.is_empty()
                && now.saturating_sub(last) < self.policy.duplicate_window_ms
                && is_near_duplicate(normalized, &previous)
            {
                return Err(Rejection::NearDuplicate);
            }
        }

        let playback_end = self.last_playback_end_ms.load(Ordering::SeqCst);
        if playback_end != 0 && now.saturating_sub(playback_end) < self.policy.echo_guard_ms {
            return Err(Rejection::EchoGuard);
        }

        self.submitting.store(true, Ordering::SeqCst);
        self.last_submission_ms.store(now, Ordering::SeqCst);
        *self.last_submitted_text.lock().unwrap() = normalized.to_string();

        Ok(now)
    }

    /// Clear the in-flight flag after a submission completes
    pub fn end_submission(&self) {
        self.submitting.store(false, Ordering::SeqCst);
    }

    /// Record the playback-completion timestamp that backs the echo guard
    pub fn mark_playback_complete(&self) {
        self.last_playback_end_ms
            .store(self.clock.now_ms(), Ordering::SeqCst);
    }
}

/// Near-duplicate test: one text contains the other, or the new text is
/// longer than 5 characters and the lengths differ by fewer than 5
fn is_near_duplicate(new_text: &str, previous: &str) -> bool {
    let contained = new_text.contains(previous) || previous.contains(new_text);
    let new_len = new_text.chars().count();
    let prev_len = previous.chars().count();
    let near_length = new_len > 5 && new_len.abs_diff(prev_len) < 5;
    contained || near_length
}
