// crates/cstp-core/src/breaker.rs
// ============================================================================
// Module: Circuit Breaker Manager
// Description: Sliding-window failure gates with open/half-open/closed states.
// Purpose: Block repeated-failure actions and probe for recovery after cooldown.
// Dependencies: crate::interfaces, serde, serde_json, serde_yaml, thiserror, time
// ============================================================================

//! ## Overview
//! One breaker exists per scope string. Failures recorded inside the sliding
//! window trip the breaker at exactly the configured threshold; an elapsed
//! cooldown moves it to half-open lazily on the next check, where a single
//! probe is admitted. All arithmetic uses monotonic milliseconds from an
//! injectable clock; persisted snapshots carry wall-clock timestamps for
//! observability. Every state-changing call appends one journal line; manual
//! reset and stale eviction rewrite the journal in full.
//!
//! Invariants:
//! - CLOSED implies `opened_at` is unset.
//! - OPEN and HALF_OPEN imply `opened_at` is set.
//! - `probe_in_flight` implies HALF_OPEN.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::enums::Outcome;
use crate::core::time::format_rfc3339;
use crate::interfaces::AuditEvent;
use crate::interfaces::AuditSink;
use crate::interfaces::BreakerJournal;
use crate::interfaces::BreakerJournalRecord;
use crate::interfaces::JournalError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimum interval between notifications per scope, milliseconds.
const NOTIFICATION_DEBOUNCE_MS: u64 = 60_000;
/// Inactivity horizon after which dynamic CLOSED breakers are evicted, ms.
const STALE_EVICTION_MS: u64 = 86_400_000;
/// Default failure threshold for dynamic breakers.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Default sliding window, milliseconds (1 hour).
const DEFAULT_WINDOW_MS: u64 = 3_600_000;
/// Default cooldown, milliseconds (30 minutes).
const DEFAULT_COOLDOWN_MS: u64 = 1_800_000;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Clock abstraction pairing monotonic and wall time.
///
/// Breaker arithmetic runs entirely on `monotonic_ms`; wall time appears
/// only in persisted snapshots and notifications.
pub trait BreakerClock: Send + Sync {
    /// Monotonic milliseconds since an arbitrary process-local epoch.
    fn monotonic_ms(&self) -> u64;
    /// Current wall-clock time.
    fn wall(&self) -> OffsetDateTime;
}

/// System clock backed by [`Instant`] and UTC wall time.
#[derive(Debug)]
pub struct SystemBreakerClock {
    /// Process-local monotonic epoch.
    epoch: Instant,
}

impl SystemBreakerClock {
    /// Creates a clock with its epoch at construction time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemBreakerClock {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerClock for SystemBreakerClock {
    fn monotonic_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn wall(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

// ============================================================================
// SECTION: State and Configuration
// ============================================================================

/// Circuit breaker state.
///
/// # Invariants
/// - Transitions follow the documented state machine only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Failures below threshold; actions pass.
    Closed,
    /// Threshold exceeded; actions blocked until cooldown.
    Open,
    /// Cooldown elapsed; one probe admitted.
    HalfOpen,
}

impl BreakerState {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Parses a wire label into a state.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "closed" => Some(Self::Closed),
            "open" => Some(Self::Open),
            "half_open" => Some(Self::HalfOpen),
            _ => None,
        }
    }
}

/// Configuration for a single breaker scope.
///
/// # Invariants
/// - `failure_threshold` >= 1; zero-threshold configs are rejected at load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Scope string (see [`matches_scope`]).
    pub scope: String,
    /// Failures within the window that trip the breaker.
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,
    /// Sliding window length, milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Cooldown before a probe is admitted, milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    /// Whether state changes emit notifications.
    #[serde(default = "default_notify")]
    pub notify: bool,
}

/// Serde default for the failure threshold.
const fn default_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

/// Serde default for the window length.
const fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

/// Serde default for the cooldown length.
const fn default_cooldown_ms() -> u64 {
    DEFAULT_COOLDOWN_MS
}

/// Serde default for the notify flag.
const fn default_notify() -> bool {
    true
}

impl BreakerConfig {
    /// Dynamic-breaker defaults for an unconfigured scope.
    #[must_use]
    pub fn dynamic(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            window_ms: DEFAULT_WINDOW_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            notify: true,
        }
    }
}

/// Parses breaker configurations from a YAML document.
///
/// The document is either a bare list or a mapping with a
/// `circuit_breakers` list.
///
/// # Errors
///
/// Returns [`BreakerError::Config`] when the YAML is malformed.
pub fn parse_breaker_configs(content: &str) -> Result<Vec<BreakerConfig>, BreakerError> {
    /// Wrapper for the `circuit_breakers:` mapping form.
    #[derive(Deserialize)]
    struct Wrapper {
        /// Configured breaker list.
        circuit_breakers: Vec<BreakerConfig>,
    }

    if let Ok(wrapper) = serde_yaml::from_str::<Wrapper>(content) {
        return Ok(wrapper.circuit_breakers);
    }
    serde_yaml::from_str::<Vec<BreakerConfig>>(content)
        .map_err(|e| BreakerError::Config(e.to_string()))
}

// ============================================================================
// SECTION: Scope Matching
// ============================================================================

/// Decision context matched against breaker scopes.
///
/// # Invariants
/// - Fields mirror the scope dimensions; absent fields never match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakerContext {
    /// Decision category label.
    pub category: Option<String>,
    /// Stakes label.
    pub stakes: Option<String>,
    /// Agent that recorded the decision.
    pub agent_id: Option<String>,
    /// Decision tags.
    pub tags: Vec<String>,
}

/// Matches a scope string against a context.
///
/// Scope forms: `global`, `category:X`, `stakes:X`, `agent:X`, `tag:X`.
#[must_use]
pub fn matches_scope(scope: &str, context: &BreakerContext) -> bool {
    if scope == "global" {
        return true;
    }
    let Some((dimension, value)) = scope.split_once(':') else {
        return false;
    };
    match dimension {
        "category" => context.category.as_deref() == Some(value),
        "stakes" => context.stakes.as_deref() == Some(value),
        "agent" => context.agent_id.as_deref() == Some(value),
        "tag" => context.tags.iter().any(|t| t == value),
        _ => false,
    }
}

// ============================================================================
// SECTION: Errors and Results
// ============================================================================

/// Circuit breaker errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum BreakerError {
    /// Configuration failed to parse.
    #[error("circuit breaker config error: {0}")]
    Config(String),
    /// No breaker exists for the scope.
    #[error("no circuit breaker found for scope: {0}")]
    UnknownScope(String),
    /// Reset requested on a breaker that is not OPEN.
    #[error("can only reset OPEN breakers, current state: {0}")]
    NotOpen(&'static str),
    /// Manager mutex poisoned.
    #[error("circuit breaker state poisoned")]
    Poisoned,
    /// Journal failure.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Result of checking one breaker against a context.
///
/// # Invariants
/// - `blocked` is true for OPEN and probe-occupied HALF_OPEN breakers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerCheckResult {
    /// Breaker scope.
    pub scope: String,
    /// State at check time.
    pub state: BreakerState,
    /// Whether this breaker blocks the action.
    pub blocked: bool,
    /// Human-readable explanation.
    pub message: String,
    /// Failures currently inside the window.
    pub failure_count: usize,
    /// Configured failure threshold.
    pub failure_threshold: u32,
    /// Remaining cooldown when OPEN, milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_ms: Option<u64>,
}

/// Snapshot of one breaker's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStateInfo {
    /// Breaker scope.
    pub scope: String,
    /// Current state.
    pub state: BreakerState,
    /// Failures currently inside the window.
    pub failure_count: usize,
    /// Configured failure threshold.
    pub failure_threshold: u32,
    /// Sliding window length, milliseconds.
    pub window_ms: u64,
    /// Cooldown length, milliseconds.
    pub cooldown_ms: u64,
    /// Remaining cooldown when OPEN, milliseconds.
    pub cooldown_remaining_ms: Option<u64>,
    /// Wall-clock moment the breaker opened, RFC 3339.
    pub opened_at: Option<String>,
    /// Whether a probe is in flight.
    pub probe_in_flight: bool,
    /// Whether the breaker came from configuration.
    pub from_config: bool,
}

/// Result of a manual reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetInfo {
    /// Breaker scope.
    pub scope: String,
    /// State before the reset.
    pub previous_state: BreakerState,
    /// State after the reset.
    pub new_state: BreakerState,
}

// ============================================================================
// SECTION: Breaker Runtime State
// ============================================================================

/// Runtime state of a single breaker.
#[derive(Debug, Clone)]
struct CircuitBreaker {
    /// Scope configuration.
    config: BreakerConfig,
    /// Current state.
    state: BreakerState,
    /// Failure moments inside (or near) the window, monotonic ms.
    failures: VecDeque<u64>,
    /// Moment the breaker opened, monotonic ms.
    opened_at: Option<u64>,
    /// Whether a half-open probe is in flight.
    probe_in_flight: bool,
    /// Last notification moment, monotonic ms.
    last_notification: Option<u64>,
    /// Last activity moment, monotonic ms.
    last_activity: u64,
    /// Whether the breaker came from configuration.
    from_config: bool,
}

impl CircuitBreaker {
    /// Creates a closed breaker for a config.
    fn new(config: BreakerConfig, from_config: bool, now: u64) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            probe_in_flight: false,
            last_notification: None,
            last_activity: now,
            from_config,
        }
    }

    /// Drops failure timestamps older than the window.
    fn evict_stale_window(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.config.window_ms);
        while let Some(first) = self.failures.front() {
            if *first < cutoff {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Lazily transitions OPEN to HALF_OPEN once cooldown has elapsed.
    fn check_lazy_cooldown(&mut self, now: u64) {
        if self.state == BreakerState::Open {
            if let Some(opened_at) = self.opened_at {
                if now.saturating_sub(opened_at) >= self.config.cooldown_ms {
                    self.state = BreakerState::HalfOpen;
                    self.probe_in_flight = false;
                    self.last_activity = now;
                }
            }
        }
    }

    /// Remaining cooldown milliseconds when OPEN.
    fn cooldown_remaining(&self, now: u64) -> Option<u64> {
        if self.state != BreakerState::Open {
            return None;
        }
        let opened_at = self.opened_at?;
        Some(
            self.config
                .cooldown_ms
                .saturating_sub(now.saturating_sub(opened_at)),
        )
    }
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Manages all circuit breakers with linearizable per-scope transitions.
///
/// # Invariants
/// - `check` and `record_outcome` hold the mutex for the entire transition.
/// - Journal appends happen inside the transition; no suspension points are
///   reached while the mutex is held.
pub struct BreakerManager {
    /// Configured scopes.
    configs: BTreeMap<String, BreakerConfig>,
    /// Live breakers keyed by scope.
    breakers: Mutex<BTreeMap<String, CircuitBreaker>>,
    /// State-change journal.
    journal: Arc<dyn BreakerJournal>,
    /// Audit sink for notifications.
    audit: Arc<dyn AuditSink>,
    /// Monotonic + wall clock.
    clock: Arc<dyn BreakerClock>,
}

impl std::fmt::Debug for BreakerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerManager")
            .field("configs", &self.configs.len())
            .finish_non_exhaustive()
    }
}

impl BreakerManager {
    /// Creates a manager from configs, replaying the journal.
    ///
    /// Replay keeps the last record per scope; configured scopes missing
    /// from the journal start closed.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Journal`] when the journal is unreadable.
    pub fn initialize(
        configs: Vec<BreakerConfig>,
        journal: Arc<dyn BreakerJournal>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn BreakerClock>,
    ) -> Result<Self, BreakerError> {
        let config_map: BTreeMap<String, BreakerConfig> =
            configs.into_iter().map(|c| (c.scope.clone(), c)).collect();

        let now_mono = clock.monotonic_ms();
        let now_wall_ms = wall_unix_ms(clock.wall());

        let mut breakers: BTreeMap<String, CircuitBreaker> = BTreeMap::new();
        for record in journal.replay()? {
            let config = config_map
                .get(&record.scope)
                .cloned()
                .unwrap_or_else(|| BreakerConfig::dynamic(record.scope.clone()));
            let from_config = config_map.contains_key(&record.scope);
            breakers.insert(
                record.scope.clone(),
                restore_breaker(&record, config, from_config, now_mono, now_wall_ms),
            );
        }
        for (scope, config) in &config_map {
            breakers
                .entry(scope.clone())
                .or_insert_with(|| CircuitBreaker::new(config.clone(), true, now_mono));
        }

        Ok(Self {
            configs: config_map,
            breakers: Mutex::new(breakers),
            journal,
            audit,
            clock,
        })
    }

    /// Checks all matching breakers against a context.
    ///
    /// Most restrictive wins: the action is blocked when any result has
    /// `blocked == true`.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Poisoned`] when the state mutex is poisoned.
    pub fn check(&self, context: &BreakerContext) -> Result<Vec<BreakerCheckResult>, BreakerError> {
        let now = self.clock.monotonic_ms();
        let mut results = Vec::new();
        let mut guard = self.breakers.lock().map_err(|_| BreakerError::Poisoned)?;

        for (scope, breaker) in guard.iter_mut() {
            if !matches_scope(scope, context) {
                continue;
            }
            breaker.evict_stale_window(now);
            breaker.check_lazy_cooldown(now);

            let result = match breaker.state {
                BreakerState::Closed => BreakerCheckResult {
                    scope: scope.clone(),
                    state: BreakerState::Closed,
                    blocked: false,
                    message: String::new(),
                    failure_count: breaker.failures.len(),
                    failure_threshold: breaker.config.failure_threshold,
                    cooldown_remaining_ms: None,
                },
                BreakerState::Open => BreakerCheckResult {
                    scope: scope.clone(),
                    state: BreakerState::Open,
                    blocked: true,
                    message: format!(
                        "Circuit breaker OPEN for {scope}: {}/{} failures in window",
                        breaker.failures.len(),
                        breaker.config.failure_threshold
                    ),
                    failure_count: breaker.failures.len(),
                    failure_threshold: breaker.config.failure_threshold,
                    cooldown_remaining_ms: breaker.cooldown_remaining(now),
                },
                BreakerState::HalfOpen => {
                    if breaker.probe_in_flight {
                        BreakerCheckResult {
                            scope: scope.clone(),
                            state: BreakerState::HalfOpen,
                            blocked: true,
                            message: format!(
                                "Circuit breaker HALF_OPEN for {scope}: probe in flight, additional requests blocked"
                            ),
                            failure_count: breaker.failures.len(),
                            failure_threshold: breaker.config.failure_threshold,
                            cooldown_remaining_ms: None,
                        }
                    } else {
                        breaker.probe_in_flight = true;
                        breaker.last_activity = now;
                        self.persist(scope, breaker);
                        BreakerCheckResult {
                            scope: scope.clone(),
                            state: BreakerState::HalfOpen,
                            blocked: false,
                            message: format!(
                                "Circuit breaker HALF_OPEN for {scope}: probe allowed"
                            ),
                            failure_count: breaker.failures.len(),
                            failure_threshold: breaker.config.failure_threshold,
                            cooldown_remaining_ms: None,
                        }
                    }
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Records a decision outcome against all matching breakers.
    ///
    /// Failure and abandoned outcomes count as failures; success and
    /// partial clear the window in CLOSED and close a HALF_OPEN probe.
    /// Matching breakers are auto-created when absent.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Poisoned`] when the state mutex is poisoned.
    pub fn record_outcome(
        &self,
        context: &BreakerContext,
        outcome: Outcome,
    ) -> Result<(), BreakerError> {
        let now = self.clock.monotonic_ms();
        let is_failure = outcome.is_breaker_failure();
        let mut guard = self.breakers.lock().map_err(|_| BreakerError::Poisoned)?;

        for scope in self.configs.keys() {
            if !guard.contains_key(scope) {
                if let Some(config) = self.configs.get(scope) {
                    guard.insert(
                        scope.clone(),
                        CircuitBreaker::new(config.clone(), true, now),
                    );
                }
            }
        }

        for (scope, breaker) in guard.iter_mut() {
            if !matches_scope(scope, context) {
                continue;
            }
            breaker.last_activity = now;
            if is_failure {
                self.record_failure(scope, breaker, now);
            } else {
                self.record_success(scope, breaker);
            }
            self.persist(scope, breaker);
        }
        Ok(())
    }

    /// Failure transition (called with the mutex held).
    fn record_failure(&self, scope: &str, breaker: &mut CircuitBreaker, now: u64) {
        match breaker.state {
            BreakerState::Closed => {
                breaker.failures.push_back(now);
                breaker.evict_stale_window(now);
                if breaker.failures.len() >= breaker.config.failure_threshold as usize {
                    breaker.state = BreakerState::Open;
                    breaker.opened_at = Some(now);
                    breaker.probe_in_flight = false;
                    self.notify(scope, breaker, "tripped", now);
                }
            }
            BreakerState::HalfOpen => {
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(now);
                breaker.probe_in_flight = false;
                self.notify(scope, breaker, "probe_failed", now);
            }
            BreakerState::Open => {
                // Already open: record for statistics without extending cooldown.
                breaker.failures.push_back(now);
                breaker.evict_stale_window(now);
            }
        }
    }

    /// Success transition (called with the mutex held).
    fn record_success(&self, scope: &str, breaker: &mut CircuitBreaker) {
        match breaker.state {
            BreakerState::HalfOpen => {
                breaker.state = BreakerState::Closed;
                breaker.failures.clear();
                breaker.opened_at = None;
                breaker.probe_in_flight = false;
                let now = self.clock.monotonic_ms();
                self.notify(scope, breaker, "recovered", now);
            }
            BreakerState::Closed => {
                breaker.failures.clear();
            }
            BreakerState::Open => {}
        }
    }

    /// Snapshot of one breaker, applying lazy transitions first.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::UnknownScope`] when the scope has no breaker
    /// and [`BreakerError::Poisoned`] when the state mutex is poisoned.
    pub fn get_state(&self, scope: &str) -> Result<BreakerStateInfo, BreakerError> {
        let now = self.clock.monotonic_ms();
        let mut guard = self.breakers.lock().map_err(|_| BreakerError::Poisoned)?;
        let breaker = guard
            .get_mut(scope)
            .ok_or_else(|| BreakerError::UnknownScope(scope.to_string()))?;
        breaker.evict_stale_window(now);
        breaker.check_lazy_cooldown(now);
        Ok(self.snapshot(scope, breaker, now))
    }

    /// Snapshots all breakers, sorted by scope.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Poisoned`] when the state mutex is poisoned.
    pub fn list(&self) -> Result<Vec<BreakerStateInfo>, BreakerError> {
        let now = self.clock.monotonic_ms();
        let mut guard = self.breakers.lock().map_err(|_| BreakerError::Poisoned)?;
        let mut out = Vec::with_capacity(guard.len());
        for (scope, breaker) in guard.iter_mut() {
            breaker.evict_stale_window(now);
            breaker.check_lazy_cooldown(now);
            out.push(self.snapshot(scope, breaker, now));
        }
        Ok(out)
    }

    /// Snapshots breakers that are not CLOSED, for session context.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Poisoned`] when the state mutex is poisoned.
    pub fn non_closed_summary(&self) -> Result<Vec<BreakerStateInfo>, BreakerError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|info| info.state != BreakerState::Closed)
            .collect())
    }

    /// Manually resets an OPEN breaker.
    ///
    /// With `probe_first` the breaker moves to HALF_OPEN instead of CLOSED.
    /// The journal is rewritten in full.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::UnknownScope`] for unknown scopes,
    /// [`BreakerError::NotOpen`] when the breaker is not OPEN, and
    /// [`BreakerError::Poisoned`] on mutex poisoning.
    pub fn reset(&self, scope: &str, probe_first: bool) -> Result<ResetInfo, BreakerError> {
        let now = self.clock.monotonic_ms();
        let mut guard = self.breakers.lock().map_err(|_| BreakerError::Poisoned)?;
        let breaker = guard
            .get_mut(scope)
            .ok_or_else(|| BreakerError::UnknownScope(scope.to_string()))?;

        let previous = breaker.state;
        if previous != BreakerState::Open {
            return Err(BreakerError::NotOpen(previous.as_str()));
        }

        if probe_first {
            breaker.state = BreakerState::HalfOpen;
            breaker.probe_in_flight = false;
            breaker.last_activity = now;
        } else {
            breaker.state = BreakerState::Closed;
            breaker.failures.clear();
            breaker.opened_at = None;
            breaker.probe_in_flight = false;
            breaker.last_activity = now;
        }
        let new_state = breaker.state;
        self.notify(scope, breaker, "manual_reset", now);

        let records = self.journal_snapshot(&guard, now);
        drop(guard);
        self.journal.rewrite(&records)?;

        Ok(ResetInfo {
            scope: scope.to_string(),
            previous_state: previous,
            new_state,
        })
    }

    /// Evicts dynamic breakers that are CLOSED, empty, and inactive > 24 h.
    ///
    /// Configured breakers are never evicted. When anything is evicted the
    /// journal is rewritten in full.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Poisoned`] on mutex poisoning and
    /// [`BreakerError::Journal`] when the rewrite fails.
    pub fn evict_stale(&self) -> Result<usize, BreakerError> {
        let now = self.clock.monotonic_ms();
        let mut guard = self.breakers.lock().map_err(|_| BreakerError::Poisoned)?;

        let stale: Vec<String> = guard
            .iter()
            .filter(|(_, b)| {
                !b.from_config
                    && b.state == BreakerState::Closed
                    && b.failures.is_empty()
                    && now.saturating_sub(b.last_activity) > STALE_EVICTION_MS
            })
            .map(|(scope, _)| scope.clone())
            .collect();

        for scope in &stale {
            guard.remove(scope);
        }
        let evicted = stale.len();
        if evicted > 0 {
            let records = self.journal_snapshot(&guard, now);
            drop(guard);
            self.journal.rewrite(&records)?;
        }
        Ok(evicted)
    }

    /// Ensures a dynamic breaker exists for a scope (used by tests/tools).
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Poisoned`] on mutex poisoning.
    pub fn ensure_breaker(&self, scope: &str) -> Result<(), BreakerError> {
        let now = self.clock.monotonic_ms();
        let mut guard = self.breakers.lock().map_err(|_| BreakerError::Poisoned)?;
        if !guard.contains_key(scope) {
            let config = self
                .configs
                .get(scope)
                .cloned()
                .unwrap_or_else(|| BreakerConfig::dynamic(scope));
            let from_config = self.configs.contains_key(scope);
            guard.insert(
                scope.to_string(),
                CircuitBreaker::new(config, from_config, now),
            );
        }
        Ok(())
    }

    /// Builds a snapshot for wire output.
    fn snapshot(&self, scope: &str, breaker: &CircuitBreaker, now: u64) -> BreakerStateInfo {
        let opened_at = breaker.opened_at.map(|mono| {
            let wall = self.mono_to_wall(mono, now);
            format_rfc3339(wall)
        });
        BreakerStateInfo {
            scope: scope.to_string(),
            state: breaker.state,
            failure_count: breaker.failures.len(),
            failure_threshold: breaker.config.failure_threshold,
            window_ms: breaker.config.window_ms,
            cooldown_ms: breaker.config.cooldown_ms,
            cooldown_remaining_ms: breaker.cooldown_remaining(now),
            opened_at,
            probe_in_flight: breaker.probe_in_flight,
            from_config: breaker.from_config,
        }
    }

    /// Emits a debounced notification to the audit sink.
    fn notify(&self, scope: &str, breaker: &mut CircuitBreaker, event: &str, now: u64) {
        if !breaker.config.notify {
            return;
        }
        if let Some(last) = breaker.last_notification {
            if now.saturating_sub(last) < NOTIFICATION_DEBOUNCE_MS {
                return;
            }
        }
        breaker.last_notification = Some(now);
        self.audit.record(AuditEvent {
            timestamp: format_rfc3339(self.clock.wall()),
            event: format!("circuit_breaker_{event}"),
            detail: json!({
                "scope": scope,
                "state": breaker.state.as_str(),
                "failure_count": breaker.failures.len(),
                "threshold": breaker.config.failure_threshold,
            }),
        });
    }

    /// Appends one journal line for a breaker; journal errors degrade to audit.
    fn persist(&self, scope: &str, breaker: &CircuitBreaker) {
        let now = self.clock.monotonic_ms();
        let record = self.to_journal_record(scope, breaker, now);
        if let Err(error) = self.journal.append(&record) {
            self.audit.record(AuditEvent {
                timestamp: format_rfc3339(self.clock.wall()),
                event: "circuit_breaker_journal_degraded".to_string(),
                detail: json!({ "scope": scope, "error": error.to_string() }),
            });
        }
    }

    /// Full journal snapshot of all live breakers.
    fn journal_snapshot(
        &self,
        breakers: &BTreeMap<String, CircuitBreaker>,
        now: u64,
    ) -> Vec<BreakerJournalRecord> {
        breakers
            .iter()
            .map(|(scope, breaker)| self.to_journal_record(scope, breaker, now))
            .collect()
    }

    /// Converts runtime state to a journal record with wall-clock stamps.
    fn to_journal_record(
        &self,
        scope: &str,
        breaker: &CircuitBreaker,
        now: u64,
    ) -> BreakerJournalRecord {
        BreakerJournalRecord {
            scope: scope.to_string(),
            state: breaker.state.as_str().to_string(),
            failures: breaker
                .failures
                .iter()
                .map(|mono| wall_unix_ms(self.mono_to_wall(*mono, now)))
                .collect(),
            opened_at: breaker
                .opened_at
                .map(|mono| wall_unix_ms(self.mono_to_wall(mono, now))),
            probe_in_flight: breaker.probe_in_flight,
            last_notification: breaker
                .last_notification
                .map(|mono| wall_unix_ms(self.mono_to_wall(mono, now))),
            last_activity: wall_unix_ms(self.mono_to_wall(breaker.last_activity, now)),
            timestamp: format_rfc3339(self.clock.wall()),
        }
    }

    /// Converts a monotonic moment to wall time using the current offset.
    fn mono_to_wall(&self, mono: u64, now_mono: u64) -> OffsetDateTime {
        let wall_now = self.clock.wall();
        let behind_ms = now_mono.saturating_sub(mono);
        wall_now - time::Duration::milliseconds(i64::try_from(behind_ms).unwrap_or(i64::MAX))
    }
}

/// Converts wall time to Unix milliseconds.
fn wall_unix_ms(wall: OffsetDateTime) -> i64 {
    let nanos = wall.unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

/// Restores runtime state from a journal record.
fn restore_breaker(
    record: &BreakerJournalRecord,
    config: BreakerConfig,
    from_config: bool,
    now_mono: u64,
    now_wall_ms: i64,
) -> CircuitBreaker {
    /// Converts a persisted wall moment back to monotonic milliseconds.
    fn to_mono(unix_ms: i64, now_mono: u64, now_wall_ms: i64) -> u64 {
        let behind = now_wall_ms.saturating_sub(unix_ms).max(0);
        now_mono.saturating_sub(u64::try_from(behind).unwrap_or(u64::MAX))
    }

    let state = BreakerState::parse(&record.state).unwrap_or(BreakerState::Closed);
    let failures: VecDeque<u64> = record
        .failures
        .iter()
        .map(|ms| to_mono(*ms, now_mono, now_wall_ms))
        .collect();
    let opened_at = match state {
        BreakerState::Closed => None,
        BreakerState::Open | BreakerState::HalfOpen => record
            .opened_at
            .map(|ms| to_mono(ms, now_mono, now_wall_ms))
            .or(Some(now_mono)),
    };
    CircuitBreaker {
        config,
        state,
        failures,
        opened_at,
        probe_in_flight: record.probe_in_flight && state == BreakerState::HalfOpen,
        last_notification: record
            .last_notification
            .map(|ms| to_mono(ms, now_mono, now_wall_ms)),
        last_activity: to_mono(record.last_activity, now_mono, now_wall_ms),
        from_config,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use time::OffsetDateTime;

    use crate::core::enums::Outcome;
    use crate::interfaces::MemoryBreakerJournal;
    use crate::interfaces::NoopAuditSink;

    use super::BreakerClock;
    use super::BreakerConfig;
    use super::BreakerContext;
    use super::BreakerManager;
    use super::BreakerState;
    use super::matches_scope;
    use super::parse_breaker_configs;

    /// Manually advanced clock for deterministic transitions.
    struct ManualClock {
        /// Current monotonic milliseconds.
        now: Mutex<u64>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self { now: Mutex::new(0) })
        }

        fn advance(&self, ms: u64) {
            if let Ok(mut now) = self.now.lock() {
                *now += ms;
            }
        }
    }

    impl BreakerClock for ManualClock {
        fn monotonic_ms(&self) -> u64 {
            self.now.lock().map(|n| *n).unwrap_or(0)
        }

        fn wall(&self) -> OffsetDateTime {
            OffsetDateTime::UNIX_EPOCH + time::Duration::milliseconds(
                i64::try_from(self.monotonic_ms()).unwrap_or(0),
            )
        }
    }

    #[allow(clippy::unwrap_used, reason = "test setup with an empty journal")]
    fn manager(clock: Arc<ManualClock>, threshold: u32) -> BreakerManager {
        let configs = vec![BreakerConfig {
            scope: "global".to_string(),
            failure_threshold: threshold,
            window_ms: 60_000,
            cooldown_ms: 30_000,
            notify: true,
        }];
        BreakerManager::initialize(
            configs,
            Arc::new(MemoryBreakerJournal::new()),
            Arc::new(NoopAuditSink),
            clock,
        )
        .unwrap()
    }

    #[allow(clippy::unwrap_used, reason = "test helper over memory state")]
    fn record_failures(mgr: &BreakerManager, count: usize) {
        let ctx = BreakerContext::default();
        for _ in 0..count {
            mgr.record_outcome(&ctx, Outcome::Failure).unwrap();
        }
    }

    #[test]
    fn scope_matching_covers_all_dimensions() {
        let ctx = BreakerContext {
            category: Some("security".to_string()),
            stakes: Some("high".to_string()),
            agent_id: Some("claude".to_string()),
            tags: vec!["auth".to_string()],
        };
        assert!(matches_scope("global", &ctx));
        assert!(matches_scope("category:security", &ctx));
        assert!(matches_scope("stakes:high", &ctx));
        assert!(matches_scope("agent:claude", &ctx));
        assert!(matches_scope("tag:auth", &ctx));
        assert!(!matches_scope("category:process", &ctx));
        assert!(!matches_scope("region:us", &ctx));
        assert!(!matches_scope("nonsense", &ctx));
    }

    #[test]
    fn exactly_threshold_failures_trip_the_breaker() -> Result<(), super::BreakerError> {
        let clock = ManualClock::new();
        let mgr = manager(Arc::clone(&clock), 3);
        let ctx = BreakerContext::default();

        record_failures(&mgr, 2);
        let results = mgr.check(&ctx)?;
        assert_eq!(results[0].state, BreakerState::Closed);
        assert!(!results[0].blocked);

        record_failures(&mgr, 1);
        let results = mgr.check(&ctx)?;
        assert_eq!(results[0].state, BreakerState::Open);
        assert!(results[0].blocked);
        assert!(results[0].cooldown_remaining_ms.is_some());
        Ok(())
    }

    #[test]
    fn cooldown_admits_a_single_probe() -> Result<(), super::BreakerError> {
        let clock = ManualClock::new();
        let mgr = manager(Arc::clone(&clock), 3);
        let ctx = BreakerContext::default();

        record_failures(&mgr, 3);
        clock.advance(30_001);

        let results = mgr.check(&ctx)?;
        assert_eq!(results[0].state, BreakerState::HalfOpen);
        assert!(!results[0].blocked);

        // Second caller is blocked while the probe is in flight.
        let results = mgr.check(&ctx)?;
        assert_eq!(results[0].state, BreakerState::HalfOpen);
        assert!(results[0].blocked);
        Ok(())
    }

    #[test]
    fn probe_success_closes_and_probe_failure_reopens() -> Result<(), super::BreakerError> {
        let clock = ManualClock::new();
        let mgr = manager(Arc::clone(&clock), 3);
        let ctx = BreakerContext::default();

        record_failures(&mgr, 3);
        clock.advance(30_001);
        let _ = mgr.check(&ctx)?;
        mgr.record_outcome(&ctx, Outcome::Success)?;
        assert_eq!(mgr.get_state("global")?.state, BreakerState::Closed);
        assert_eq!(mgr.get_state("global")?.failure_count, 0);

        record_failures(&mgr, 3);
        clock.advance(30_001);
        let _ = mgr.check(&ctx)?;
        mgr.record_outcome(&ctx, Outcome::Abandoned)?;
        assert_eq!(mgr.get_state("global")?.state, BreakerState::Open);
        Ok(())
    }

    #[test]
    fn window_eviction_forgets_old_failures() -> Result<(), super::BreakerError> {
        let clock = ManualClock::new();
        let mgr = manager(Arc::clone(&clock), 3);
        let ctx = BreakerContext::default();

        record_failures(&mgr, 2);
        clock.advance(60_001);
        record_failures(&mgr, 1);
        let results = mgr.check(&ctx)?;
        assert_eq!(results[0].state, BreakerState::Closed);
        assert_eq!(results[0].failure_count, 1);
        Ok(())
    }

    #[test]
    fn manual_reset_requires_open_state() -> Result<(), super::BreakerError> {
        let clock = ManualClock::new();
        let mgr = manager(Arc::clone(&clock), 3);

        assert!(matches!(
            mgr.reset("global", false),
            Err(super::BreakerError::NotOpen(_))
        ));
        assert!(matches!(
            mgr.reset("missing", false),
            Err(super::BreakerError::UnknownScope(_))
        ));

        record_failures(&mgr, 3);
        let info = mgr.reset("global", false)?;
        assert_eq!(info.previous_state, BreakerState::Open);
        assert_eq!(info.new_state, BreakerState::Closed);

        record_failures(&mgr, 3);
        let info = mgr.reset("global", true)?;
        assert_eq!(info.new_state, BreakerState::HalfOpen);
        Ok(())
    }

    #[test]
    fn success_in_closed_state_clears_the_window() -> Result<(), super::BreakerError> {
        let clock = ManualClock::new();
        let mgr = manager(Arc::clone(&clock), 3);
        let ctx = BreakerContext::default();

        record_failures(&mgr, 2);
        mgr.record_outcome(&ctx, Outcome::Partial)?;
        assert_eq!(mgr.get_state("global")?.failure_count, 0);
        Ok(())
    }

    #[test]
    fn configs_parse_from_both_yaml_shapes() -> Result<(), super::BreakerError> {
        let wrapped = "
circuit_breakers:
  - scope: global
    failure_threshold: 3
    window_ms: 60000
    cooldown_ms: 30000
";
        let configs = parse_breaker_configs(wrapped)?;
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].failure_threshold, 3);
        assert!(configs[0].notify);

        let bare = "
- scope: 'category:security'
  failure_threshold: 2
";
        let configs = parse_breaker_configs(bare)?;
        assert_eq!(configs[0].scope, "category:security");
        assert_eq!(configs[0].window_ms, 3_600_000);
        Ok(())
    }
}
