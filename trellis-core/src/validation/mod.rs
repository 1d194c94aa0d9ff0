//! Validation
//!
//! Every primitive owns a [`Validator`]: a wrapper that runs one named
//! strategy on a background thread and reports the result through its
//! `finished` communicator.
//!
//! # Outcomes
//!
//! | status | meaning |
//! |---|---|
//! | `Pass` | the strategy accepted the value |
//! | `Fail` | the strategy rejected it ([`ValidationError::Invalid`]) |
//! | `Error` | the strategy crashed ([`ValidationError::Internal`] or a panic) |
//!
//! `Fail` is a user-correctable input problem; `Error` is a tooling problem.
//! Presentation layers show both as failures but tests and logs keep them apart.
//!
//! # Serialization
//!
//! A validator runs at most one validation at a time. Calling
//! [`Validator::validate`] while a run is in flight blocks the caller until
//! that run (including its `finished` callbacks) is done, then starts the new
//! run immediately. Results are tagged with the caller's ticket so the owner
//! can discard results for values it no longer holds.

mod strategies;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::reactive::{panic_message, Communicator};

pub use strategies::{StrategyRegistry, ValidationStrategy};
pub(crate) use strategies::check_pattern;

/// Free-form strategy parameters (everything in `validateAs` except `type`).
pub type ValidationParams = Map<String, Value>;

/// The fixed set of strategy names a configuration may ask for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorKind {
    #[default]
    Disabled,
    String,
    Number,
    File,
    Folder,
    Csv,
    Vector,
    Raster,
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidatorKind::Disabled => "disabled",
            ValidatorKind::String => "string",
            ValidatorKind::Number => "number",
            ValidatorKind::File => "file",
            ValidatorKind::Folder => "folder",
            ValidatorKind::Csv => "csv",
            ValidatorKind::Vector => "vector",
            ValidatorKind::Raster => "raster",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Pass,
    Fail,
    Error,
}

/// Payload of [`Validator::finished`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    /// User-facing message for `Fail`, diagnostic text for `Error`.
    pub error: Option<String>,
    /// Ticket supplied by the caller of `validate`.
    pub ticket: u64,
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        self.status == ValidationStatus::Pass
    }

    fn from_result(result: Result<(), ValidationError>, ticket: u64) -> Self {
        match result {
            Ok(()) => Self {
                status: ValidationStatus::Pass,
                error: None,
                ticket,
            },
            Err(ValidationError::Invalid(message)) => Self {
                status: ValidationStatus::Fail,
                error: Some(message),
                ticket,
            },
            Err(ValidationError::Internal(message)) => Self {
                status: ValidationStatus::Error,
                error: Some(message),
                ticket,
            },
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    /// Runs admitted and not yet released. Only exceeds one when a worker
    /// starts a nested run from its own `finished` callback.
    running: usize,
    worker: Option<ThreadId>,
}

/// Admits one validation at a time.
#[derive(Debug, Default)]
struct Gate {
    state: Mutex<GateState>,
    idle: Condvar,
}

impl Gate {
    /// Wait for the gate to be free and take it. A worker re-entering its own
    /// gate from a `finished` callback is let through rather than deadlocked.
    fn acquire(&self) {
        let mut state = self.state.lock();
        let current = thread::current().id();
        while state.running > 0 && state.worker != Some(current) {
            self.idle.wait(&mut state);
        }
        state.running += 1;
    }

    fn set_worker(&self, worker: ThreadId) {
        self.state.lock().worker = Some(worker);
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
        if state.running == 0 {
            state.worker = None;
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut state = self.state.lock();
        let current = thread::current().id();
        while state.running > 0 && state.worker != Some(current) {
            self.idle.wait(&mut state);
        }
    }

    fn is_busy(&self) -> bool {
        self.state.lock().running > 0
    }
}

/// Background runner for a single validation strategy.
#[derive(Clone)]
pub struct Validator {
    kind: ValidatorKind,
    strategy: Arc<dyn ValidationStrategy>,
    gate: Arc<Gate>,

    /// Emitted from the validation thread when a run completes.
    pub finished: Communicator<ValidationOutcome>,
}

impl Validator {
    /// Create a validator using the builtin strategy for `kind`.
    pub fn new(kind: ValidatorKind) -> Self {
        Self::with_registry(kind, &StrategyRegistry::builtin())
    }

    pub fn with_registry(kind: ValidatorKind, registry: &StrategyRegistry) -> Self {
        Self::with_strategy(kind, registry.get(kind))
    }

    pub fn with_strategy(kind: ValidatorKind, strategy: Arc<dyn ValidationStrategy>) -> Self {
        Self {
            kind,
            strategy,
            gate: Arc::new(Gate::default()),
            finished: Communicator::new(),
        }
    }

    pub fn kind(&self) -> ValidatorKind {
        self.kind
    }

    /// Start validating `value` on a background thread.
    ///
    /// Blocks while a previous run is still in flight. Empty values (null or
    /// blank strings) pass without consulting the strategy.
    pub fn validate(&self, value: Value, params: ValidationParams, ticket: u64) {
        self.gate.acquire();

        let strategy = Arc::clone(&self.strategy);
        let gate = Arc::clone(&self.gate);
        let finished = self.finished.clone();
        let kind = self.kind;

        let spawned = thread::Builder::new()
            .name(format!("validate-{kind}"))
            .spawn(move || {
                gate.set_worker(thread::current().id());
                let outcome = run_strategy(kind, strategy.as_ref(), &value, &params, ticket);
                finished.emit(&outcome);
                gate.release();
            });

        if let Err(err) = spawned {
            tracing::error!(validator = %kind, error = %err, "could not spawn validation thread");
            let outcome = ValidationOutcome {
                status: ValidationStatus::Error,
                error: Some(format!("could not spawn validation thread: {err}")),
                ticket,
            };
            self.finished.emit(&outcome);
            self.gate.release();
        }
    }

    /// Block until no validation is in flight.
    pub fn join(&self) {
        self.gate.wait_idle();
    }

    pub fn in_progress(&self) -> bool {
        self.gate.is_busy()
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("kind", &self.kind)
            .field("in_progress", &self.in_progress())
            .finish()
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn run_strategy(
    kind: ValidatorKind,
    strategy: &dyn ValidationStrategy,
    value: &Value,
    params: &ValidationParams,
    ticket: u64,
) -> ValidationOutcome {
    if is_blank(value) {
        return ValidationOutcome::from_result(Ok(()), ticket);
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| strategy.validate(value, params)))
        .unwrap_or_else(|payload| Err(ValidationError::Internal(panic_message(payload.as_ref()))));

    let outcome = ValidationOutcome::from_result(result, ticket);
    match outcome.status {
        ValidationStatus::Pass => tracing::trace!(validator = %kind, "validation passed"),
        ValidationStatus::Fail => {
            tracing::debug!(validator = %kind, error = ?outcome.error, "validation failed")
        }
        ValidationStatus::Error => {
            tracing::error!(validator = %kind, error = ?outcome.error, "validator crashed")
        }
    }
    outcome
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn collect(validator: &Validator) -> Arc<Mutex<Vec<ValidationOutcome>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        validator.finished.register(move |outcome: &ValidationOutcome| {
            seen_clone.lock().push(outcome.clone());
        });
        seen
    }

    fn params(value: Value) -> ValidationParams {
        match value {
            Value::Object(map) => map,
            _ => ValidationParams::new(),
        }
    }

    #[test]
    fn pass_fail_and_error_are_distinguished() {
        struct Picky;
        impl ValidationStrategy for Picky {
            fn validate(&self, value: &Value, _: &ValidationParams) -> Result<(), ValidationError> {
                match value.as_str() {
                    Some("ok") => Ok(()),
                    Some("bad") => Err(ValidationError::invalid("bad input")),
                    _ => panic!("strategy bug"),
                }
            }
        }

        let validator = Validator::with_strategy(ValidatorKind::String, Arc::new(Picky));
        let seen = collect(&validator);

        validator.validate(json!("ok"), ValidationParams::new(), 1);
        validator.validate(json!("bad"), ValidationParams::new(), 2);
        validator.validate(json!("boom"), ValidationParams::new(), 3);
        validator.join();

        let seen = seen.lock();
        let statuses: Vec<_> = seen.iter().map(|o| (o.ticket, o.status)).collect();
        assert_eq!(
            statuses,
            vec![
                (1, ValidationStatus::Pass),
                (2, ValidationStatus::Fail),
                (3, ValidationStatus::Error),
            ]
        );
        assert_eq!(seen[1].error.as_deref(), Some("bad input"));
        assert_eq!(seen[2].error.as_deref(), Some("strategy bug"));
    }

    #[test]
    fn only_one_validation_in_flight() {
        struct Slow {
            running: AtomicUsize,
            overlap: AtomicUsize,
        }
        impl ValidationStrategy for Slow {
            fn validate(&self, _: &Value, _: &ValidationParams) -> Result<(), ValidationError> {
                if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                    self.overlap.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(20));
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let strategy = Arc::new(Slow {
            running: AtomicUsize::new(0),
            overlap: AtomicUsize::new(0),
        });
        let validator = Validator::with_strategy(ValidatorKind::String, strategy.clone());
        let seen = collect(&validator);

        for ticket in 0..4 {
            validator.validate(json!("x"), ValidationParams::new(), ticket);
        }
        validator.join();

        assert_eq!(strategy.overlap.load(Ordering::SeqCst), 0);
        assert_eq!(seen.lock().len(), 4);
        assert!(!validator.in_progress());
    }

    #[test]
    fn blank_values_skip_the_strategy() {
        let validator = Validator::new(ValidatorKind::Number);
        let seen = collect(&validator);
        validator.validate(json!("  "), ValidationParams::new(), 9);
        validator.join();
        assert_eq!(seen.lock()[0].status, ValidationStatus::Pass);
    }

    #[test]
    fn finished_is_emitted_off_the_calling_thread() {
        let validator = Validator::new(ValidatorKind::Number);
        let thread_name = Arc::new(Mutex::new(None));
        let thread_clone = thread_name.clone();
        validator.finished.register(move |_: &ValidationOutcome| {
            *thread_clone.lock() = thread::current().name().map(str::to_owned);
        });

        validator.validate(json!(4), params(json!({"gteq": 0})), 0);
        validator.join();
        assert_eq!(thread_name.lock().as_deref(), Some("validate-number"));
    }

    #[test]
    fn validating_from_own_callback_does_not_deadlock() {
        let validator = Validator::new(ValidatorKind::Disabled);
        let count = Arc::new(AtomicUsize::new(0));
        let inner = validator.clone();
        let count_clone = count.clone();
        validator.finished.register(move |outcome: &ValidationOutcome| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            if outcome.ticket == 0 {
                inner.validate(json!("again"), ValidationParams::new(), 1);
            }
        });

        validator.validate(json!("first"), ValidationParams::new(), 0);
        validator.join();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
