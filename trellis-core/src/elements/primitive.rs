//! Primitive Elements
//!
//! A Primitive holds a single user-supplied value: text fields, file and
//! folder pickers, checkboxes and dropdowns.
//!
//! # State Machine
//!
//! ```text
//!   set_value(v) ──► value := v, valid := unknown ──► value_changed (caller's thread)
//!                                   │
//!                                   ▼
//!                       validator runs in background
//!                                   │
//!                                   ▼
//!        valid := (status == Pass) ──► validation_completed (validation thread)
//!                                   │
//!                                   ▼
//!                recompute satisfied ──► satisfaction_changed (on change)
//! ```
//!
//! Each write bumps a ticket. A validation result whose ticket is not the
//! current one belongs to a value the element no longer holds and is dropped,
//! so observers only ever see the latest value's result.
//!
//! # Satisfaction
//!
//! | condition | satisfied |
//! |---|---|
//! | not effectively enabled | false |
//! | hideable and hidden | false |
//! | checkbox | checked |
//! | empty and required (or conditionally required) | false |
//! | empty, optional, `returns.ifEmpty == "pass"` | false |
//! | empty, optional | true |
//! | has input | validation passed |

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use super::base::ElementCore;
use super::state::ElementState;
use super::BuildContext;
use crate::config::{PrimitiveConfig, ReturnPolicy, ReturnType, ReturnsConfig, ValidateAs};
use crate::error::{ConfigError, FormError, Result};
use crate::reactive::Communicator;
use crate::validation::{check_pattern, ValidationOutcome, ValidationStatus, Validator, ValidatorKind};

/// The value domain of a primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveKind {
    Text,
    File,
    Folder,
    CheckBox,
    Dropdown { options: Vec<String> },
}

impl PrimitiveKind {
    fn empty_value(&self) -> Value {
        match self {
            PrimitiveKind::Text | PrimitiveKind::File | PrimitiveKind::Folder => {
                Value::String(String::new())
            }
            PrimitiveKind::CheckBox => Value::Bool(false),
            PrimitiveKind::Dropdown { .. } => Value::Null,
        }
    }

    fn has_input(&self, value: &Value) -> bool {
        match self {
            PrimitiveKind::Text | PrimitiveKind::File | PrimitiveKind::Folder => value
                .as_str()
                .map_or(false, |text| !text.trim().is_empty()),
            PrimitiveKind::CheckBox => value.as_bool() == Some(true),
            PrimitiveKind::Dropdown { .. } => !value.is_null(),
        }
    }
}

#[derive(Debug)]
struct PrimitiveState {
    value: Value,
    valid: Option<bool>,
    status: Option<ValidationStatus>,
    validation_error: Option<String>,
    hidden: bool,
    conditionally_required: bool,
    ticket: u64,
    /// Last satisfaction published through `satisfaction_changed`.
    satisfied: bool,
}

/// A value-holding element.
pub struct Primitive {
    core: ElementCore,
    kind: PrimitiveKind,
    required: bool,
    hideable: bool,
    returns: ReturnsConfig,
    validate_as: ValidateAs,
    validator: Validator,
    state: Mutex<PrimitiveState>,

    /// Emitted synchronously on the writer's thread with the stored value.
    pub value_changed: Communicator<Value>,
    /// Emitted on the validation thread.
    pub validation_completed: Communicator<ValidationOutcome>,
    pub satisfaction_changed: Communicator<bool>,
    pub hidden_toggled: Communicator<bool>,
}

impl Primitive {
    /// Build a primitive from a raw configuration object (with a `type`).
    pub fn from_json(raw: Value) -> Result<Arc<Self>> {
        match super::Element::from_json(raw)? {
            super::Element::Primitive(primitive) => Ok(primitive),
            other => Err(ConfigError::Structure(format!(
                "element '{}' is not a primitive",
                other.key()
            ))
            .into()),
        }
    }

    pub(crate) fn build(
        kind: PrimitiveKind,
        config: PrimitiveConfig,
        raw: Value,
        ctx: &BuildContext,
    ) -> std::result::Result<Arc<Self>, ConfigError> {
        if config.validate_as.kind == ValidatorKind::String {
            check_pattern(&config.validate_as.params)?;
        }
        let validator = Validator::with_registry(config.validate_as.kind, &ctx.strategies);
        let core = ElementCore::new(&config.common, raw);

        let primitive = Arc::new_cyclic(|weak: &Weak<Primitive>| {
            let weak = weak.clone();
            validator.finished.register(move |outcome: &ValidationOutcome| {
                if let Some(primitive) = weak.upgrade() {
                    primitive.on_validation_finished(outcome);
                }
            });

            Self {
                core,
                state: Mutex::new(PrimitiveState {
                    value: kind.empty_value(),
                    valid: None,
                    status: None,
                    validation_error: None,
                    hidden: config.hideable,
                    conditionally_required: false,
                    ticket: 0,
                    satisfied: false,
                }),
                kind,
                required: config.required,
                hideable: config.hideable,
                returns: config.returns,
                validate_as: config.validate_as,
                validator,
                value_changed: Communicator::new(),
                validation_completed: Communicator::new(),
                satisfaction_changed: Communicator::new(),
                hidden_toggled: Communicator::new(),
            }
        });

        let initial = match (config.default_value, &primitive.kind) {
            (Some(value), _) => primitive.coerce(value).map_err(|err| {
                ConfigError::Structure(format!(
                    "bad defaultValue for '{}': {err}",
                    primitive.core.key()
                ))
            })?,
            (None, PrimitiveKind::Dropdown { options }) if !options.is_empty() => Value::from(0u64),
            (None, kind) => kind.empty_value(),
        };
        primitive.store_value(initial);
        Ok(primitive)
    }

    pub fn core(&self) -> &ElementCore {
        &self.core
    }

    pub fn kind(&self) -> &PrimitiveKind {
        &self.kind
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    // ------------------------------------------------------------------
    // Value
    // ------------------------------------------------------------------

    /// Write a new value.
    ///
    /// Writes to an element that is not effectively enabled are ignored.
    /// Values the element cannot hold are rejected with
    /// [`FormError::ValueType`] or [`FormError::ValueOutOfRange`].
    pub fn set_value(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if !self.core.is_enabled() {
            tracing::debug!(element = %self.core.key(), "ignoring write to disabled element");
            return Ok(());
        }
        let value = self.coerce(value)?;
        self.store_value(value);
        Ok(())
    }

    /// The value as configured by `returns.type`.
    ///
    /// Dropdowns return the selected option, or its index for `ordinal`.
    pub fn value(&self) -> Value {
        let raw = self.state.lock().value.clone();
        let base = match &self.kind {
            PrimitiveKind::Dropdown { .. } if self.returns.kind == Some(ReturnType::Ordinal) => {
                return raw;
            }
            PrimitiveKind::Dropdown { options } => raw
                .as_u64()
                .and_then(|index| options.get(index as usize))
                .map(|option| Value::String(option.clone()))
                .unwrap_or(Value::Null),
            _ => raw,
        };
        match self.returns.kind {
            Some(ReturnType::Number) => number_of(&base).unwrap_or(base),
            Some(ReturnType::Boolean) => Value::Bool(truthy(&base)),
            _ => base,
        }
    }

    /// The value passed to the computation, after `returns.mapValues`.
    pub fn returned_value(&self) -> Value {
        let value = self.value();
        let Some(map) = &self.returns.map_values else {
            return value;
        };
        let key = match &value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        map.get(&key).cloned().unwrap_or(value)
    }

    /// Whether the value belongs in the argument map.
    pub fn should_return(&self) -> bool {
        if !self.core.is_enabled() && self.returns.if_disabled != Some(ReturnPolicy::Return) {
            return false;
        }
        if self.is_hidden() && self.returns.if_hidden != Some(ReturnPolicy::Return) {
            return false;
        }
        if !self.has_input() && self.returns.if_empty == Some(ReturnPolicy::Pass) {
            return false;
        }
        true
    }

    pub fn has_input(&self) -> bool {
        self.kind.has_input(&self.state.lock().value)
    }

    /// Dropdown options; empty for other kinds.
    pub fn options(&self) -> &[String] {
        match &self.kind {
            PrimitiveKind::Dropdown { options } => options,
            _ => &[],
        }
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Whether the current value passed validation. Waits for an in-flight
    /// validation when the result is not known yet.
    pub fn is_valid(&self) -> bool {
        if self.state.lock().valid.is_none() {
            self.validator.join();
        }
        self.state.lock().valid == Some(true)
    }

    /// Validation result without waiting: `None` while unknown.
    pub fn validity(&self) -> Option<bool> {
        self.state.lock().valid
    }

    pub fn validation_status(&self) -> Option<ValidationStatus> {
        self.state.lock().status
    }

    pub fn validation_error(&self) -> Option<String> {
        self.state.lock().validation_error.clone()
    }

    /// Block until no validation is in flight.
    pub fn join_validation(&self) {
        self.validator.join();
    }

    // ------------------------------------------------------------------
    // Satisfaction and requirement
    // ------------------------------------------------------------------

    /// See the module table. Waits for a pending validation when the answer
    /// depends on it.
    pub fn is_satisfied(&self) -> bool {
        let pending = {
            let state = self.state.lock();
            state.valid.is_none() && self.kind.has_input(&state.value)
        };
        if pending {
            self.validator.join();
        }
        let state = self.state.lock();
        self.satisfied_from(&state)
    }

    /// Last satisfaction published, without waiting.
    pub fn satisfied_now(&self) -> bool {
        self.state.lock().satisfied
    }

    pub fn is_required(&self) -> bool {
        self.required || self.state.lock().conditionally_required
    }

    pub fn is_conditionally_required(&self) -> bool {
        self.state.lock().conditionally_required
    }

    pub fn set_conditionally_required(&self, required: bool) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.conditionally_required != required;
            state.conditionally_required = required;
            changed
        };
        if changed {
            self.refresh_satisfaction();
        }
    }

    // ------------------------------------------------------------------
    // Interactivity
    // ------------------------------------------------------------------

    pub fn set_enabled(&self, enabled: bool) {
        if self.core.apply_enabled(enabled) {
            self.refresh_satisfaction();
        }
    }

    pub fn set_visible(&self, visible: bool) {
        if self.core.apply_visible(visible) {
            self.refresh_satisfaction();
        }
    }

    pub fn is_hideable(&self) -> bool {
        self.hideable
    }

    pub fn is_hidden(&self) -> bool {
        self.hideable && self.state.lock().hidden
    }

    /// Toggle a hideable element. Non-hideable elements cannot be hidden.
    pub fn set_hidden(&self, hidden: bool) -> Result<()> {
        if !self.hideable {
            return Err(FormError::Interaction(format!(
                "element '{}' is not hideable",
                self.core.key()
            )));
        }
        let changed = {
            let mut state = self.state.lock();
            let changed = state.hidden != hidden;
            state.hidden = hidden;
            changed
        };
        if changed {
            self.hidden_toggled.emit(&hidden);
            self.refresh_satisfaction();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    pub fn get_state(&self) -> ElementState {
        let state = self.state.lock();
        ElementState::Primitive {
            value: state.value.clone(),
            hidden: state.hidden,
        }
    }

    /// Restore a saved state. Restoration bypasses the enabled check that
    /// guards [`set_value`](Self::set_value).
    pub fn set_state(&self, saved: &ElementState) -> Result<()> {
        let ElementState::Primitive { value, hidden } = saved else {
            return Err(FormError::State(format!(
                "expected primitive state for '{}'",
                self.core.key()
            )));
        };
        let value = self.coerce(value.clone())?;
        if self.hideable {
            self.set_hidden(*hidden)?;
        }
        let unchanged = self.state.lock().value == value;
        if !unchanged {
            self.store_value(value);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn coerce(&self, value: Value) -> Result<Value> {
        use PrimitiveKind::*;

        match (&self.kind, value) {
            (Text | File | Folder, Value::String(text)) => Ok(Value::String(text)),
            (Text | File | Folder, Value::Number(number)) => Ok(Value::String(number.to_string())),
            (Text | File | Folder, Value::Null) => Ok(Value::String(String::new())),
            (CheckBox, Value::Bool(checked)) => Ok(Value::Bool(checked)),
            (CheckBox, Value::Null) => Ok(Value::Bool(false)),
            (Dropdown { .. }, Value::Null) => Ok(Value::Null),
            (Dropdown { options }, Value::Number(number)) => {
                let Some(index) = number.as_u64() else {
                    return Err(FormError::ValueType {
                        element: self.core.key().to_string(),
                        value: Value::Number(number),
                    });
                };
                if index as usize >= options.len() {
                    return Err(FormError::ValueOutOfRange {
                        index: index as usize,
                        len: options.len(),
                    });
                }
                Ok(Value::from(index))
            }
            (Dropdown { options }, Value::String(text)) => options
                .iter()
                .position(|option| *option == text)
                .map(|index| Value::from(index as u64))
                .ok_or_else(|| FormError::ValueType {
                    element: self.core.key().to_string(),
                    value: Value::String(text),
                }),
            (_, other) => Err(FormError::ValueType {
                element: self.core.key().to_string(),
                value: other,
            }),
        }
    }

    /// Store an already-coerced value and start validating it.
    fn store_value(&self, value: Value) {
        let ticket = {
            let mut state = self.state.lock();
            state.value = value.clone();
            state.valid = None;
            state.status = None;
            state.validation_error = None;
            state.ticket += 1;
            state.ticket
        };

        self.value_changed.emit(&value);
        self.refresh_satisfaction();

        let input = match &self.kind {
            PrimitiveKind::Dropdown { options } => value
                .as_u64()
                .and_then(|index| options.get(index as usize))
                .map(|option| Value::String(option.clone()))
                .unwrap_or(Value::Null),
            _ => value,
        };
        self.validator
            .validate(input, self.validate_as.params.clone(), ticket);
    }

    fn on_validation_finished(&self, outcome: &ValidationOutcome) {
        {
            let mut state = self.state.lock();
            if outcome.ticket != state.ticket {
                tracing::trace!(
                    element = %self.core.key(),
                    ticket = outcome.ticket,
                    current = state.ticket,
                    "dropping stale validation result"
                );
                return;
            }
            state.valid = Some(outcome.passed());
            state.status = Some(outcome.status);
            state.validation_error = outcome.error.clone();
        }
        if outcome.status == ValidationStatus::Error {
            tracing::warn!(
                element = %self.core.key(),
                error = ?outcome.error,
                "validation errored; treating value as invalid"
            );
        }
        self.validation_completed.emit(outcome);
        self.refresh_satisfaction();
    }

    fn satisfied_from(&self, state: &PrimitiveState) -> bool {
        if !self.core.is_enabled() {
            return false;
        }
        if self.hideable && state.hidden {
            return false;
        }
        if self.kind == PrimitiveKind::CheckBox {
            return state.value.as_bool() == Some(true);
        }
        if !self.kind.has_input(&state.value) {
            if self.required || state.conditionally_required {
                return false;
            }
            return self.returns.if_empty != Some(ReturnPolicy::Pass);
        }
        state.valid == Some(true)
    }

    /// Recompute satisfaction and publish it if it changed.
    fn refresh_satisfaction(&self) {
        let changed = {
            let mut state = self.state.lock();
            let satisfied = self.satisfied_from(&state);
            if satisfied == state.satisfied {
                None
            } else {
                state.satisfied = satisfied;
                Some(satisfied)
            }
        };
        if let Some(satisfied) = changed {
            tracing::trace!(element = %self.core.key(), satisfied, "satisfaction changed");
            self.satisfaction_changed.emit(&satisfied);
        }
    }
}

impl std::fmt::Debug for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Primitive")
            .field("key", &self.core.key())
            .field("kind", &self.kind)
            .field("value", &state.value)
            .field("valid", &state.valid)
            .field("satisfied", &state.satisfied)
            .finish()
    }
}

fn number_of(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

/// JSON truthiness: null, false, zero and empty strings/arrays/objects are false.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map_or(false, |n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
