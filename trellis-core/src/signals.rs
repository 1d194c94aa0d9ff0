//! Signal Wiring
//!
//! Elements declare reactive dependencies on each other in configuration:
//!
//! ```json
//! {"type": "checkbox", "id": "advanced",
//!  "signals": ["enables:threshold",
//!              {"signalName": "value_changed", "target": "Element:copy.set_value"}]}
//! ```
//!
//! # How Resolution Works
//!
//! 1. Each [`SignalSpec`] expands into one or more [`SignalDescriptor`]s.
//!    Short forms go through a fixed table; nested lists flatten.
//! 2. The target string parses into a typed [`Target`]: an operation on
//!    another element, or a named callable.
//! 3. Binding connects a handler to the producer's communicator. The form
//!    keeps every element-targeted descriptor and binds it again for each
//!    element that later joins under the target id, including children a
//!    multi generates after earlier ones were removed.
//! 4. Flag-driven operations are applied once at bind time with the
//!    producer's current state, so the consumer starts consistent.
//!
//! Signal names the producer does not publish are dropped with a warning.
//!
//! # Short Forms
//!
//! | short form | signal | operation |
//! |---|---|---|
//! | `enables:<id>` | `satisfaction_changed` | enable while satisfied |
//! | `disables:<id>` | `satisfaction_changed` | disable while satisfied |
//! | `set_required:<id>` | `satisfaction_changed` | require while satisfied |

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::elements::{Element, SignalHandler, SignalName, SignalPayload, WeakElement};
use crate::error::{ConfigError, FormError, Result};

/// A signal entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalSpec {
    /// `"<shortform>:<id>"`.
    Short(String),
    Long {
        #[serde(rename = "signalName", alias = "signal_name")]
        signal_name: String,
        target: String,
    },
    Nested(Vec<SignalSpec>),
}

impl SignalSpec {
    /// Expand into canonical descriptors.
    pub fn descriptors(&self) -> std::result::Result<Vec<SignalDescriptor>, ConfigError> {
        let mut out = Vec::new();
        self.expand_into(&mut out)?;
        Ok(out)
    }

    fn expand_into(&self, out: &mut Vec<SignalDescriptor>) -> std::result::Result<(), ConfigError> {
        match self {
            SignalSpec::Short(text) => out.push(expand_short(text)?),
            SignalSpec::Long {
                signal_name,
                target,
            } => out.push(SignalDescriptor {
                signal: signal_name.clone(),
                target: target.parse()?,
            }),
            SignalSpec::Nested(specs) => {
                for spec in specs {
                    spec.expand_into(out)?;
                }
            }
        }
        Ok(())
    }
}

fn expand_short(text: &str) -> std::result::Result<SignalDescriptor, ConfigError> {
    let malformed = || ConfigError::MalformedSignal(text.to_string());
    let (form, id) = text.split_once(':').ok_or_else(malformed)?;
    let id = id.trim();
    if id.is_empty() {
        return Err(malformed());
    }

    let op = match form.trim() {
        "enables" => TargetOp::Enable,
        "disables" => TargetOp::Disable,
        "set_required" => TargetOp::SetRequired,
        _ => return Err(malformed()),
    };
    Ok(SignalDescriptor {
        signal: SignalName::SatisfactionChanged.as_str().to_string(),
        target: Target::Element {
            id: id.to_string(),
            op,
        },
    })
}

/// Canonical `{signal_name, target}` pair.
///
/// The signal name stays a string until binding: an unknown name is a
/// warning, not a configuration error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalDescriptor {
    pub signal: String,
    pub target: Target,
}

/// What a signal drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `Element:<id>.<method>`
    Element { id: String, op: TargetOp },
    /// `Python:<path>`: a callable from the form's [`CallableRegistry`].
    Callable(String),
}

impl std::str::FromStr for Target {
    type Err = ConfigError;

    fn from_str(text: &str) -> std::result::Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedSignal(text.to_string());
        let (scheme, rest) = text.split_once(':').ok_or_else(malformed)?;
        match scheme {
            "Element" => {
                let (id, method) = rest.rsplit_once('.').ok_or_else(malformed)?;
                if id.is_empty() {
                    return Err(malformed());
                }
                let op = TargetOp::from_method(method).ok_or_else(malformed)?;
                Ok(Target::Element {
                    id: id.to_string(),
                    op,
                })
            }
            "Python" | "Callable" if !rest.is_empty() => Ok(Target::Callable(rest.to_string())),
            _ => Err(malformed()),
        }
    }
}

/// The closed set of operations a signal can perform on an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOp {
    Enable,
    Disable,
    SetRequired,
    Show,
    Hide,
    /// Copy the producer's payload into the target primitive.
    PopulateFromElement,
}

impl TargetOp {
    pub fn from_method(method: &str) -> Option<Self> {
        let op = match method {
            "set_enabled" | "enable" => TargetOp::Enable,
            "set_disabled" | "disable" => TargetOp::Disable,
            "set_required" | "set_conditionally_required" => TargetOp::SetRequired,
            "set_visible" | "show" => TargetOp::Show,
            "set_invisible" | "hide" => TargetOp::Hide,
            "set_value" | "populate" => TargetOp::PopulateFromElement,
            _ => return None,
        };
        Some(op)
    }

    /// Whether the operation consumes a boolean and can be synced at bind time.
    pub fn is_flag_driven(&self) -> bool {
        !matches!(self, TargetOp::PopulateFromElement)
    }

    pub fn apply(&self, target: &Element, payload: &SignalPayload) -> Result<()> {
        match self {
            TargetOp::Enable => target.set_enabled(payload.truthy()),
            TargetOp::Disable => target.set_enabled(!payload.truthy()),
            TargetOp::Show => target.set_visible(payload.truthy()),
            TargetOp::Hide => target.set_visible(!payload.truthy()),
            TargetOp::SetRequired => {
                let primitive = target.as_primitive().ok_or_else(|| {
                    FormError::Interaction(format!("'{}' cannot be required", target.key()))
                })?;
                primitive.set_conditionally_required(payload.truthy());
            }
            TargetOp::PopulateFromElement => {
                let primitive = target.as_primitive().ok_or_else(|| {
                    FormError::Interaction(format!("'{}' holds no value", target.key()))
                })?;
                primitive.set_value(payload.to_value())?;
            }
        }
        Ok(())
    }
}

/// Named callables reachable through `Python:<path>` targets.
#[derive(Default, Clone)]
pub struct CallableRegistry {
    callables: Arc<DashMap<String, SignalHandler>>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, callable: F)
    where
        F: Fn(&SignalPayload) + Send + Sync + 'static,
    {
        self.callables.insert(name.into(), Arc::new(callable));
    }

    pub fn get(&self, name: &str) -> Option<SignalHandler> {
        self.callables.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.callables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callables.is_empty()
    }
}

impl std::fmt::Debug for CallableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.callables.iter().map(|entry| entry.key().clone()).collect();
        f.debug_struct("CallableRegistry").field("names", &names).finish()
    }
}

// ============================================================================
// Binding
// ============================================================================

/// Result of trying to bind one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    Bound,
    /// The target element is not known yet.
    Pending,
    Dropped,
}

/// An element-targeted descriptor kept by the form. Every element that later
/// joins the form under the target id is bound through it.
#[derive(Clone)]
pub(crate) struct SignalWire {
    pub source: WeakElement,
    pub descriptor: SignalDescriptor,
}

/// Bind `descriptor` on `source`. `lookup` resolves configuration ids.
pub(crate) fn bind<L>(
    source: &Element,
    descriptor: &SignalDescriptor,
    lookup: L,
    callables: &CallableRegistry,
) -> Binding
where
    L: Fn(&str) -> Option<Element>,
{
    let signal = match descriptor.signal.parse::<SignalName>() {
        Ok(signal) if source.declares(signal) => signal,
        _ => {
            tracing::warn!(
                element = %source.key(),
                signal = %descriptor.signal,
                "dropping binding for a signal the element does not publish"
            );
            return Binding::Dropped;
        }
    };

    match &descriptor.target {
        Target::Callable(name) => {
            let Some(callable) = callables.get(name) else {
                tracing::warn!(element = %source.key(), callable = %name, "no callable registered; dropping binding");
                return Binding::Dropped;
            };
            source.connect(signal, callable);
            Binding::Bound
        }
        Target::Element { id, op } => {
            let Some(target) = lookup(id) else {
                return Binding::Pending;
            };

            let op = *op;
            let weak = target.downgrade();
            let source_key = source.key().to_string();
            source.connect(
                signal,
                Arc::new(move |payload: &SignalPayload| {
                    let Some(target) = weak.upgrade() else {
                        return;
                    };
                    if target.core().is_detached() {
                        return;
                    }
                    if let Err(err) = op.apply(&target, payload) {
                        tracing::warn!(
                            source = %source_key,
                            target = %target.key(),
                            operation = ?op,
                            error = %err,
                            "signal operation failed"
                        );
                    }
                }),
            );

            if op.is_flag_driven() {
                if let Some(flag) = source.current_flag(signal) {
                    if let Err(err) = op.apply(&target, &SignalPayload::Flag(flag)) {
                        tracing::warn!(target = %target.key(), error = %err, "initial signal sync failed");
                    }
                }
            }

            tracing::debug!(source = %source.key(), %signal, target = %id, operation = ?op, "signal bound");
            Binding::Bound
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn element(raw: serde_json::Value) -> Element {
        Element::from_json(raw).unwrap()
    }

    #[test]
    fn short_forms_expand() {
        let spec: SignalSpec = serde_json::from_value(json!("enables:b")).unwrap();
        assert_eq!(
            spec.descriptors().unwrap(),
            vec![SignalDescriptor {
                signal: "satisfaction_changed".to_string(),
                target: Target::Element {
                    id: "b".to_string(),
                    op: TargetOp::Enable
                },
            }]
        );

        let spec: SignalSpec = serde_json::from_value(json!("set_required:c")).unwrap();
        assert_eq!(
            spec.descriptors().unwrap()[0].target,
            Target::Element {
                id: "c".to_string(),
                op: TargetOp::SetRequired
            }
        );
    }

    #[test]
    fn long_and_nested_forms_flatten() {
        let spec: SignalSpec = serde_json::from_value(json!([
            {"signalName": "value_changed", "target": "Element:out.set_value"},
            ["disables:x", {"signal_name": "toggled", "target": "Python:ui.refresh"}]
        ]))
        .unwrap();
        let descriptors = spec.descriptors().unwrap();
        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[2].target, Target::Callable("ui.refresh".to_string()));
    }

    #[test]
    fn element_target_splits_at_last_dot() {
        let target: Target = "Element:section.inner.set_enabled".parse().unwrap();
        assert_eq!(
            target,
            Target::Element {
                id: "section.inner".to_string(),
                op: TargetOp::Enable
            }
        );
    }

    #[test]
    fn malformed_targets_are_rejected() {
        for text in ["Element:x", "Element:x.explode", "Nowhere:x.set_enabled", "Python:", "plain"] {
            assert!(text.parse::<Target>().is_err(), "{text} should not parse");
        }
        let spec = SignalSpec::Short("amplifies:x".to_string());
        assert!(matches!(spec.descriptors(), Err(ConfigError::MalformedSignal(_))));
    }

    #[test]
    fn bind_syncs_initial_state() {
        let source = element(json!({"type": "text", "required": true}));
        let target = element(json!({"type": "text", "id": "t"}));
        let descriptor = expand_short("enables:t").unwrap();

        let lookup = |id: &str| (id == "t").then(|| target.clone());
        let outcome = bind(&source, &descriptor, lookup, &CallableRegistry::new());
        assert_eq!(outcome, Binding::Bound);
        assert!(!target.is_enabled());

        source.as_primitive().unwrap().set_value("x").unwrap();
        source.as_primitive().unwrap().join_validation();
        assert!(target.is_enabled());
    }

    #[test]
    fn bind_leaves_unknown_targets_pending() {
        let source = element(json!({"type": "text"}));
        let descriptor = expand_short("enables:later").unwrap();
        let outcome = bind(&source, &descriptor, |_: &str| None, &CallableRegistry::new());
        assert_eq!(outcome, Binding::Pending);
    }

    #[test]
    fn bind_drops_undeclared_signals() {
        let source = element(json!({"type": "label"}));
        let target = element(json!({"type": "text", "id": "t"}));
        let descriptor = expand_short("enables:t").unwrap();
        let outcome = bind(&source, &descriptor, |_: &str| Some(target.clone()), &CallableRegistry::new());
        assert_eq!(outcome, Binding::Dropped);
        assert!(target.is_enabled());
    }

    #[test]
    fn callables_receive_payloads() {
        let source = element(json!({"type": "text"}));
        let callables = CallableRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        callables.register("ui.echo", move |payload: &SignalPayload| {
            seen_clone.lock().push(payload.to_value());
        });

        let descriptor = SignalDescriptor {
            signal: "value_changed".to_string(),
            target: Target::Callable("ui.echo".to_string()),
        };
        assert_eq!(bind(&source, &descriptor, |_: &str| None, &callables), Binding::Bound);

        source.as_primitive().unwrap().set_value("hello").unwrap();
        assert_eq!(*seen.lock(), vec![json!("hello")]);
    }

    #[test]
    fn populate_copies_values() {
        let source = element(json!({"type": "text"}));
        let target = element(json!({"type": "text", "id": "copy"}));
        let descriptor = SignalDescriptor {
            signal: "value_changed".to_string(),
            target: "Element:copy.set_value".parse().unwrap(),
        };
        bind(&source, &descriptor, |_: &str| Some(target.clone()), &CallableRegistry::new());

        source.as_primitive().unwrap().set_value("abc").unwrap();
        assert_eq!(target.as_primitive().unwrap().value(), json!("abc"));
    }
}
