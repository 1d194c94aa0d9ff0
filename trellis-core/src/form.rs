//! Forms
//!
//! A [`Form`] owns the element tree built from a [`FormConfig`], the id
//! index used to resolve signal targets, and at most one active run.
//!
//! # How Construction Works
//!
//! ```text
//! FormConfig ──► root Group ──► index ids ──► bind signals ──► keep wire
//!                                                                    │
//!                             element joins later with the target id ┘
//!                                                 bind it too
//! ```
//!
//! Element-targeted bindings are kept for the life of their source. Each
//! element that joins the form later, through [`Form::add_element`] or as a
//! child a [`Multi`](crate::elements::Multi) generates, is bound by every
//! kept descriptor naming its id. A binding with no live target yet is
//! pending.
//!
//! # Submission
//!
//! [`Form::submit`] waits for in-flight validations, refuses to start when
//! any element is in error, then starts an [`Executor`] on the target named
//! by `targetScript` with the collected [`Arguments`].

use std::str::FromStr;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::Level;

use crate::config::FormConfig;
use crate::elements::{BuildContext, Element, ElementState, Group, Multi, Primitive, SignalPayload};
use crate::error::{ConfigError, FormError, InvalidEntry, Result};
use crate::execution::{
    Arguments, Executor, FileSink, LogSink, MemorySink, RunOutcome, RunState, TargetError,
    TargetRegistry,
};
use crate::reactive::Communicator;
use crate::signals::{bind, Binding, CallableRegistry, SignalDescriptor, SignalWire, Target};
use crate::validation::{StrategyRegistry, ValidationStrategy, ValidatorKind};

/// Serializable snapshot of a whole form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormState {
    pub root: ElementState,
}

impl FormState {
    /// MessagePack encoding with named fields.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|err| FormError::Encoding(err.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|err| FormError::Encoding(err.to_string()))
    }
}

/// Configures and builds a [`Form`].
pub struct FormBuilder {
    config: FormConfig,
    strategies: StrategyRegistry,
    callables: CallableRegistry,
    targets: TargetRegistry,
    log_sink: Option<Arc<dyn LogSink>>,
}

impl FormBuilder {
    pub fn new(config: FormConfig) -> Self {
        Self {
            config,
            strategies: StrategyRegistry::builtin(),
            callables: CallableRegistry::new(),
            targets: TargetRegistry::new(),
            log_sink: None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Self::new(FormConfig::from_json(text)?))
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(Self::new(FormConfig::from_value(value)?))
    }

    /// Replace the validation strategy used for `kind`.
    pub fn strategy(mut self, kind: ValidatorKind, strategy: Arc<dyn ValidationStrategy>) -> Self {
        self.strategies.install(kind, strategy);
        self
    }

    /// Register a callable for `Python:<name>` signal targets.
    pub fn callable<F>(self, name: impl Into<String>, callable: F) -> Self
    where
        F: Fn(&SignalPayload) + Send + Sync + 'static,
    {
        self.callables.register(name, callable);
        self
    }

    /// Register a computation under a `targetScript` name.
    pub fn target<F>(self, name: impl Into<String>, target: F) -> Self
    where
        F: Fn(&Arguments) -> std::result::Result<(), TargetError> + Send + Sync + 'static,
    {
        self.targets.register(name, target);
        self
    }

    /// Send run logs here instead of the configured file or memory.
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Arc<Form>> {
        let log_level = match &self.config.logging.level {
            Some(level) => Level::from_str(level).map_err(|_| {
                ConfigError::Structure(format!("unknown log level '{level}'"))
            })?,
            None => Level::INFO,
        };

        let ctx = BuildContext::new(self.strategies);
        let root_raw = json!({"type": "group", "elements": self.config.elements.clone()});
        let root = match Element::build(&root_raw, &ctx)? {
            Element::Group(group) => group,
            other => {
                return Err(ConfigError::Structure(format!(
                    "form root built as {}",
                    other.kind_name()
                ))
                .into())
            }
        };

        let form = Arc::new_cyclic(|this| Form {
            this: this.clone(),
            config: self.config,
            root,
            ctx,
            index: DashMap::new(),
            wires: Mutex::new(Vec::new()),
            callables: self.callables,
            targets: self.targets,
            log_sink: self.log_sink,
            log_level,
            runner: Mutex::new(None),
            submitted: Communicator::new(),
            run_finished: Communicator::new(),
        });

        form.register_tree(&Element::Group(Arc::clone(&form.root)), true)?;
        tracing::debug!(
            model = ?form.config.model_name,
            elements = form.index.len(),
            pending = form.pending_signals(),
            "form built"
        );
        Ok(form)
    }
}

/// The live form.
pub struct Form {
    this: Weak<Form>,
    config: FormConfig,
    root: Arc<Group>,
    ctx: BuildContext,
    index: DashMap<String, Element>,
    wires: Mutex<Vec<SignalWire>>,
    callables: CallableRegistry,
    targets: TargetRegistry,
    log_sink: Option<Arc<dyn LogSink>>,
    log_level: Level,
    runner: Mutex<Option<Executor>>,

    /// Emitted with the argument map just before a run starts.
    pub submitted: Communicator<Arguments>,
    /// Forwarded from the active executor's `finished`.
    pub run_finished: Communicator<RunOutcome>,
}

impl Form {
    pub fn builder(config: FormConfig) -> FormBuilder {
        FormBuilder::new(config)
    }

    /// Build a form with builtin strategies and no targets or callables.
    pub fn from_json(text: &str) -> Result<Arc<Self>> {
        FormBuilder::from_json(text)?.build()
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    pub fn model_name(&self) -> Option<&str> {
        self.config.model_name.as_deref()
    }

    pub fn root(&self) -> &Arc<Group> {
        &self.root
    }

    /// Every element below the root, depth-first.
    pub fn elements(&self) -> Vec<Element> {
        let mut all = Element::Group(Arc::clone(&self.root)).descendants();
        all.remove(0);
        all
    }

    pub fn get(&self, id: &str) -> Option<Element> {
        self.index.get(id).map(|entry| entry.value().clone())
    }

    pub fn element(&self, id: &str) -> Result<Element> {
        self.get(id).ok_or_else(|| FormError::UnknownElement(id.to_string()))
    }

    pub fn primitive(&self, id: &str) -> Result<Arc<Primitive>> {
        match self.element(id)? {
            Element::Primitive(primitive) => Ok(primitive),
            other => Err(FormError::Interaction(format!(
                "'{id}' is a {}, not a primitive",
                other.kind_name()
            ))),
        }
    }

    /// Element-targeted bindings with no live target.
    pub fn pending_signals(&self) -> usize {
        let live: std::collections::HashSet<String> = self
            .elements()
            .iter()
            .filter_map(|element| element.config_id().map(str::to_string))
            .collect();
        self.wires
            .lock()
            .iter()
            .filter(|wire| match &wire.descriptor.target {
                Target::Element { id, .. } => !live.contains(id),
                Target::Callable(_) => false,
            })
            .count()
    }

    /// Build an element from `raw`, append it to the root and wire it up.
    pub fn add_element(&self, raw: Value) -> Result<Element> {
        let element = Element::build(&raw, &self.ctx)?;
        self.check_duplicates(&element)?;
        self.root.add_child(element.clone())?;
        self.register_tree(&element, false)?;
        Ok(element)
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    fn register_tree(&self, subtree: &Element, strict: bool) -> Result<()> {
        if strict {
            self.check_duplicates(subtree)?;
        }
        let elements = subtree.descendants();

        for element in &elements {
            let Some(id) = element.config_id() else {
                continue;
            };
            match self.index.entry(id.to_string()) {
                Entry::Occupied(_) => {
                    tracing::debug!(element = %id, "id already indexed; keeping the first");
                }
                Entry::Vacant(slot) => {
                    slot.insert(element.clone());
                }
            }
        }

        for element in &elements {
            if let Element::Multi(multi) = element {
                self.watch_multi(multi);
            }
        }

        let earlier = self.wires.lock().clone();

        for element in &elements {
            for spec in element.core().signals() {
                for descriptor in spec.descriptors()? {
                    self.wire(element, descriptor);
                }
            }
        }

        for wire in earlier {
            let Target::Element { id, .. } = &wire.descriptor.target else {
                continue;
            };
            let Some(source) = wire.source.upgrade() else {
                continue;
            };
            if source.core().is_detached() {
                continue;
            }
            for target in elements.iter().filter(|element| element.config_id() == Some(id.as_str())) {
                bind(&source, &wire.descriptor, |_: &str| Some(target.clone()), &self.callables);
            }
        }
        Ok(())
    }

    /// Ids outside multis must be unique across the form.
    fn check_duplicates(&self, subtree: &Element) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![subtree.clone()];
        while let Some(element) = stack.pop() {
            if let Some(id) = element.config_id() {
                if self.index.contains_key(id) || !seen.insert(id.to_string()) {
                    return Err(ConfigError::DuplicateId(id.to_string()).into());
                }
            }
            if !matches!(element, Element::Multi(_)) {
                stack.extend(element.children());
            }
        }
        Ok(())
    }

    fn watch_multi(&self, multi: &Arc<Multi>) {
        let form = self.this.clone();
        let weak_multi = Arc::downgrade(multi);
        multi.element_added.register(move |slot: &usize| {
            let (Some(form), Some(multi)) = (form.upgrade(), weak_multi.upgrade()) else {
                return;
            };
            if let Some(child) = multi.child(*slot) {
                if let Err(err) = form.register_tree(&child, false) {
                    tracing::warn!(multi = %multi.core().key(), slot, error = %err, "could not register generated element");
                }
            }
        });

        let form = self.this.clone();
        multi.element_removed.register(move |_: &usize| {
            if let Some(form) = form.upgrade() {
                form.forget_detached();
            }
        });
    }

    /// Drop detached elements from the index and their wires, then index
    /// any live element whose id lost its entry.
    fn forget_detached(&self) {
        self.index.retain(|_, element| !element.core().is_detached());
        for element in self.elements() {
            if let Some(id) = element.config_id() {
                self.index.entry(id.to_string()).or_insert(element.clone());
            }
        }
        self.wires.lock().retain(|wire| {
            wire.source
                .upgrade()
                .map_or(false, |source| !source.core().is_detached())
        });
    }

    /// Live elements configured with `id`.
    fn elements_with_id(&self, id: &str) -> Vec<Element> {
        self.elements()
            .into_iter()
            .filter(|element| element.config_id() == Some(id))
            .collect()
    }

    fn wire(&self, source: &Element, descriptor: SignalDescriptor) {
        let Target::Element { id, .. } = &descriptor.target else {
            bind(source, &descriptor, |_: &str| None, &self.callables);
            return;
        };

        let targets = self.elements_with_id(id);
        if targets.is_empty() {
            if bind(source, &descriptor, |_: &str| None, &self.callables) == Binding::Dropped {
                return;
            }
            tracing::debug!(element = %source.key(), target = %id, "signal target not known yet");
        }
        for target in &targets {
            if bind(source, &descriptor, |_: &str| Some(target.clone()), &self.callables) == Binding::Dropped {
                return;
            }
        }
        self.wires.lock().push(SignalWire {
            source: source.downgrade(),
            descriptor,
        });
    }

    // ------------------------------------------------------------------
    // Arguments and diagnostics
    // ------------------------------------------------------------------

    /// `{args_id: value}` for every element that returns a value.
    ///
    /// A multi contributes its children's values as one list; its children
    /// are not collected individually.
    pub fn collect_arguments(&self) -> Arguments {
        let mut args = Arguments::new();
        let mut stack = vec![Element::Group(Arc::clone(&self.root))];
        while let Some(element) = stack.pop() {
            if let Some(args_id) = element.core().args_id() {
                if let Some(value) = element.argument_value() {
                    args.insert(args_id.to_string(), value);
                }
            }
            if !matches!(element, Element::Multi(_)) {
                let mut children = element.children();
                children.reverse();
                stack.extend(children);
            }
        }
        args
    }

    fn primitives(&self) -> Vec<Arc<Primitive>> {
        self.elements()
            .into_iter()
            .filter_map(|element| element.as_primitive().cloned())
            .collect()
    }

    /// Block until no element is validating.
    pub fn join_validations(&self) {
        for primitive in self.primitives() {
            primitive.join_validation();
        }
    }

    /// Enabled, shown elements that are required but empty, or whose input
    /// failed validation.
    pub fn form_errors(&self) -> Vec<InvalidEntry> {
        let mut errors = Vec::new();
        for primitive in self.primitives() {
            if !primitive.core().is_enabled() || primitive.is_hidden() {
                continue;
            }
            let reason = if !primitive.has_input() {
                if !primitive.is_required() {
                    continue;
                }
                "a value is required".to_string()
            } else if primitive.is_valid() {
                continue;
            } else {
                primitive
                    .validation_error()
                    .unwrap_or_else(|| "invalid value".to_string())
            };
            errors.push(InvalidEntry {
                element: primitive.core().key().to_string(),
                label: primitive.core().label().map(str::to_string),
                value: primitive.value(),
                reason,
            });
        }
        errors
    }

    pub fn form_is_valid(&self) -> bool {
        self.form_errors().is_empty()
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Validate, collect arguments and start the target computation.
    pub fn submit(&self) -> Result<Executor> {
        self.join_validations();
        let errors = self.form_errors();
        if !errors.is_empty() {
            tracing::warn!(count = errors.len(), "submission refused: invalid data");
            return Err(FormError::InvalidData(errors));
        }

        let name = self
            .config
            .target_script
            .clone()
            .ok_or_else(|| FormError::MissingTarget("<unset>".to_string()))?;
        let target = self
            .targets
            .get(&name)
            .ok_or_else(|| FormError::MissingTarget(name.clone()))?;

        let executor = {
            let mut runner = self.runner.lock();
            let busy = runner
                .as_ref()
                .map_or(false, |active| !matches!(active.state(), RunState::Finished(_)));
            if busy {
                return Err(FormError::AlreadyRunning);
            }

            let args = self.collect_arguments();
            let executor = Executor::with_log(target, args, self.run_log_sink()?, self.log_level);
            let run_finished = self.run_finished.clone();
            executor
                .finished
                .register(move |outcome: &RunOutcome| run_finished.emit(outcome));
            *runner = Some(executor.clone());
            executor
        };

        tracing::info!(model = ?self.config.model_name, script = %name, run = executor.id(), "form submitted");
        self.submitted.emit(executor.arguments());
        executor.start()?;
        Ok(executor)
    }

    /// The most recent run, if any.
    pub fn executor(&self) -> Option<Executor> {
        self.runner.lock().clone()
    }

    fn run_log_sink(&self) -> Result<Arc<dyn LogSink>> {
        if let Some(sink) = &self.log_sink {
            return Ok(Arc::clone(sink));
        }
        match &self.config.logging.file {
            Some(path) => Ok(Arc::new(FileSink::create(path)?)),
            None => Ok(Arc::new(MemorySink::new())),
        }
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    pub fn get_state(&self) -> FormState {
        FormState {
            root: self.root.get_state(),
        }
    }

    pub fn set_state(&self, state: &FormState) -> Result<()> {
        self.root.set_state(&state.root)
    }
}

impl std::fmt::Debug for Form {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Form")
            .field("model_name", &self.config.model_name)
            .field("elements", &self.index.len())
            .field("pending_signals", &self.pending_signals())
            .field("targets", &self.targets)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn form(elements: Value) -> Arc<Form> {
        FormBuilder::from_value(json!({"modelName": "test", "elements": elements}))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn arguments_use_args_id() {
        let form = form(json!([
            {"type": "text", "id": "rate", "args_id": "rate", "defaultValue": "7"},
            {"type": "text", "id": "note"},
            {"type": "label", "label": "Intro", "args_id": "ignored"}
        ]));
        let args = form.collect_arguments();
        assert_eq!(args.get("rate"), Some(&json!("7")));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = FormBuilder::from_value(json!({"elements": [
            {"type": "text", "id": "a"},
            {"type": "group", "elements": [{"type": "checkbox", "id": "a"}]}
        ]}))
        .unwrap()
        .build()
        .unwrap_err();
        assert!(matches!(err, FormError::Config(ConfigError::DuplicateId(id)) if id == "a"));
    }

    #[test]
    fn forward_references_resolve_on_add() {
        let form = form(json!([
            {"type": "checkbox", "id": "toggle", "signals": ["enables:later"]}
        ]));
        assert_eq!(form.pending_signals(), 1);

        let later = form.add_element(json!({"type": "text", "id": "later"})).unwrap();
        assert_eq!(form.pending_signals(), 0);
        assert!(!later.is_enabled());

        form.primitive("toggle").unwrap().set_value(true).unwrap();
        assert!(later.is_enabled());
    }

    #[test]
    fn add_element_rejects_existing_id() {
        let form = form(json!([{"type": "text", "id": "a"}]));
        let err = form.add_element(json!({"type": "text", "id": "a"})).unwrap_err();
        assert!(matches!(err, FormError::Config(ConfigError::DuplicateId(_))));
        assert_eq!(form.elements().len(), 1);
    }

    #[test]
    fn multi_children_join_the_index() {
        let form = form(json!([
            {"type": "checkbox", "id": "gate", "signals": ["enables:row"]},
            {"type": "multi", "id": "rows", "args_id": "rows",
             "template": {"type": "text", "id": "row", "defaultValue": "x"}}
        ]));
        assert_eq!(form.pending_signals(), 1);

        let rows = form.element("rows").unwrap();
        let multi = rows.as_multi().unwrap();
        let slot = multi.add_element(None).unwrap();
        assert_eq!(form.pending_signals(), 0);
        assert!(form.get("row").is_some());
        assert!(!multi.child(slot).unwrap().is_enabled());

        multi.remove_element(slot).unwrap();
        assert!(form.get("row").is_none());
    }

    #[test]
    fn regenerated_children_are_rewired() {
        let form = form(json!([
            {"type": "checkbox", "id": "gate", "signals": ["enables:row"]},
            {"type": "multi", "id": "rows", "template": {"type": "text", "id": "row"}}
        ]));
        let rows = form.element("rows").unwrap();
        let multi = rows.as_multi().unwrap();

        let first = multi.add_element(None).unwrap();
        assert!(!multi.child(first).unwrap().is_enabled());
        multi.remove_element(first).unwrap();
        assert_eq!(form.pending_signals(), 1);

        let second = multi.add_element(None).unwrap();
        let third = multi.add_element(None).unwrap();
        assert_eq!(form.pending_signals(), 0);
        assert!(!multi.child(second).unwrap().is_enabled());
        assert!(!multi.child(third).unwrap().is_enabled());

        form.primitive("gate").unwrap().set_value(true).unwrap();
        assert!(multi.child(second).unwrap().is_enabled());
        assert!(multi.child(third).unwrap().is_enabled());

        multi.remove_element(second).unwrap();
        assert!(form.get("row").unwrap().ptr_eq(&multi.child(third).unwrap()));
    }

    #[test]
    fn multi_state_restores_inside_a_form() {
        let form = form(json!([
            {"type": "checkbox", "id": "gate", "signals": ["enables:row"]},
            {"type": "multi", "id": "rows",
             "elements": [{"type": "label", "label": "Rows"}],
             "template": {"type": "text", "id": "row"}}
        ]));
        form.primitive("gate").unwrap().set_value(true).unwrap();
        let rows = form.element("rows").unwrap();
        let multi = rows.as_multi().unwrap();
        let slot = multi.add_element(None).unwrap();
        multi.child(slot).unwrap().as_primitive().unwrap().set_value("a").unwrap();
        multi.add_element(None).unwrap();
        let saved = form.get_state();

        form.primitive("gate").unwrap().set_value(false).unwrap();
        form.set_state(&saved).unwrap();

        assert_eq!(form.get_state(), saved);
        assert_eq!(multi.len(), 3);
        assert!(multi.children()[1..].iter().all(|row| row.is_enabled()));
        assert!(!form.get("row").unwrap().core().is_detached());
    }

    #[test]
    fn multi_contributes_a_list() {
        let form = form(json!([
            {"type": "multi", "id": "paths", "args_id": "paths", "count": 2,
             "template": {"type": "text", "args_id": "path", "defaultValue": "a"}}
        ]));
        let args = form.collect_arguments();
        assert_eq!(args.get("paths"), Some(&json!(["a", "a"])));
        assert!(args.get("path").is_none());
    }

    #[test]
    fn errors_report_required_and_invalid() {
        let form = form(json!([
            {"type": "text", "id": "name", "label": "Name", "required": true},
            {"type": "text", "id": "n", "validateAs": {"type": "number"}, "defaultValue": "abc"},
            {"type": "text", "id": "ok"}
        ]));
        form.join_validations();
        let errors = form.form_errors();
        let ids: Vec<_> = errors.iter().map(|entry| entry.element.as_str()).collect();
        assert_eq!(ids, vec!["name", "n"]);
        assert_eq!(errors[0].label.as_deref(), Some("Name"));
        assert!(!form.form_is_valid());
    }

    #[test]
    fn submit_refuses_invalid_data() {
        let form = FormBuilder::from_value(json!({
            "targetScript": "model.execute",
            "elements": [{"type": "text", "id": "name", "required": true}]
        }))
        .unwrap()
        .target("model.execute", |_: &Arguments| Ok(()))
        .build()
        .unwrap();

        match form.submit() {
            Err(FormError::InvalidData(entries)) => assert_eq!(entries.len(), 1),
            other => panic!("expected InvalidData, got {other:?}"),
        }
        assert!(form.executor().is_none());
    }

    #[test]
    fn submit_requires_a_target() {
        let form = form(json!([]));
        assert!(matches!(form.submit(), Err(FormError::MissingTarget(_))));
    }

    #[test]
    fn submit_runs_the_target() {
        let sink = Arc::new(MemorySink::new());
        let form = FormBuilder::from_value(json!({
            "targetScript": "model.execute",
            "elements": [{"type": "text", "args_id": "rate", "defaultValue": "7"}]
        }))
        .unwrap()
        .target("model.execute", |args: &Arguments| {
            tracing::info!(rate = ?args.get("rate"), "executing");
            Ok(())
        })
        .log_sink(sink.clone())
        .build()
        .unwrap();

        let submitted = Arc::new(Mutex::new(None));
        let submitted_clone = submitted.clone();
        form.submitted.register(move |args: &Arguments| {
            *submitted_clone.lock() = Some(args.clone());
        });

        let executor = form.submit().unwrap();
        let outcome = executor.join().unwrap();

        assert!(!outcome.thread_failed);
        assert_eq!(submitted.lock().as_ref().and_then(|args| args.get("rate").cloned()), Some(json!("7")));
        assert!(sink.records().iter().any(|record| record.message.starts_with("executing")));
    }

    #[test]
    fn resubmit_from_run_finished() {
        let form = FormBuilder::from_value(json!({
            "targetScript": "model.execute",
            "elements": []
        }))
        .unwrap()
        .target("model.execute", |_: &Arguments| Ok(()))
        .build()
        .unwrap();

        let runs = Arc::new(Mutex::new(Vec::new()));
        let runs_clone = runs.clone();
        let weak = Arc::downgrade(&form);
        form.run_finished.register(move |_: &RunOutcome| {
            let mut runs = runs_clone.lock();
            if runs.is_empty() {
                if let Some(form) = weak.upgrade() {
                    runs.push(form.submit().map(|executor| executor.id()));
                    return;
                }
            }
            runs.push(Ok(u64::MAX));
        });

        let first = form.submit().unwrap();
        first.join();
        let second = form.executor().unwrap();
        second.join();

        let runs = runs.lock();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].as_ref().ok(), Some(&second.id()));
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn state_round_trip_through_bytes() {
        let form = form(json!([
            {"type": "text", "id": "a"},
            {"type": "container", "collapsible": true, "elements": [{"type": "checkbox", "id": "b"}]}
        ]));
        form.primitive("a").unwrap().set_value("hello").unwrap();
        form.primitive("b").unwrap().set_value(true).unwrap();

        let bytes = form.get_state().to_bytes().unwrap();
        let restored = FormState::from_bytes(&bytes).unwrap();
        assert_eq!(restored, form.get_state());

        form.set_state(&restored).unwrap();
        assert_eq!(form.get_state(), restored);
    }

    #[test]
    fn bad_log_level_is_a_config_error() {
        let err = FormBuilder::from_value(json!({"logging": {"level": "loud"}, "elements": []}))
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, FormError::Config(ConfigError::Structure(_))));
    }
}
