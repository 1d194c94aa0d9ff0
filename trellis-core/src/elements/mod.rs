//! Form Elements
//!
//! The element tree: labels, value-holding primitives, and the composites
//! that group them.
//!
//! # Element Kinds
//!
//! | kind | module | holds |
//! |---|---|---|
//! | label | here | static text |
//! | text, file, folder, checkbox, dropdown | [`primitive`] | one value |
//! | group, tab, tabGroup | [`group`] | children |
//! | container | [`group`] | children, collapse state |
//! | multi | [`multi`] | template-built children |
//!
//! [`Element`] is a cheap, cloneable handle over any of them. It is what the
//! form indexes, what signal wiring connects to, and what composites store.
//!
//! # Signals
//!
//! Every element publishes `config_changed`, `interactivity_changed` and
//! `visibility_changed`. The rest depend on the kind: see
//! [`Element::connect`] for the mapping from [`SignalName`] to communicator.
//!
//! # Thread Safety
//!
//! Elements are `Send + Sync`. Internal locks are never held while
//! communicators emit, so callbacks may freely call back into any element.

mod base;
pub mod group;
pub mod multi;
pub mod primitive;
mod state;

use std::str::FromStr;
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::config::{ElementConfig, LabelConfig};
use crate::error::{ConfigError, Result};
use crate::validation::{StrategyRegistry, ValidationOutcome};

pub use base::ElementCore;
pub use group::{Container, Group, GroupKind};
pub use multi::Multi;
pub use primitive::{Primitive, PrimitiveKind};
pub use state::ElementState;

/// What element construction needs besides the configuration itself.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub strategies: Arc<StrategyRegistry>,
}

impl BuildContext {
    pub fn new(strategies: StrategyRegistry) -> Self {
        Self {
            strategies: Arc::new(strategies),
        }
    }
}

// ============================================================================
// Label
// ============================================================================

/// Static text. Has no value and is never part of the argument map.
pub struct Label {
    core: ElementCore,
}

impl Label {
    fn new(config: &LabelConfig, raw: Value) -> Self {
        Self {
            core: ElementCore::new(&config.common, raw),
        }
    }

    pub fn core(&self) -> &ElementCore {
        &self.core
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.core.apply_enabled(enabled);
    }

    pub fn set_visible(&self, visible: bool) {
        self.core.apply_visible(visible);
    }
}

impl std::fmt::Debug for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Label")
            .field("key", &self.core.key())
            .field("label", &self.core.label())
            .finish()
    }
}

// ============================================================================
// Signals
// ============================================================================

/// A signal an element may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalName {
    ConfigChanged,
    InteractivityChanged,
    VisibilityChanged,
    ValueChanged,
    ValidationCompleted,
    SatisfactionChanged,
    HiddenToggled,
    Toggled,
    ElementAdded,
    ElementRemoved,
}

impl SignalName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalName::ConfigChanged => "config_changed",
            SignalName::InteractivityChanged => "interactivity_changed",
            SignalName::VisibilityChanged => "visibility_changed",
            SignalName::ValueChanged => "value_changed",
            SignalName::ValidationCompleted => "validation_completed",
            SignalName::SatisfactionChanged => "satisfaction_changed",
            SignalName::HiddenToggled => "hidden_toggled",
            SignalName::Toggled => "toggled",
            SignalName::ElementAdded => "element_added",
            SignalName::ElementRemoved => "element_removed",
        }
    }
}

impl FromStr for SignalName {
    type Err = ConfigError;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        let signal = match name {
            "config_changed" => SignalName::ConfigChanged,
            "interactivity_changed" => SignalName::InteractivityChanged,
            "visibility_changed" => SignalName::VisibilityChanged,
            "value_changed" => SignalName::ValueChanged,
            "validation_completed" => SignalName::ValidationCompleted,
            "satisfaction_changed" => SignalName::SatisfactionChanged,
            "hidden_toggled" => SignalName::HiddenToggled,
            "toggled" => SignalName::Toggled,
            "element_added" => SignalName::ElementAdded,
            "element_removed" => SignalName::ElementRemoved,
            other => return Err(ConfigError::MalformedSignal(other.to_string())),
        };
        Ok(signal)
    }
}

impl std::fmt::Display for SignalName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to a handler connected through [`Element::connect`].
#[derive(Debug, Clone, PartialEq)]
pub enum SignalPayload {
    Flag(bool),
    Value(Value),
    Validation(ValidationOutcome),
    Slot(usize),
    Config(Value),
}

impl SignalPayload {
    /// Truthiness used by operations such as "enable when satisfied".
    pub fn truthy(&self) -> bool {
        match self {
            SignalPayload::Flag(flag) => *flag,
            SignalPayload::Value(value) | SignalPayload::Config(value) => primitive::truthy(value),
            SignalPayload::Validation(outcome) => outcome.passed(),
            SignalPayload::Slot(_) => true,
        }
    }

    /// The payload as JSON, for callables.
    pub fn to_value(&self) -> Value {
        match self {
            SignalPayload::Flag(flag) => Value::Bool(*flag),
            SignalPayload::Value(value) | SignalPayload::Config(value) => value.clone(),
            SignalPayload::Validation(outcome) => Value::Bool(outcome.passed()),
            SignalPayload::Slot(slot) => Value::from(*slot as u64),
        }
    }
}

pub type SignalHandler = Arc<dyn Fn(&SignalPayload) + Send + Sync>;

// ============================================================================
// Element
// ============================================================================

/// Handle to any element in a form tree.
#[derive(Clone)]
pub enum Element {
    Label(Arc<Label>),
    Primitive(Arc<Primitive>),
    Group(Arc<Group>),
    Container(Arc<Container>),
    Multi(Arc<Multi>),
}

impl Element {
    /// Build an element (and its subtree) from raw configuration.
    pub fn build(raw: &Value, ctx: &BuildContext) -> std::result::Result<Element, ConfigError> {
        let config = ElementConfig::from_value(raw)?;
        let raw = raw.clone();

        let element = match config {
            ElementConfig::Label(config) => Element::Label(Arc::new(Label::new(&config, raw))),
            ElementConfig::Text(config) => {
                Element::Primitive(Primitive::build(PrimitiveKind::Text, config, raw, ctx)?)
            }
            ElementConfig::File(config) => {
                Element::Primitive(Primitive::build(PrimitiveKind::File, config, raw, ctx)?)
            }
            ElementConfig::Folder(config) => {
                Element::Primitive(Primitive::build(PrimitiveKind::Folder, config, raw, ctx)?)
            }
            ElementConfig::CheckBox(config) => {
                Element::Primitive(Primitive::build(PrimitiveKind::CheckBox, config, raw, ctx)?)
            }
            ElementConfig::Dropdown(config) => Element::Primitive(Primitive::build(
                PrimitiveKind::Dropdown {
                    options: config.options,
                },
                config.primitive,
                raw,
                ctx,
            )?),
            ElementConfig::Group(config) => {
                Element::Group(Group::build(GroupKind::Group, config, raw, ctx)?)
            }
            ElementConfig::Tab(config) => Element::Group(Group::build(GroupKind::Tab, config, raw, ctx)?),
            ElementConfig::TabGroup(config) => {
                Element::Group(Group::build(GroupKind::TabGroup, config, raw, ctx)?)
            }
            ElementConfig::Container(config) => Element::Container(Container::build(config, raw, ctx)?),
            ElementConfig::Multi(config) => Element::Multi(Multi::build(config, raw, ctx)?),
        };

        tracing::trace!(element = %element.key(), kind = element.kind_name(), "element built");
        Ok(element)
    }

    /// Build with the builtin validation strategies.
    pub fn from_json(raw: Value) -> Result<Element> {
        Ok(Self::build(&raw, &BuildContext::default())?)
    }

    pub fn core(&self) -> &ElementCore {
        match self {
            Element::Label(label) => label.core(),
            Element::Primitive(primitive) => primitive.core(),
            Element::Group(group) => group.core(),
            Element::Container(container) => container.core(),
            Element::Multi(multi) => multi.core(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Element::Label(_) => "label",
            Element::Primitive(primitive) => match primitive.kind() {
                PrimitiveKind::Text => "text",
                PrimitiveKind::File => "file",
                PrimitiveKind::Folder => "folder",
                PrimitiveKind::CheckBox => "checkbox",
                PrimitiveKind::Dropdown { .. } => "dropdown",
            },
            Element::Group(group) => match group.kind() {
                GroupKind::Group => "group",
                GroupKind::Tab => "tab",
                GroupKind::TabGroup => "tabGroup",
            },
            Element::Container(_) => "container",
            Element::Multi(_) => "multi",
        }
    }

    pub fn key(&self) -> &str {
        self.core().key()
    }

    pub fn uid(&self) -> &str {
        self.core().uid()
    }

    pub fn config_id(&self) -> Option<&str> {
        self.core().config_id()
    }

    pub fn label(&self) -> Option<&str> {
        self.core().label()
    }

    pub fn is_enabled(&self) -> bool {
        self.core().is_enabled()
    }

    pub fn is_visible(&self) -> bool {
        self.core().is_visible()
    }

    pub fn set_enabled(&self, enabled: bool) {
        match self {
            Element::Label(label) => label.set_enabled(enabled),
            Element::Primitive(primitive) => primitive.set_enabled(enabled),
            Element::Group(group) => group.set_enabled(enabled),
            Element::Container(container) => container.set_enabled(enabled),
            Element::Multi(multi) => multi.set_enabled(enabled),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        match self {
            Element::Label(label) => label.set_visible(visible),
            Element::Primitive(primitive) => primitive.set_visible(visible),
            Element::Group(group) => group.set_visible(visible),
            Element::Container(container) => container.set_visible(visible),
            Element::Multi(multi) => multi.set_visible(visible),
        }
    }

    pub fn as_primitive(&self) -> Option<&Arc<Primitive>> {
        match self {
            Element::Primitive(primitive) => Some(primitive),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&Arc<Group>> {
        match self {
            Element::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&Arc<Container>> {
        match self {
            Element::Container(container) => Some(container),
            _ => None,
        }
    }

    pub fn as_multi(&self) -> Option<&Arc<Multi>> {
        match self {
            Element::Multi(multi) => Some(multi),
            _ => None,
        }
    }

    /// Direct children; empty for labels and primitives.
    pub fn children(&self) -> Vec<Element> {
        match self {
            Element::Label(_) | Element::Primitive(_) => Vec::new(),
            Element::Group(group) => group.children(),
            Element::Container(container) => container.children(),
            Element::Multi(multi) => multi.children(),
        }
    }

    /// This element followed by its whole subtree, depth-first.
    pub fn descendants(&self) -> Vec<Element> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(element) = stack.pop() {
            let mut children = element.children();
            children.reverse();
            stack.extend(children);
            out.push(element);
        }
        out
    }

    pub fn get_state(&self) -> ElementState {
        match self {
            Element::Label(_) => ElementState::Static,
            Element::Primitive(primitive) => primitive.get_state(),
            Element::Group(group) => group.get_state(),
            Element::Container(container) => container.get_state(),
            Element::Multi(multi) => multi.get_state(),
        }
    }

    pub fn set_state(&self, saved: &ElementState) -> Result<()> {
        match self {
            Element::Label(_) => Ok(()),
            Element::Primitive(primitive) => primitive.set_state(saved),
            Element::Group(group) => group.set_state(saved),
            Element::Container(container) => container.set_state(saved),
            Element::Multi(multi) => multi.set_state(saved),
        }
    }

    /// The value this element contributes to the argument map, if any.
    ///
    /// Collapsible containers contribute whether they are expanded; multis
    /// contribute the values of their children in slot order.
    pub fn argument_value(&self) -> Option<Value> {
        match self {
            Element::Primitive(primitive) => primitive.should_return().then(|| primitive.returned_value()),
            Element::Container(container) if container.is_collapsible() => container
                .core()
                .is_enabled()
                .then(|| Value::Bool(!container.is_collapsed())),
            Element::Multi(multi) => multi.core().is_enabled().then(|| {
                Value::Array(
                    multi
                        .children()
                        .iter()
                        .filter_map(Element::argument_value)
                        .collect(),
                )
            }),
            _ => None,
        }
    }

    /// Whether this element publishes `signal`.
    pub fn declares(&self, signal: SignalName) -> bool {
        use SignalName::*;

        match signal {
            ConfigChanged | InteractivityChanged | VisibilityChanged => true,
            ValueChanged | ValidationCompleted | SatisfactionChanged | HiddenToggled => {
                matches!(self, Element::Primitive(_))
            }
            Toggled => matches!(self, Element::Container(_) | Element::Multi(_)),
            ElementAdded | ElementRemoved => matches!(self, Element::Multi(_)),
        }
    }

    /// Connect `handler` to `signal`. Returns `false` when this element does
    /// not publish it.
    pub fn connect(&self, signal: SignalName, handler: SignalHandler) -> bool {
        use SignalName::*;

        let core = self.core();
        match (signal, self) {
            (ConfigChanged, _) => {
                core.config_changed
                    .register(move |config: &Value| handler(&SignalPayload::Config(config.clone())));
            }
            (InteractivityChanged, _) => {
                core.interactivity_changed
                    .register(move |flag: &bool| handler(&SignalPayload::Flag(*flag)));
            }
            (VisibilityChanged, _) => {
                core.visibility_changed
                    .register(move |flag: &bool| handler(&SignalPayload::Flag(*flag)));
            }
            (ValueChanged, Element::Primitive(primitive)) => {
                primitive
                    .value_changed
                    .register(move |value: &Value| handler(&SignalPayload::Value(value.clone())));
            }
            (ValidationCompleted, Element::Primitive(primitive)) => {
                primitive
                    .validation_completed
                    .register(move |outcome: &ValidationOutcome| {
                        handler(&SignalPayload::Validation(outcome.clone()))
                    });
            }
            (SatisfactionChanged, Element::Primitive(primitive)) => {
                primitive
                    .satisfaction_changed
                    .register(move |flag: &bool| handler(&SignalPayload::Flag(*flag)));
            }
            (HiddenToggled, Element::Primitive(primitive)) => {
                primitive
                    .hidden_toggled
                    .register(move |flag: &bool| handler(&SignalPayload::Flag(*flag)));
            }
            (Toggled, Element::Container(container)) => {
                container
                    .toggled
                    .register(move |flag: &bool| handler(&SignalPayload::Flag(*flag)));
            }
            (Toggled, Element::Multi(multi)) => {
                multi
                    .container()
                    .toggled
                    .register(move |flag: &bool| handler(&SignalPayload::Flag(*flag)));
            }
            (ElementAdded, Element::Multi(multi)) => {
                multi
                    .element_added
                    .register(move |slot: &usize| handler(&SignalPayload::Slot(*slot)));
            }
            (ElementRemoved, Element::Multi(multi)) => {
                multi
                    .element_removed
                    .register(move |slot: &usize| handler(&SignalPayload::Slot(*slot)));
            }
            _ => return false,
        }
        true
    }

    /// Current state of a boolean signal, used to bring a freshly connected
    /// target in line with its source. `None` for non-boolean signals.
    pub fn current_flag(&self, signal: SignalName) -> Option<bool> {
        match (signal, self) {
            (SignalName::InteractivityChanged, _) => Some(self.is_enabled()),
            (SignalName::VisibilityChanged, _) => Some(self.is_visible()),
            (SignalName::SatisfactionChanged, Element::Primitive(primitive)) => {
                Some(primitive.satisfied_now())
            }
            (SignalName::HiddenToggled, Element::Primitive(primitive)) => Some(primitive.is_hidden()),
            (SignalName::Toggled, Element::Container(container)) => Some(container.is_collapsed()),
            (SignalName::Toggled, Element::Multi(multi)) => Some(multi.container().is_collapsed()),
            _ => None,
        }
    }

    pub fn downgrade(&self) -> WeakElement {
        match self {
            Element::Label(label) => WeakElement::Label(Arc::downgrade(label)),
            Element::Primitive(primitive) => WeakElement::Primitive(Arc::downgrade(primitive)),
            Element::Group(group) => WeakElement::Group(Arc::downgrade(group)),
            Element::Container(container) => WeakElement::Container(Arc::downgrade(container)),
            Element::Multi(multi) => WeakElement::Multi(Arc::downgrade(multi)),
        }
    }

    /// Whether both handles point at the same element.
    pub fn ptr_eq(&self, other: &Element) -> bool {
        match (self, other) {
            (Element::Label(a), Element::Label(b)) => Arc::ptr_eq(a, b),
            (Element::Primitive(a), Element::Primitive(b)) => Arc::ptr_eq(a, b),
            (Element::Group(a), Element::Group(b)) => Arc::ptr_eq(a, b),
            (Element::Container(a), Element::Container(b)) => Arc::ptr_eq(a, b),
            (Element::Multi(a), Element::Multi(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Element::Label(label) => label.fmt(f),
            Element::Primitive(primitive) => primitive.fmt(f),
            Element::Group(group) => group.fmt(f),
            Element::Container(container) => container.fmt(f),
            Element::Multi(multi) => multi.fmt(f),
        }
    }
}

/// Non-owning element handle, held by signal wiring so connections never
/// keep a removed element alive.
#[derive(Clone)]
pub enum WeakElement {
    Label(Weak<Label>),
    Primitive(Weak<Primitive>),
    Group(Weak<Group>),
    Container(Weak<Container>),
    Multi(Weak<Multi>),
}

impl WeakElement {
    pub fn upgrade(&self) -> Option<Element> {
        match self {
            WeakElement::Label(weak) => weak.upgrade().map(Element::Label),
            WeakElement::Primitive(weak) => weak.upgrade().map(Element::Primitive),
            WeakElement::Group(weak) => weak.upgrade().map(Element::Group),
            WeakElement::Container(weak) => weak.upgrade().map(Element::Container),
            WeakElement::Multi(weak) => weak.upgrade().map(Element::Multi),
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

    #[test]
    fn builds_every_kind() {
        let kinds = [
            json!({"type": "label", "label": "Intro"}),
            json!({"type": "text"}),
            json!({"type": "file"}),
            json!({"type": "folder"}),
            json!({"type": "checkbox"}),
            json!({"type": "dropdown", "options": ["a"]}),
            json!({"type": "group"}),
            json!({"type": "tab"}),
            json!({"type": "tabGroup"}),
            json!({"type": "container"}),
            json!({"type": "multi", "template": {"type": "text"}}),
        ];
        for raw in kinds {
            let expected = raw["type"].as_str().unwrap().to_string();
            let element = Element::from_json(raw).unwrap();
            assert_eq!(element.kind_name(), expected);
        }
    }

    #[test]
    fn unknown_type_is_a_config_error() {
        assert!(Element::from_json(json!({"type": "slider"})).is_err());
    }

    #[test]
    fn descendants_are_depth_first() {
        let root = Element::from_json(json!({
            "type": "group",
            "id": "root",
            "elements": [
                {"type": "group", "id": "a", "elements": [{"type": "text", "id": "a1"}]},
                {"type": "text", "id": "b"}
            ]
        }))
        .unwrap();
        let keys: Vec<_> = root.descendants().iter().map(|e| e.key().to_string()).collect();
        assert_eq!(keys, vec!["root", "a", "a1", "b"]);
    }

    #[test]
    fn connect_reports_undeclared_signals() {
        let label = Element::from_json(json!({"type": "label"})).unwrap();
        assert!(!label.connect(SignalName::ValueChanged, Arc::new(|_: &SignalPayload| {})));
        assert!(label.connect(SignalName::VisibilityChanged, Arc::new(|_: &SignalPayload| {})));
        assert!(!label.declares(SignalName::SatisfactionChanged));
    }

    #[test]
    fn connected_handler_receives_payload() {
        let text = Element::from_json(json!({"type": "text"})).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        text.connect(
            SignalName::ValueChanged,
            Arc::new(move |payload: &SignalPayload| seen_clone.lock().push(payload.clone())),
        );
        text.as_primitive().unwrap().set_value("x").unwrap();
        assert_eq!(*seen.lock(), vec![SignalPayload::Value(json!("x"))]);
    }

    #[test]
    fn signal_names_parse() {
        for name in ["value_changed", "satisfaction_changed", "element_removed"] {
            assert_eq!(name.parse::<SignalName>().unwrap().as_str(), name);
        }
        assert!("clicked".parse::<SignalName>().is_err());
    }

    #[test]
    fn weak_handle_does_not_keep_element_alive() {
        let element = Element::from_json(json!({"type": "label"})).unwrap();
        let weak = element.downgrade();
        assert!(weak.upgrade().unwrap().ptr_eq(&element));
        drop(element);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn collapsible_container_contributes_expansion() {
        let container = Element::from_json(json!({"type": "container", "collapsible": true})).unwrap();
        assert_eq!(container.argument_value(), Some(json!(true)));
        container.as_container().unwrap().set_collapsed(true).unwrap();
        assert_eq!(container.argument_value(), Some(json!(false)));
    }
}
