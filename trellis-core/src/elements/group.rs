//! Composite Elements
//!
//! Groups, tabs and containers own an ordered set of children.
//!
//! # How Propagation Works
//!
//! Interactivity and visibility flow top-down. A composite applies the new
//! state to each child before updating itself, so by the time the parent's
//! own `interactivity_changed` fires every descendant already agrees with it.
//!
//! A collapsed container presents as hidden to its children: it forwards
//! `visible && !collapsed` instead of its own visibility.
//!
//! # Slots
//!
//! Children live in numbered slots. Slot numbers are handed out in
//! increasing order and never reused, so removing a child leaves the slots
//! of its siblings untouched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::base::ElementCore;
use super::state::ElementState;
use super::{BuildContext, Element};
use crate::config::{ContainerConfig, GroupConfig};
use crate::error::{ConfigError, FormError, Result};
use crate::reactive::Communicator;

/// Ordered child store with stable slot numbers.
pub(crate) struct Children {
    slots: RwLock<IndexMap<usize, Element>>,
    next: AtomicUsize,
}

impl Children {
    pub(crate) fn new(children: Vec<Element>) -> Self {
        let next = children.len();
        Self {
            slots: RwLock::new(children.into_iter().enumerate().collect()),
            next: AtomicUsize::new(next),
        }
    }

    pub(crate) fn push(&self, child: Element) -> usize {
        let slot = self.next.fetch_add(1, Ordering::SeqCst);
        self.slots.write().insert(slot, child);
        slot
    }

    pub(crate) fn remove(&self, slot: usize) -> Option<Element> {
        self.slots.write().shift_remove(&slot)
    }

    pub(crate) fn get(&self, slot: usize) -> Option<Element> {
        self.slots.read().get(&slot).cloned()
    }

    /// Children in slot order. Lock is released before returning.
    pub(crate) fn snapshot(&self) -> Vec<Element> {
        self.slots.read().values().cloned().collect()
    }

    pub(crate) fn slots(&self) -> Vec<usize> {
        self.slots.read().keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.read().len()
    }

    fn set_enabled(&self, enabled: bool) {
        for child in self.snapshot() {
            child.set_enabled(enabled);
        }
    }

    fn set_visible(&self, visible: bool) {
        for child in self.snapshot() {
            child.set_visible(visible);
        }
    }

    fn get_state(&self) -> Vec<ElementState> {
        self.snapshot().iter().map(Element::get_state).collect()
    }

    fn set_state(&self, owner: &str, saved: &[ElementState]) -> Result<()> {
        let children = self.snapshot();
        if children.len() != saved.len() {
            return Err(FormError::State(format!(
                "'{owner}' has {} children but the saved state has {}",
                children.len(),
                saved.len()
            )));
        }
        for (child, state) in children.iter().zip(saved) {
            child.set_state(state)?;
        }
        Ok(())
    }
}

pub(crate) fn build_children(raw: &[Value], ctx: &BuildContext) -> std::result::Result<Vec<Element>, ConfigError> {
    raw.iter().map(|child| Element::build(child, ctx)).collect()
}

// ============================================================================
// Group
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Group,
    Tab,
    /// Holds only tabs.
    TabGroup,
}

/// A plain grouping of elements. Tabs and tab groups are groups too.
pub struct Group {
    core: ElementCore,
    kind: GroupKind,
    children: Children,
}

impl Group {
    pub(crate) fn build(
        kind: GroupKind,
        config: GroupConfig,
        raw: Value,
        ctx: &BuildContext,
    ) -> std::result::Result<Arc<Self>, ConfigError> {
        let children = build_children(&config.elements, ctx)?;
        let core = ElementCore::new(&config.common, raw);

        if kind == GroupKind::TabGroup {
            let stray = children.iter().find(|child| {
                !matches!(child, Element::Group(group) if group.kind == GroupKind::Tab)
            });
            if let Some(stray) = stray {
                return Err(ConfigError::Structure(format!(
                    "tab group '{}' may only contain tabs, found '{}'",
                    core.key(),
                    stray.key()
                )));
            }
        }

        let group = Arc::new(Self {
            core,
            kind,
            children: Children::new(children),
        });
        if !config.common.enabled {
            group.children.set_enabled(false);
        }
        Ok(group)
    }

    pub fn core(&self) -> &ElementCore {
        &self.core
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn children(&self) -> Vec<Element> {
        self.children.snapshot()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a child. A disabled or hidden group imposes its state on it.
    pub fn add_child(&self, child: Element) -> Result<usize> {
        if self.kind == GroupKind::TabGroup
            && !matches!(&child, Element::Group(group) if group.kind == GroupKind::Tab)
        {
            return Err(FormError::Interaction(format!(
                "tab group '{}' only accepts tabs",
                self.core.key()
            )));
        }
        if !self.core.is_visible() {
            child.set_visible(false);
        }
        if !self.core.enabled_intent() {
            child.set_enabled(false);
        }
        Ok(self.children.push(child))
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.children.set_enabled(enabled);
        self.core.apply_enabled(enabled);
    }

    pub fn set_visible(&self, visible: bool) {
        self.children.set_visible(visible);
        self.core.apply_visible(visible);
    }

    pub fn get_state(&self) -> ElementState {
        ElementState::Group {
            children: self.children.get_state(),
        }
    }

    pub fn set_state(&self, saved: &ElementState) -> Result<()> {
        match saved {
            ElementState::Group { children } => self.children.set_state(self.core.key(), children),
            _ => Err(FormError::State(format!(
                "expected group state for '{}'",
                self.core.key()
            ))),
        }
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("key", &self.core.key())
            .field("kind", &self.kind)
            .field("children", &self.children.len())
            .finish()
    }
}

// ============================================================================
// Container
// ============================================================================

/// A group that can optionally be collapsed.
///
/// Collapsing disables and hides every child. Expanding restores the
/// children to the container's own enabled and visible state.
pub struct Container {
    core: ElementCore,
    children: Children,
    collapsible: bool,
    collapsed: Mutex<bool>,

    /// Emitted with the new collapse state.
    pub toggled: Communicator<bool>,
}

impl Container {
    pub(crate) fn build(
        config: ContainerConfig,
        raw: Value,
        ctx: &BuildContext,
    ) -> std::result::Result<Arc<Self>, ConfigError> {
        let children = build_children(&config.elements, ctx)?;
        Ok(Arc::new(Self::assemble(config, raw, children)))
    }

    pub(crate) fn assemble(config: ContainerConfig, raw: Value, children: Vec<Element>) -> Self {
        let collapsed = config.collapsible && config.collapsed;
        let container = Self {
            core: ElementCore::new(&config.common, raw),
            children: Children::new(children),
            collapsible: config.collapsible,
            collapsed: Mutex::new(collapsed),
            toggled: Communicator::new(),
        };
        if collapsed {
            container.children.set_visible(false);
        }
        if collapsed || !config.common.enabled {
            container.children.set_enabled(false);
        }
        container
    }

    pub fn core(&self) -> &ElementCore {
        &self.core
    }

    pub fn children(&self) -> Vec<Element> {
        self.children.snapshot()
    }

    pub(crate) fn child_store(&self) -> &Children {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_collapsible(&self) -> bool {
        self.collapsible
    }

    pub fn is_collapsed(&self) -> bool {
        *self.collapsed.lock()
    }

    /// Append a child, imposing the container's current state on it.
    pub fn add_child(&self, child: Element) -> usize {
        if self.is_collapsed() || !self.core.is_visible() {
            child.set_visible(false);
        }
        if self.is_collapsed() || !self.core.enabled_intent() {
            child.set_enabled(false);
        }
        self.children.push(child)
    }

    /// Collapse or expand. Fails without touching anything when the
    /// container is not collapsible.
    pub fn set_collapsed(&self, collapsed: bool) -> Result<()> {
        if !self.collapsible {
            return Err(FormError::Interaction(format!(
                "container '{}' is not collapsible",
                self.core.key()
            )));
        }
        {
            let mut state = self.collapsed.lock();
            if *state == collapsed {
                return Ok(());
            }
            *state = collapsed;
        }

        if collapsed {
            self.children.set_enabled(false);
            self.children.set_visible(false);
        } else {
            self.children.set_visible(self.core.is_visible());
            self.children.set_enabled(self.core.enabled_intent());
        }
        self.toggled.emit(&collapsed);
        Ok(())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.children.set_enabled(enabled && !self.is_collapsed());
        self.core.apply_enabled(enabled);
    }

    pub fn set_visible(&self, visible: bool) {
        self.children.set_visible(visible && !self.is_collapsed());
        self.core.apply_visible(visible);
    }

    pub fn get_state(&self) -> ElementState {
        ElementState::Container {
            collapsed: self.is_collapsed(),
            children: self.children.get_state(),
        }
    }

    pub fn set_state(&self, saved: &ElementState) -> Result<()> {
        let ElementState::Container { collapsed, children } = saved else {
            return Err(FormError::State(format!(
                "expected container state for '{}'",
                self.core.key()
            )));
        };
        self.restore_collapsed(*collapsed)?;
        self.children.set_state(self.core.key(), children)
    }

    pub(crate) fn restore_collapsed(&self, collapsed: bool) -> Result<()> {
        if self.collapsible {
            self.set_collapsed(collapsed)
        } else if collapsed {
            Err(FormError::State(format!(
                "container '{}' cannot be restored collapsed",
                self.core.key()
            )))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("key", &self.core.key())
            .field("collapsible", &self.collapsible)
            .field("collapsed", &self.is_collapsed())
            .field("children", &self.children.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
