//! Multi: a container whose children are generated from a template.
//!
//! Generated children are built from the `template` configuration,
//! optionally deep-merged with per-child overrides. Children listed under
//! `elements` are fixed: they come first, cannot be removed, and keep their
//! place when state is restored. Children are addressed by slot; see
//! [`group`](super::group) for the slot numbering rules.

use std::sync::Arc;

use serde_json::Value;

use super::base::ElementCore;
use super::group::Container;
use super::state::ElementState;
use super::{BuildContext, Element};
use crate::config::{merge_json, MultiConfig};
use crate::error::{ConfigError, FormError, Result};
use crate::reactive::Communicator;

pub struct Multi {
    container: Container,
    template: Value,
    ctx: BuildContext,
    /// Slots below this hold the fixed children.
    fixed: usize,

    /// Emitted with the slot of each new child, after it is attached.
    pub element_added: Communicator<usize>,
    /// Emitted with the slot of each removed child, after it is detached.
    pub element_removed: Communicator<usize>,
}

impl Multi {
    pub(crate) fn build(
        config: MultiConfig,
        raw: Value,
        ctx: &BuildContext,
    ) -> std::result::Result<Arc<Self>, ConfigError> {
        if !config.template.is_object() {
            return Err(ConfigError::Structure(
                "multi element needs an object 'template'".to_string(),
            ));
        }

        let mut children = super::group::build_children(&config.container.elements, ctx)?;
        let fixed = children.len();
        for _ in 0..config.count {
            children.push(Element::build(&config.template, ctx)?);
        }

        Ok(Arc::new(Self {
            container: Container::assemble(config.container, raw, children),
            template: config.template,
            ctx: ctx.clone(),
            fixed,
            element_added: Communicator::new(),
            element_removed: Communicator::new(),
        }))
    }

    pub fn core(&self) -> &ElementCore {
        self.container.core()
    }

    /// The underlying container: collapse state and `toggled`.
    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn template(&self) -> &Value {
        &self.template
    }

    pub fn children(&self) -> Vec<Element> {
        self.container.children()
    }

    pub fn slots(&self) -> Vec<usize> {
        self.container.child_store().slots()
    }

    pub fn child(&self, slot: usize) -> Option<Element> {
        self.container.child_store().get(slot)
    }

    /// Slots of the template-generated children.
    pub fn generated_slots(&self) -> Vec<usize> {
        self.slots().into_iter().filter(|slot| *slot >= self.fixed).collect()
    }

    pub fn len(&self) -> usize {
        self.container.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a child from the template, merged with `overrides`, and append
    /// it. Returns the new slot.
    pub fn add_element(&self, overrides: Option<Value>) -> Result<usize> {
        let mut raw = self.template.clone();
        if let Some(overrides) = overrides {
            merge_json(&mut raw, overrides);
        }
        let child = Element::build(&raw, &self.ctx)?;
        Ok(self.attach(child))
    }

    fn attach(&self, child: Element) -> usize {
        let slot = self.container.add_child(child);
        tracing::debug!(multi = %self.core().key(), slot, "element added");
        self.element_added.emit(&slot);
        slot
    }

    /// Detach and drop the generated child in `slot`.
    pub fn remove_element(&self, slot: usize) -> Result<Element> {
        if slot < self.fixed {
            return Err(FormError::Interaction(format!(
                "slot {slot} of '{}' holds a fixed element",
                self.core().key()
            )));
        }
        let child = self
            .container
            .child_store()
            .remove(slot)
            .ok_or(FormError::UnknownSlot(slot))?;
        for element in child.descendants() {
            element.core().detach();
        }
        tracing::debug!(multi = %self.core().key(), slot, "element removed");
        self.element_removed.emit(&slot);
        Ok(child)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.container.set_enabled(enabled);
    }

    pub fn set_visible(&self, visible: bool) {
        self.container.set_visible(visible);
    }

    pub fn get_state(&self) -> ElementState {
        ElementState::Multi {
            collapsed: self.container.is_collapsed(),
            children: self.children().iter().map(Element::get_state).collect(),
        }
    }

    /// Restore fixed children in place and replace the generated ones with
    /// children rebuilt from the template, one per saved entry.
    ///
    /// The saved state is checked and the replacements are built before the
    /// tree changes, so a mismatch leaves the multi untouched.
    pub fn set_state(&self, saved: &ElementState) -> Result<()> {
        let ElementState::Multi { collapsed, children } = saved else {
            return Err(FormError::State(format!(
                "expected multi state for '{}'",
                self.core().key()
            )));
        };
        if children.len() < self.fixed {
            return Err(FormError::State(format!(
                "'{}' has {} fixed children but the saved state has {} entries",
                self.core().key(),
                self.fixed,
                children.len()
            )));
        }
        if *collapsed && !self.container.is_collapsible() {
            return Err(FormError::State(format!(
                "container '{}' cannot be restored collapsed",
                self.core().key()
            )));
        }

        let (fixed_states, generated_states) = children.split_at(self.fixed);
        let fixed: Vec<Element> = self.children().into_iter().take(self.fixed).collect();
        for (child, state) in fixed.iter().zip(fixed_states) {
            if !child.get_state().same_shape(state) {
                return Err(FormError::State(format!(
                    "saved state does not fit '{}'",
                    child.key()
                )));
            }
        }

        let mut rebuilt = Vec::with_capacity(generated_states.len());
        for state in generated_states {
            let child = Element::build(&self.template, &self.ctx)?;
            child.set_state(state)?;
            rebuilt.push(child);
        }

        for slot in self.generated_slots() {
            self.remove_element(slot)?;
        }
        for child in rebuilt {
            self.attach(child);
        }
        for (child, state) in fixed.iter().zip(fixed_states) {
            child.set_state(state)?;
        }
        self.container.restore_collapsed(*collapsed)
    }
}

impl std::fmt::Debug for Multi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multi")
            .field("key", &self.core().key())
            .field("slots", &self.slots())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn multi(raw: Value) -> Arc<Multi> {
        match Element::from_json(raw).unwrap() {
            Element::Multi(multi) => multi,
            other => panic!("expected multi, got {other:?}"),
        }
    }

    fn file_multi() -> Arc<Multi> {
        multi(json!({
            "type": "multi",
            "id": "inputs",
            "template": {"type": "file", "label": "Input"}
        }))
    }

    #[test]
    fn add_and_remove_by_slot() {
        let multi = file_multi();
        let added = Arc::new(Mutex::new(Vec::new()));
        let removed = Arc::new(Mutex::new(Vec::new()));
        let added_clone = added.clone();
        let removed_clone = removed.clone();
        multi.element_added.register(move |slot: &usize| added_clone.lock().push(*slot));
        multi.element_removed.register(move |slot: &usize| removed_clone.lock().push(*slot));

        assert_eq!(multi.add_element(None).unwrap(), 0);
        assert_eq!(multi.add_element(None).unwrap(), 1);
        let first = multi.remove_element(0).unwrap();

        assert!(first.core().is_detached());
        assert_eq!(multi.slots(), vec![1]);
        assert_eq!(*added.lock(), vec![0, 1]);
        assert_eq!(*removed.lock(), vec![0]);
    }

    #[test]
    fn removing_unknown_slot_fails() {
        let multi = file_multi();
        assert!(matches!(multi.remove_element(3), Err(FormError::UnknownSlot(3))));
    }

    #[test]
    fn overrides_merge_into_template() {
        let multi = file_multi();
        let slot = multi
            .add_element(Some(json!({"label": "Second", "defaultValue": "/tmp/x"})))
            .unwrap();
        let child = multi.child(slot).unwrap();
        assert_eq!(child.label(), Some("Second"));
        assert_eq!(child.as_primitive().unwrap().value(), json!("/tmp/x"));
    }

    #[test]
    fn count_prebuilds_children() {
        let multi = multi(json!({
            "type": "multi",
            "count": 2,
            "template": {"type": "text"}
        }));
        assert_eq!(multi.slots(), vec![0, 1]);
    }

    #[test]
    fn missing_template_is_a_config_error() {
        assert!(Element::from_json(json!({"type": "multi", "template": 3})).is_err());
    }

    #[test]
    fn state_rebuilds_children() {
        let multi = file_multi();
        let slot = multi.add_element(None).unwrap();
        multi.child(slot).unwrap().as_primitive().unwrap().set_value("/a").unwrap();
        multi.add_element(None).unwrap();
        let saved = multi.get_state();

        let restored = file_multi();
        restored.add_element(None).unwrap();
        restored.set_state(&saved).unwrap();

        assert_eq!(restored.get_state(), saved);
        assert_eq!(restored.len(), 2);
    }

    fn labelled_multi() -> Arc<Multi> {
        multi(json!({
            "type": "multi",
            "elements": [{"type": "label", "label": "Rows"}],
            "template": {"type": "text"}
        }))
    }

    #[test]
    fn fixed_children_survive_state_round_trip() {
        let multi = labelled_multi();
        let slot = multi.add_element(None).unwrap();
        multi.child(slot).unwrap().as_primitive().unwrap().set_value("x").unwrap();
        let saved = multi.get_state();

        multi.set_state(&saved).unwrap();

        assert_eq!(multi.get_state(), saved);
        assert_eq!(multi.len(), 2);
        assert!(matches!(multi.children()[0], Element::Label(_)));
    }

    #[test]
    fn mismatched_state_leaves_children_in_place() {
        let multi = labelled_multi();
        multi.add_element(None).unwrap();
        let before = multi.get_state();

        let wrong = ElementState::Multi {
            collapsed: false,
            children: vec![
                ElementState::Primitive { value: json!("x"), hidden: false },
                ElementState::Static,
            ],
        };
        assert!(matches!(multi.set_state(&wrong), Err(FormError::State(_))));
        assert_eq!(multi.get_state(), before);

        let bad_row = ElementState::Multi {
            collapsed: false,
            children: vec![ElementState::Static, ElementState::Static],
        };
        assert!(multi.set_state(&bad_row).is_err());
        assert_eq!(multi.get_state(), before);
    }

    #[test]
    fn fixed_children_cannot_be_removed() {
        let multi = labelled_multi();
        assert!(matches!(multi.remove_element(0), Err(FormError::Interaction(_))));
        assert_eq!(multi.len(), 1);
        assert!(multi.generated_slots().is_empty());
    }
}
