//! State shared by every element kind.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use sha2::{Digest, Sha256};
use smallvec::SmallVec;

use crate::config::{merge_json, CommonConfig};
use crate::reactive::Communicator;
use crate::signals::SignalSpec;

#[derive(Debug, Clone, Copy)]
struct Flags {
    enabled: bool,
    visible: bool,
}

/// Identity, interactivity flags and the base communicators.
///
/// The stored `enabled` flag is the element's enabled *intent*; the
/// effective state reported by [`is_enabled`](ElementCore::is_enabled) is
/// additionally gated on visibility.
pub struct ElementCore {
    uid: String,
    config_id: Option<String>,
    label: Option<String>,
    args_id: Option<String>,
    signals: SmallVec<[SignalSpec; 2]>,
    raw: RwLock<Value>,
    flags: Mutex<Flags>,
    detached: AtomicBool,

    pub config_changed: Communicator<Value>,
    pub interactivity_changed: Communicator<bool>,
    pub visibility_changed: Communicator<bool>,
}

impl ElementCore {
    pub(crate) fn new(common: &CommonConfig, raw: Value) -> Self {
        Self {
            uid: content_hash(&raw),
            config_id: common.id.clone(),
            label: common.label.clone(),
            args_id: common.args_id.clone(),
            signals: common.signals.clone(),
            raw: RwLock::new(raw),
            flags: Mutex::new(Flags {
                enabled: common.enabled,
                visible: true,
            }),
            detached: AtomicBool::new(false),
            config_changed: Communicator::new(),
            interactivity_changed: Communicator::new(),
            visibility_changed: Communicator::new(),
        }
    }

    /// Content hash of the configuration the element was built from.
    ///
    /// Computed once at construction; config patches and validation never
    /// change it.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// The `id` given in configuration, if any.
    pub fn config_id(&self) -> Option<&str> {
        self.config_id.as_deref()
    }

    /// Configured id, falling back to the content hash.
    pub fn key(&self) -> &str {
        self.config_id.as_deref().unwrap_or(&self.uid)
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn args_id(&self) -> Option<&str> {
        self.args_id.as_deref()
    }

    pub fn signals(&self) -> &[SignalSpec] {
        &self.signals
    }

    /// Snapshot of the raw configuration.
    pub fn config(&self) -> Value {
        self.raw.read().clone()
    }

    /// Merge `patch` into the raw configuration and publish the result.
    pub fn update_config(&self, patch: Value) {
        let updated = {
            let mut raw = self.raw.write();
            merge_json(&mut raw, patch);
            raw.clone()
        };
        self.config_changed.emit(&updated);
    }

    /// Effective enablement: stored intent and visible.
    pub fn is_enabled(&self) -> bool {
        let flags = self.flags.lock();
        flags.enabled && flags.visible
    }

    /// The stored enabled intent, regardless of visibility.
    pub fn enabled_intent(&self) -> bool {
        self.flags.lock().enabled
    }

    pub fn is_visible(&self) -> bool {
        self.flags.lock().visible
    }

    /// Store the enabled intent. Returns whether it changed.
    pub(crate) fn store_enabled(&self, enabled: bool) -> bool {
        let mut flags = self.flags.lock();
        let changed = flags.enabled != enabled;
        flags.enabled = enabled;
        changed
    }

    /// Store visibility. Returns `(visibility changed, effective enablement
    /// changed)`.
    pub(crate) fn store_visible(&self, visible: bool) -> (bool, bool) {
        let mut flags = self.flags.lock();
        let was_enabled = flags.enabled && flags.visible;
        let changed = flags.visible != visible;
        flags.visible = visible;
        (changed, was_enabled != (flags.enabled && flags.visible))
    }

    /// Apply an enabled intent and emit `interactivity_changed` on change.
    pub(crate) fn apply_enabled(&self, enabled: bool) -> bool {
        let changed = self.store_enabled(enabled);
        if changed {
            self.interactivity_changed.emit(&self.is_enabled());
        }
        changed
    }

    /// Apply visibility, emitting `visibility_changed` and, when hiding or
    /// showing flips effective enablement, `interactivity_changed`.
    pub(crate) fn apply_visible(&self, visible: bool) -> bool {
        let (changed, interactivity) = self.store_visible(visible);
        if changed {
            self.visibility_changed.emit(&visible);
        }
        if interactivity {
            self.interactivity_changed.emit(&self.is_enabled());
        }
        changed
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    /// Whether the element was removed from its parent.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ElementCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flags = *self.flags.lock();
        f.debug_struct("ElementCore")
            .field("key", &self.key())
            .field("enabled", &flags.enabled)
            .field("visible", &flags.visible)
            .finish()
    }
}

/// Hex SHA-256 of the canonical JSON form. `serde_json` maps keep keys
/// sorted, so equal configurations hash equally regardless of key order.
fn content_hash(raw: &Value) -> String {
    let canonical = serde_json::to_vec(raw).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn core(raw: Value) -> ElementCore {
        ElementCore::new(&CommonConfig::default(), raw)
    }

    #[test]
    fn uid_ignores_key_order() {
        let a = core(json!({"type": "text", "label": "x"}));
        let b = core(json!({"label": "x", "type": "text"}));
        assert_eq!(a.uid(), b.uid());
        assert_eq!(a.uid().len(), 64);
    }

    #[test]
    fn uid_survives_config_patch() {
        let element = core(json!({"type": "text", "label": "x"}));
        let before = element.uid().to_string();
        element.update_config(json!({"label": "y"}));
        assert_eq!(element.uid(), before);
        assert_eq!(element.config()["label"], json!("y"));
    }

    #[test]
    fn hidden_element_reads_disabled() {
        let element = core(json!({}));
        assert!(element.is_enabled());

        element.apply_visible(false);
        assert!(!element.is_enabled());
        assert!(element.enabled_intent());

        element.apply_visible(true);
        assert!(element.is_enabled());
    }

    #[test]
    fn apply_enabled_emits_only_on_change() {
        let element = core(json!({}));
        let emitted = Arc::new(AtomicI32::new(0));
        let emitted_clone = emitted.clone();
        element.interactivity_changed.register(move |_: &bool| {
            emitted_clone.fetch_add(1, Ordering::SeqCst);
        });

        element.apply_enabled(false);
        element.apply_enabled(false);
        assert_eq!(emitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn config_patch_is_published() {
        let element = core(json!({"label": "a"}));
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        element.config_changed.register(move |config: &Value| {
            *seen_clone.lock() = Some(config.clone());
        });
        element.update_config(json!({"helpText": "more"}));
        assert_eq!(
            seen.lock().clone(),
            Some(json!({"label": "a", "helpText": "more"}))
        );
    }
}
