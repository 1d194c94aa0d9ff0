//! Configuration Model
//!
//! Forms are described by a JSON document. Every node carries a `type`
//! discriminator that selects one of the element kinds in [`ElementConfig`];
//! each kind has its own strongly typed configuration struct with explicit
//! defaults.
//!
//! # Raw and typed configuration
//!
//! Elements keep both shapes. The typed struct drives behavior; the raw JSON
//! object is what the element's content hash is computed from and what
//! `config_changed` publishes. Composite children (`elements`) and multi
//! templates (`template`) stay raw until the element factory builds them.
//!
//! # Merging
//!
//! [`merge_json`] is the only merge rule in the crate: objects merge key by
//! key, recursively; any other overlay value replaces the base value.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::error::ConfigError;
use crate::signals::SignalSpec;
use crate::validation::ValidatorKind;

fn default_true() -> bool {
    true
}

/// Top-level form document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormConfig {
    /// Name of the model the form drives. Reported in form and run logs.
    #[serde(default, alias = "model_name")]
    pub model_name: Option<String>,

    #[serde(default)]
    pub label: Option<String>,

    /// Key of the computation in the form's target registry.
    #[serde(default, alias = "target_script", alias = "target")]
    pub target_script: Option<String>,

    /// Root elements, kept raw until the factory builds them.
    #[serde(default)]
    pub elements: Vec<Value>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FormConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Where a run's log goes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log file for each run. Without one, records are kept in memory.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Minimum level recorded (`trace` .. `error`). Defaults to `info`.
    #[serde(default)]
    pub level: Option<String>,
}

/// Typed configuration of one element, selected by its `type` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ElementConfig {
    #[serde(rename = "label", alias = "Label")]
    Label(LabelConfig),
    #[serde(rename = "text", alias = "Text")]
    Text(PrimitiveConfig),
    #[serde(rename = "file", alias = "File")]
    File(PrimitiveConfig),
    #[serde(rename = "folder", alias = "Folder")]
    Folder(PrimitiveConfig),
    #[serde(rename = "checkbox", alias = "CheckBox", alias = "checkBox")]
    CheckBox(PrimitiveConfig),
    #[serde(rename = "dropdown", alias = "Dropdown")]
    Dropdown(DropdownConfig),
    #[serde(rename = "group", alias = "Group")]
    Group(GroupConfig),
    #[serde(rename = "container", alias = "Container")]
    Container(ContainerConfig),
    #[serde(rename = "multi", alias = "Multi")]
    Multi(MultiConfig),
    #[serde(rename = "tab", alias = "Tab")]
    Tab(GroupConfig),
    #[serde(rename = "tabGroup", alias = "TabGroup", alias = "tabbedGroup")]
    TabGroup(GroupConfig),
}

impl ElementConfig {
    pub fn from_value(raw: &Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(raw.clone())?)
    }

    /// Options shared by every element kind.
    pub fn common(&self) -> &CommonConfig {
        match self {
            ElementConfig::Label(c) => &c.common,
            ElementConfig::Text(c)
            | ElementConfig::File(c)
            | ElementConfig::Folder(c)
            | ElementConfig::CheckBox(c) => &c.common,
            ElementConfig::Dropdown(c) => &c.primitive.common,
            ElementConfig::Group(c) | ElementConfig::Tab(c) | ElementConfig::TabGroup(c) => {
                &c.common
            }
            ElementConfig::Container(c) => &c.common,
            ElementConfig::Multi(c) => &c.container.common,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ElementConfig::Label(_) => "label",
            ElementConfig::Text(_) => "text",
            ElementConfig::File(_) => "file",
            ElementConfig::Folder(_) => "folder",
            ElementConfig::CheckBox(_) => "checkbox",
            ElementConfig::Dropdown(_) => "dropdown",
            ElementConfig::Group(_) => "group",
            ElementConfig::Container(_) => "container",
            ElementConfig::Multi(_) => "multi",
            ElementConfig::Tab(_) => "tab",
            ElementConfig::TabGroup(_) => "tabGroup",
        }
    }
}

/// Options every element understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonConfig {
    /// Configuration-time id used by signal targets.
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default, alias = "help_text")]
    pub help_text: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Key of the element's value in the submitted argument map.
    #[serde(default, rename = "args_id", alias = "argsId")]
    pub args_id: Option<String>,

    #[serde(default)]
    pub signals: SmallVec<[SignalSpec; 2]>,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            id: None,
            label: None,
            help_text: None,
            enabled: true,
            args_id: None,
            signals: SmallVec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
}

/// Options of value-holding elements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimitiveConfig {
    #[serde(flatten)]
    pub common: CommonConfig,

    #[serde(default, alias = "validate_as")]
    pub validate_as: ValidateAs,

    #[serde(default, alias = "default_value")]
    pub default_value: Option<Value>,

    #[serde(default)]
    pub returns: ReturnsConfig,

    #[serde(default)]
    pub required: bool,

    /// Hideable elements start hidden and can be toggled by the user.
    #[serde(default)]
    pub hideable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropdownConfig {
    #[serde(flatten)]
    pub primitive: PrimitiveConfig,

    #[serde(default)]
    pub options: Vec<String>,
}

/// `validateAs`: the strategy kind plus its free-form parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateAs {
    #[serde(rename = "type", default)]
    pub kind: ValidatorKind,

    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// How an element's value is returned to the computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnsConfig {
    #[serde(rename = "type", default)]
    pub kind: Option<ReturnType>,

    #[serde(default, alias = "if_empty")]
    pub if_empty: Option<ReturnPolicy>,

    #[serde(default, alias = "if_hidden")]
    pub if_hidden: Option<ReturnPolicy>,

    #[serde(default, alias = "if_disabled")]
    pub if_disabled: Option<ReturnPolicy>,

    /// Replacement values keyed by the string form of the element's value.
    #[serde(default, alias = "map_values")]
    pub map_values: Option<IndexMap<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    String,
    Ordinal,
    Number,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnPolicy {
    /// Leave the element out of the argument map.
    Pass,
    /// Include the element's value anyway.
    Return,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(flatten)]
    pub common: CommonConfig,

    #[serde(default)]
    pub elements: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(flatten)]
    pub common: CommonConfig,

    #[serde(default)]
    pub elements: Vec<Value>,

    #[serde(default)]
    pub collapsible: bool,

    /// Initial collapse state; ignored unless `collapsible`.
    #[serde(default)]
    pub collapsed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiConfig {
    #[serde(flatten)]
    pub container: ContainerConfig,

    /// Configuration every generated child is built from.
    pub template: Value,

    /// Number of children created up front.
    #[serde(default)]
    pub count: usize,
}

/// Deep-merge `overlay` into `base`.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_recurses_into_objects() {
        let mut base = json!({"label": "Rate", "validateAs": {"type": "number", "gteq": 0}});
        merge_json(&mut base, json!({"validateAs": {"lteq": 1}, "required": true}));
        assert_eq!(
            base,
            json!({
                "label": "Rate",
                "validateAs": {"type": "number", "gteq": 0, "lteq": 1},
                "required": true
            })
        );
    }

    #[test]
    fn merge_replaces_non_objects() {
        let mut base = json!({"options": ["a", "b"], "label": "x"});
        merge_json(&mut base, json!({"options": ["c"], "label": null}));
        assert_eq!(base, json!({"options": ["c"], "label": null}));
    }

    #[test]
    fn parses_tagged_primitive() {
        let raw = json!({
            "type": "text",
            "id": "rate",
            "args_id": "rate",
            "defaultValue": "7",
            "validateAs": {"type": "number", "gteq": 0},
            "returns": {"ifEmpty": "pass"},
            "signals": ["enables:other"]
        });
        let ElementConfig::Text(config) = ElementConfig::from_value(&raw).unwrap() else {
            panic!("expected a text element");
        };
        assert_eq!(config.common.id.as_deref(), Some("rate"));
        assert_eq!(config.common.args_id.as_deref(), Some("rate"));
        assert!(config.common.enabled);
        assert_eq!(config.default_value, Some(json!("7")));
        assert_eq!(config.validate_as.kind, ValidatorKind::Number);
        assert_eq!(config.validate_as.params.get("gteq"), Some(&json!(0)));
        assert_eq!(config.returns.if_empty, Some(ReturnPolicy::Pass));
        assert_eq!(config.common.signals.len(), 1);
    }

    #[test]
    fn parses_dropdown_and_multi() {
        let dropdown = ElementConfig::from_value(&json!({
            "type": "Dropdown",
            "options": ["a", "b", "c"],
            "returns": {"type": "ordinal"}
        }))
        .unwrap();
        let ElementConfig::Dropdown(dropdown) = dropdown else {
            panic!("expected dropdown");
        };
        assert_eq!(dropdown.options, vec!["a", "b", "c"]);
        assert_eq!(dropdown.primitive.returns.kind, Some(ReturnType::Ordinal));

        let multi = ElementConfig::from_value(&json!({
            "type": "multi",
            "collapsible": true,
            "template": {"type": "file", "label": "Input"}
        }))
        .unwrap();
        assert_eq!(multi.type_name(), "multi");
        let ElementConfig::Multi(multi) = multi else {
            panic!("expected multi");
        };
        assert!(multi.container.collapsible);
        assert_eq!(multi.count, 0);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = ElementConfig::from_value(&json!({"type": "slider"})).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn form_config_accepts_both_spellings() {
        let config = FormConfig::from_json(
            r#"{"modelName": "carbon", "target_script": "carbon.execute", "elements": []}"#,
        )
        .unwrap();
        assert_eq!(config.model_name.as_deref(), Some("carbon"));
        assert_eq!(config.target_script.as_deref(), Some("carbon.execute"));
        assert!(config.logging.file.is_none());
    }
}
