//! Validation strategies and the registry that maps kinds to them.
//!
//! The builtin set covers generic checks. Format-aware checks for vector and
//! raster data are outside this crate: the builtin versions only verify that
//! the path exists, and a host replaces them through
//! [`StrategyRegistry::install`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;

use super::{ValidationParams, ValidatorKind};
use crate::error::{ConfigError, ValidationError};

/// A named validation check.
///
/// Return [`ValidationError::Invalid`] for input the user should correct and
/// [`ValidationError::Internal`] when the check itself cannot run.
pub trait ValidationStrategy: Send + Sync {
    fn validate(&self, value: &Value, params: &ValidationParams) -> Result<(), ValidationError>;
}

/// Kind → strategy lookup table.
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<ValidatorKind, Arc<dyn ValidationStrategy>>,
}

impl StrategyRegistry {
    /// A registry holding the builtin strategy for every kind.
    pub fn builtin() -> Self {
        let mut strategies: HashMap<ValidatorKind, Arc<dyn ValidationStrategy>> = HashMap::new();
        strategies.insert(ValidatorKind::Disabled, Arc::new(Disabled));
        strategies.insert(ValidatorKind::String, Arc::new(Pattern::default()));
        strategies.insert(ValidatorKind::Number, Arc::new(NumberRange));
        strategies.insert(ValidatorKind::File, Arc::new(FileExists));
        strategies.insert(ValidatorKind::Folder, Arc::new(FolderExists));
        strategies.insert(ValidatorKind::Csv, Arc::new(CsvFields));
        strategies.insert(ValidatorKind::Vector, Arc::new(PathExists));
        strategies.insert(ValidatorKind::Raster, Arc::new(PathExists));
        Self { strategies }
    }

    /// Replace the strategy used for `kind`.
    pub fn install(&mut self, kind: ValidatorKind, strategy: Arc<dyn ValidationStrategy>) {
        self.strategies.insert(kind, strategy);
    }

    pub fn get(&self, kind: ValidatorKind) -> Arc<dyn ValidationStrategy> {
        self.strategies
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(Disabled))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.strategies.keys().map(ToString::to_string).collect();
        kinds.sort();
        f.debug_struct("StrategyRegistry").field("kinds", &kinds).finish()
    }
}

// ----------------------------------------------------------------------------
// Builtin strategies
// ----------------------------------------------------------------------------

struct Disabled;

impl ValidationStrategy for Disabled {
    fn validate(&self, _: &Value, _: &ValidationParams) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// `pattern`, either top-level or under `allowedValues`, must match the whole
/// string. Compiled patterns are cached by source text.
#[derive(Default)]
struct Pattern {
    compiled: DashMap<String, Regex>,
}

impl Pattern {
    fn regex(&self, pattern: &str) -> Result<Regex, ConfigError> {
        if let Some(regex) = self.compiled.get(pattern) {
            return Ok(regex.value().clone());
        }
        let regex = compile_pattern(pattern)?;
        self.compiled.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

impl ValidationStrategy for Pattern {
    fn validate(&self, value: &Value, params: &ValidationParams) -> Result<(), ValidationError> {
        let Some(pattern) = pattern_param(params) else {
            return Ok(());
        };
        let regex = self
            .regex(pattern)
            .map_err(|err| ValidationError::internal(err.to_string()))?;
        let text = display_text(value);
        if regex.is_match(&text) {
            Ok(())
        } else {
            Err(ValidationError::invalid(format!(
                "value '{text}' must match pattern '{pattern}'"
            )))
        }
    }
}

/// Anchored form of `pattern`.
fn compile_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|err| ConfigError::Pattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })
}

/// Reject a `pattern` parameter that does not compile.
pub(crate) fn check_pattern(params: &ValidationParams) -> Result<(), ConfigError> {
    match pattern_param(params) {
        Some(pattern) => compile_pattern(pattern).map(|_| ()),
        None => Ok(()),
    }
}

fn pattern_param(params: &ValidationParams) -> Option<&str> {
    params
        .get("pattern")
        .or_else(|| params.get("allowedValues").and_then(|allowed| allowed.get("pattern")))
        .and_then(Value::as_str)
}

struct NumberRange;

impl ValidationStrategy for NumberRange {
    fn validate(&self, value: &Value, params: &ValidationParams) -> Result<(), ValidationError> {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            ValidationError::invalid(format!("'{}' could not be interpreted as a number", display_text(value)))
        })?;

        let bound = |key: &str| params.get(key).and_then(Value::as_f64);
        if let Some(limit) = bound("gteq") {
            if number < limit {
                return Err(ValidationError::invalid(format!("value must be >= {limit}")));
            }
        }
        if let Some(limit) = bound("gt") {
            if number <= limit {
                return Err(ValidationError::invalid(format!("value must be > {limit}")));
            }
        }
        if let Some(limit) = bound("lteq") {
            if number > limit {
                return Err(ValidationError::invalid(format!("value must be <= {limit}")));
            }
        }
        if let Some(limit) = bound("lt") {
            if number >= limit {
                return Err(ValidationError::invalid(format!("value must be < {limit}")));
            }
        }
        Ok(())
    }
}

fn must_exist(params: &ValidationParams, default: bool) -> bool {
    params
        .get("mustExist")
        .or_else(|| params.get("must_exist"))
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

fn path_of(value: &Value) -> Result<&Path, ValidationError> {
    value
        .as_str()
        .map(Path::new)
        .ok_or_else(|| ValidationError::invalid("expected a path"))
}

struct FileExists;

impl ValidationStrategy for FileExists {
    fn validate(&self, value: &Value, params: &ValidationParams) -> Result<(), ValidationError> {
        let path = path_of(value)?;
        if path.is_file() {
            return Ok(());
        }
        if path.exists() {
            return Err(ValidationError::invalid(format!("{} is not a file", path.display())));
        }
        if must_exist(params, true) {
            return Err(ValidationError::invalid(format!("file not found: {}", path.display())));
        }
        Ok(())
    }
}

/// Folders default to optional existence: a missing folder is usually an
/// output workspace that will be created.
struct FolderExists;

impl ValidationStrategy for FolderExists {
    fn validate(&self, value: &Value, params: &ValidationParams) -> Result<(), ValidationError> {
        let path = path_of(value)?;
        if path.is_dir() {
            return Ok(());
        }
        if path.exists() {
            return Err(ValidationError::invalid(format!("{} is not a folder", path.display())));
        }
        if must_exist(params, false) {
            return Err(ValidationError::invalid(format!("folder not found: {}", path.display())));
        }
        Ok(())
    }
}

/// Header check: every name in `fieldsExist` must appear in the first line,
/// compared case-insensitively.
struct CsvFields;

impl ValidationStrategy for CsvFields {
    fn validate(&self, value: &Value, params: &ValidationParams) -> Result<(), ValidationError> {
        FileExists.validate(value, params)?;
        let path = path_of(value)?;

        let file = File::open(path)
            .map_err(|err| ValidationError::invalid(format!("could not open {}: {err}", path.display())))?;
        let mut header = String::new();
        BufReader::new(file)
            .read_line(&mut header)
            .map_err(|err| ValidationError::invalid(format!("could not read {}: {err}", path.display())))?;

        let columns: Vec<String> = header
            .trim_start_matches('\u{feff}')
            .split(',')
            .map(|column| column.trim().trim_matches('"').to_lowercase())
            .filter(|column| !column.is_empty())
            .collect();
        if columns.is_empty() {
            return Err(ValidationError::invalid(format!("{} has no header row", path.display())));
        }

        let required = params
            .get("fieldsExist")
            .or_else(|| params.get("fields_exist"))
            .and_then(Value::as_array);
        let missing: Vec<&str> = required
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .filter(|field| !columns.contains(&field.to_lowercase()))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::invalid(format!(
                "missing fields: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Datasets may be single files or directories (e.g. multi-file formats).
struct PathExists;

impl ValidationStrategy for PathExists {
    fn validate(&self, value: &Value, _: &ValidationParams) -> Result<(), ValidationError> {
        let path = path_of(value)?;
        if path.exists() {
            Ok(())
        } else {
            Err(ValidationError::invalid(format!("dataset not found: {}", path.display())))
        }
    }
}

fn display_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
