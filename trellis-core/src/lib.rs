//! Trellis Core
//!
//! This crate provides the runtime behind Trellis declarative forms.
//! It implements:
//!
//! - Communicators: isolated fan-out callbacks every element publishes through
//! - Background validation with at most one run in flight per element
//! - The element tree: primitives, groups, containers, multis
//! - Declarative signal wiring between elements
//! - Submission of collected arguments to a computation on a worker thread,
//!   with per-run log capture
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: the `Communicator` dispatch primitive
//! - `validation`: the `Validator` runner and its strategies
//! - `config`: typed JSON configuration
//! - `elements`: element kinds and their state machines
//! - `signals`: parsing and binding of inter-element signals
//! - `form`: the form, argument collection and submission
//! - `execution`: the executor and run logging
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::form::FormBuilder;
//! use serde_json::json;
//!
//! let form = FormBuilder::from_value(json!({
//!     "modelName": "Sediment retention",
//!     "targetScript": "sdr.execute",
//!     "elements": [
//!         {"type": "checkbox", "id": "advanced", "signals": ["enables:threshold"]},
//!         {"type": "text", "id": "threshold", "args_id": "threshold",
//!          "validateAs": {"type": "number", "gteq": 0}}
//!     ]
//! }))?
//! .target("sdr.execute", |args| {
//!     println!("running with {args:?}");
//!     Ok(())
//! })
//! .build()?;
//!
//! form.primitive("advanced")?.set_value(true)?;
//! form.primitive("threshold")?.set_value("1000")?;
//!
//! let run = form.submit()?;
//! let outcome = run.join();
//! ```

pub mod config;
pub mod elements;
pub mod error;
pub mod execution;
pub mod form;
pub mod reactive;
pub mod signals;
pub mod validation;

pub use elements::{Element, ElementState, SignalName, SignalPayload};
pub use error::{ConfigError, FormError, Result, ValidationError};
pub use execution::{Arguments, Executor, RunOutcome};
pub use form::{Form, FormBuilder, FormState};
pub use reactive::Communicator;
