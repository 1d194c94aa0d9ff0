//! Background Execution
//!
//! A submitted form hands its argument map to a target computation that
//! runs on its own thread.
//!
//! # How a Run Works
//!
//! 1. The form resolves `targetScript` in its [`TargetRegistry`] and builds an
//!    [`Executor`] around the target and the collected [`Arguments`].
//! 2. [`Executor::start`] spawns a thread named `trellis-run-<id>` and installs
//!    the run's [`LogManager`] layer as that thread's subscriber.
//! 3. The target runs under `catch_unwind`. Returned errors and panics alike
//!    become a failed [`RunOutcome`] carrying the error text and its causes.
//! 4. `finished` fires on the worker thread, then joiners are released.
//!
//! # Thread Safety
//!
//! Each run's log is isolated by thread: the layer ignores events from any
//! thread other than the run's own. Two concurrent runs need two managers;
//! every executor creates its own.

mod executor;
mod log_manager;

use indexmap::IndexMap;
use serde_json::Value;

pub use executor::{target_fn, Executor, RunOutcome, RunState, TargetError, TargetFn, TargetRegistry};
pub use log_manager::{FileSink, LogManager, LogRecord, LogSink, MemorySink, RunLogLayer};

/// `{args_id: value}` in element order.
pub type Arguments = IndexMap<String, Value>;
