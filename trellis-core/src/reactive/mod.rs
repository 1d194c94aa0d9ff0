//! Reactive Primitives
//!
//! This module implements the dispatch layer every element is built on.
//!
//! # Concepts
//!
//! ## Communicators
//!
//! A Communicator is a named event source owned by an element
//! (`value_changed`, `satisfaction_changed`, ...). Consumers register
//! callbacks; when the owner's state changes it emits a payload to every
//! callback.
//!
//! ## Isolation
//!
//! Element updates cascade: one element's satisfaction enables a second,
//! whose new state enables a third. A failing consumer must not break that
//! chain, so each callback runs isolated and its panic is recorded on the
//! communicator instead of unwinding into the producer.
//!
//! # Implementation Notes
//!
//! Emission iterates a snapshot taken under a short lock. The lock is never
//! held while user callbacks run, which is what allows callbacks to register
//! and remove callbacks (or trigger further emissions) without deadlocking.

mod communicator;

pub use communicator::{Callback, CallbackPanic, Communicator, EmitHandle};
pub(crate) use communicator::panic_message;
