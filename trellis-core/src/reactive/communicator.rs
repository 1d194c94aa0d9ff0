//! Communicator Implementation
//!
//! A Communicator is the fan-out broadcaster every element uses to publish
//! state changes. Consumers register callbacks; the producer emits a payload
//! and every registered callback receives it.
//!
//! # How Communicators Work
//!
//! 1. `register` appends an entry. The same callback handle registered twice
//!    is two entries and will be invoked twice per emission.
//!
//! 2. `emit` takes a snapshot of the entries, releases the lock, and invokes
//!    each callback in insertion order. Callbacks may therefore register or
//!    remove callbacks on the same communicator; changes apply to the next
//!    emission, never the one in progress.
//!
//! 3. Every invocation is isolated. A callback that panics does not stop the
//!    remaining callbacks; the panic is captured and can be inspected with
//!    [`Communicator::exceptions`].
//!
//! # Thread Safety
//!
//! Communicators are `Clone` and share their state across clones. Emission
//! happens on the calling thread; [`Communicator::emit_detached`] runs each
//! callback on its own thread and hands back an [`EmitHandle`] to join.

use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::error::SignalNotFound;

/// Counter for generating unique communicator IDs.
static COMMUNICATOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_communicator_id() -> u64 {
    COMMUNICATOR_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A registered callback. Identity is the allocation, so clones of the same
/// handle compare equal for [`Communicator::remove`].
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A panic captured while a callback was running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPanic {
    /// The communicator that was emitting.
    pub communicator: u64,
    /// The panic payload rendered as text.
    pub message: String,
    /// Name of the thread the callback ran on, if it had one.
    pub thread: Option<String>,
}

/// A fan-out broadcaster with isolated callback invocation.
///
/// # Example
///
/// ```rust,ignore
/// let changed = Communicator::<bool>::new();
/// let handle = changed.register(|enabled| println!("enabled: {enabled}"));
///
/// changed.emit(&true);
/// changed.remove(&handle)?;
/// ```
pub struct Communicator<T>
where
    T: Send + Sync + 'static,
{
    /// Unique identifier for this communicator.
    id: u64,

    /// Registered callbacks in insertion order.
    entries: Arc<Mutex<Vec<Callback<T>>>>,

    /// Panics captured during emission, oldest first.
    exceptions: Arc<Mutex<Vec<CallbackPanic>>>,
}

impl<T> Communicator<T>
where
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            id: next_communicator_id(),
            entries: Arc::new(Mutex::new(Vec::new())),
            exceptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Get the communicator's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Register a closure and return its handle.
    ///
    /// Keep the handle if the callback must be removed later.
    pub fn register<F>(&self, callback: F) -> Callback<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        self.register_callback(Arc::clone(&callback));
        callback
    }

    /// Register an existing handle. Registering a handle twice creates two
    /// entries.
    pub fn register_callback(&self, callback: Callback<T>) {
        self.entries.lock().push(callback);
        tracing::trace!(communicator = self.id, "callback registered");
    }

    /// Remove the first entry matching `callback`.
    pub fn remove(&self, callback: &Callback<T>) -> Result<(), SignalNotFound> {
        let mut entries = self.entries.lock();
        let position = entries.iter().position(|entry| same_callback(entry, callback));
        match position {
            Some(index) => {
                entries.remove(index);
                Ok(())
            }
            None => Err(SignalNotFound {
                communicator: self.id,
            }),
        }
    }

    /// Invoke every registered callback on the current thread and return once
    /// all of them completed.
    pub fn emit(&self, payload: &T) {
        let snapshot = self.snapshot();
        for callback in snapshot {
            self.invoke(&callback, payload);
        }
    }

    /// Invoke every registered callback on its own thread.
    ///
    /// The returned handle may be dropped to fire and continue, or joined to
    /// wait for all callbacks.
    pub fn emit_detached(&self, payload: T) -> EmitHandle {
        let payload = Arc::new(payload);
        let handles = self
            .snapshot()
            .into_iter()
            .map(|callback| {
                let payload = Arc::clone(&payload);
                let this = self.clone();
                thread::spawn(move || this.invoke(&callback, &payload))
            })
            .collect();
        EmitHandle { handles }
    }

    /// Panics captured by previous emissions.
    pub fn exceptions(&self) -> Vec<CallbackPanic> {
        self.exceptions.lock().clone()
    }

    /// Drop all captured panics.
    pub fn clear_exceptions(&self) {
        self.exceptions.lock().clear();
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Callback<T>> {
        self.entries.lock().clone()
    }

    fn invoke(&self, callback: &Callback<T>, payload: &T) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(payload)));
        if let Err(panic_payload) = outcome {
            let captured = CallbackPanic {
                communicator: self.id,
                message: panic_message(panic_payload.as_ref()),
                thread: thread::current().name().map(str::to_owned),
            };
            tracing::debug!(
                communicator = self.id,
                message = %captured.message,
                "callback panicked during emission"
            );
            self.exceptions.lock().push(captured);
        }
    }
}

impl<T> Default for Communicator<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Communicator<T>
where
    T: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            entries: Arc::clone(&self.entries),
            exceptions: Arc::clone(&self.exceptions),
        }
    }
}

impl<T> Debug for Communicator<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("id", &self.id)
            .field("callbacks", &self.len())
            .field("exceptions", &self.exceptions.lock().len())
            .finish()
    }
}

/// Join handle for a detached emission.
#[derive(Debug)]
pub struct EmitHandle {
    handles: Vec<JoinHandle<()>>,
}

impl EmitHandle {
    /// Block until every callback of the emission has returned.
    pub fn join(self) {
        for handle in self.handles {
            // Callback panics are already caught inside `invoke`.
            let _ = handle.join();
        }
    }

    /// Number of callbacks started by the emission.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

fn same_callback<T>(a: &Callback<T>, b: &Callback<T>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Render a panic payload. Panics carry either `&str` or `String`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn emit_reaches_every_callback() {
        let communicator = Communicator::<i32>::new();
        let total = Arc::new(AtomicI32::new(0));

        for _ in 0..3 {
            let total = total.clone();
            communicator.register(move |value| {
                total.fetch_add(*value, Ordering::SeqCst);
            });
        }

        communicator.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn duplicate_registration_is_two_entries() {
        let communicator = Communicator::<()>::new();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let handle = communicator.register(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        communicator.register_callback(handle.clone());
        assert_eq!(communicator.len(), 2);

        communicator.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Removing drops only the first match.
        communicator.remove(&handle).unwrap();
        assert_eq!(communicator.len(), 1);
        communicator.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn removing_absent_callback_fails() {
        let communicator = Communicator::<()>::new();
        let stray: Callback<()> = Arc::new(|_: &()| {});
        let err = communicator.remove(&stray).unwrap_err();
        assert_eq!(err.communicator, communicator.id());
    }

    #[test]
    fn panicking_callback_is_isolated() {
        let communicator = Communicator::<u8>::new();
        let ran = Arc::new(AtomicI32::new(0));

        communicator.register(|_| panic!("consumer exploded"));
        let ran_clone = ran.clone();
        communicator.register(move |_| {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        communicator.emit(&1);

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        let exceptions = communicator.exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].message, "consumer exploded");

        communicator.clear_exceptions();
        assert!(communicator.exceptions().is_empty());
    }

    #[test]
    fn registration_during_emission_applies_to_next_emission() {
        let communicator = Communicator::<()>::new();
        let late_calls = Arc::new(AtomicI32::new(0));

        let inner = communicator.clone();
        let late_clone = late_calls.clone();
        communicator.register(move |_| {
            let late = late_clone.clone();
            inner.register(move |_| {
                late.fetch_add(1, Ordering::SeqCst);
            });
        });

        communicator.emit(&());
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        communicator.emit(&());
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detached_emission_can_be_joined() {
        let communicator = Communicator::<i32>::new();
        let total = Arc::new(AtomicI32::new(0));
        for _ in 0..4 {
            let total = total.clone();
            communicator.register(move |value| {
                total.fetch_add(*value, Ordering::SeqCst);
            });
        }

        let handle = communicator.emit_detached(5);
        assert_eq!(handle.len(), 4);
        handle.join();
        assert_eq!(total.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn clone_shares_entries() {
        let a = Communicator::<()>::new();
        let b = a.clone();
        a.register(|_| {});
        assert_eq!(b.len(), 1);
        assert_eq!(a.id(), b.id());
    }
}
