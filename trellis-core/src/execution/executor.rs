use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::subscriber::Interest;
use tracing::{Dispatch, Event, Level, Metadata, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

use super::log_manager::{LogManager, LogSink, MemorySink};
use super::Arguments;
use crate::error::{FormError, Result};
use crate::reactive::{panic_message, Communicator};

/// Global counter for run ids; also names the worker threads.
static RUN_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub type TargetError = Box<dyn std::error::Error + Send + Sync>;

/// The computation a form submits: `execute(args)`.
pub type TargetFn = Arc<dyn Fn(&Arguments) -> std::result::Result<(), TargetError> + Send + Sync>;

/// Wrap a closure as a [`TargetFn`].
pub fn target_fn<F>(target: F) -> TargetFn
where
    F: Fn(&Arguments) -> std::result::Result<(), TargetError> + Send + Sync + 'static,
{
    Arc::new(target)
}

/// Computations reachable through a form's `targetScript`.
#[derive(Clone, Default)]
pub struct TargetRegistry {
    targets: Arc<DashMap<String, TargetFn>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, target: F)
    where
        F: Fn(&Arguments) -> std::result::Result<(), TargetError> + Send + Sync + 'static,
    {
        self.targets.insert(name.into(), target_fn(target));
    }

    pub fn get(&self, name: &str) -> Option<TargetFn> {
        self.targets.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }
}

impl fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.targets.iter().map(|entry| entry.key().clone()).collect();
        f.debug_struct("TargetRegistry").field("names", &names).finish()
    }
}

/// Payload of [`Executor::finished`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub thread_name: String,
    pub thread_failed: bool,
    /// The error's own message.
    pub exception: Option<String>,
    /// The error and its chain of causes, one per line.
    pub traceback: Option<String>,
    /// WARN-and-above records captured during the run.
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Idle,
    Running,
    Finished(RunOutcome),
}

struct ExecutorInner {
    id: u64,
    thread_name: String,
    target: TargetFn,
    args: Arguments,
    log: LogManager,
    state: Mutex<RunState>,
    /// Set once `finished` callbacks have returned.
    settled: AtomicBool,
    done: Condvar,
}

/// Runs one target on a dedicated thread.
///
/// ```text
/// Idle ──start()──► Running ──target returns──► Finished(outcome)
/// ```
///
/// Errors and panics raised by the target never reach the caller of
/// [`start`](Executor::start); they are reported only through `finished`
/// and the final [`RunState`].
///
/// The state is `Finished` before `finished` fires, so its callbacks see
/// the outcome and may start another run. Joiners are released after the
/// callbacks return.
///
/// Events from the worker thread go to the run's [`LogManager`] and are
/// also forwarded to the subscriber that was current when the run started.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,

    /// Emitted on the worker thread once the run has finished, before
    /// [`join`](Executor::join) returns.
    pub finished: Communicator<RunOutcome>,
}

impl Executor {
    /// An executor logging INFO and above to memory.
    pub fn new(target: TargetFn, args: Arguments) -> Self {
        Self::with_log(target, args, Arc::new(MemorySink::new()), Level::INFO)
    }

    pub fn with_log(target: TargetFn, args: Arguments, sink: Arc<dyn LogSink>, level: Level) -> Self {
        let id = RUN_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
        let thread_name = format!("trellis-run-{id}");
        let log = LogManager::new(thread_name.clone(), sink, level);

        Self {
            inner: Arc::new(ExecutorInner {
                id,
                thread_name,
                target,
                args,
                log,
                state: Mutex::new(RunState::Idle),
                settled: AtomicBool::new(false),
                done: Condvar::new(),
            }),
            finished: Communicator::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn thread_name(&self) -> &str {
        &self.inner.thread_name
    }

    pub fn arguments(&self) -> &Arguments {
        &self.inner.args
    }

    pub fn log(&self) -> &LogManager {
        &self.inner.log
    }

    /// Spawn the worker thread. An executor runs at most once.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != RunState::Idle {
                return Err(FormError::AlreadyRunning);
            }
            *state = RunState::Running;
        }

        tracing::info!(run = self.inner.id, thread = %self.inner.thread_name, "starting run");
        let host = tracing::dispatcher::get_default(Dispatch::clone);
        let executor = self.clone();
        let spawned = thread::Builder::new()
            .name(self.inner.thread_name.clone())
            .spawn(move || executor.run(host));

        if let Err(err) = spawned {
            tracing::error!(run = self.inner.id, error = %err, "could not spawn run thread");
            self.complete(RunOutcome {
                thread_name: self.inner.thread_name.clone(),
                thread_failed: true,
                exception: Some(err.to_string()),
                traceback: Some(format!("could not spawn run thread: {err}")),
                warnings: Vec::new(),
                elapsed: Duration::ZERO,
            });
        }
        Ok(())
    }

    pub fn state(&self) -> RunState {
        self.inner.state.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        *self.inner.state.lock() == RunState::Running
    }

    /// The outcome if the run has finished.
    pub fn outcome(&self) -> Option<RunOutcome> {
        match &*self.inner.state.lock() {
            RunState::Finished(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    fn on_worker(&self) -> bool {
        thread::current().name() == Some(self.inner.thread_name.as_str())
    }

    fn waiting(&self, state: &RunState) -> bool {
        *state != RunState::Idle && !self.inner.settled.load(Ordering::SeqCst)
    }

    /// Block until the run finishes and its `finished` callbacks return.
    /// Returns `None` for a run never started.
    ///
    /// Called from a `finished` callback, returns the outcome immediately.
    pub fn join(&self) -> Option<RunOutcome> {
        if self.on_worker() {
            return self.outcome();
        }
        let mut state = self.inner.state.lock();
        while self.waiting(&state) {
            self.inner.done.wait(&mut state);
        }
        match &*state {
            RunState::Finished(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Like [`join`](Self::join) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RunOutcome> {
        if self.on_worker() {
            return self.outcome();
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while self.waiting(&state) {
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                return None;
            }
        }
        match &*state {
            RunState::Finished(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    fn run(&self, host: Dispatch) {
        let started = Instant::now();
        let subscriber = Registry::default()
            .with(self.inner.log.layer())
            .with(HostForward { host });

        let result = tracing::subscriber::with_default(subscriber, || {
            tracing::info!(run = self.inner.id, args = self.inner.args.len(), "run started");
            let target = Arc::clone(&self.inner.target);
            let args = &self.inner.args;
            let result = panic::catch_unwind(AssertUnwindSafe(|| target(args)));
            match &result {
                Ok(Ok(())) => tracing::info!(run = self.inner.id, "run finished"),
                Ok(Err(err)) => tracing::error!(run = self.inner.id, error = %err, "run failed"),
                Err(_) => tracing::error!(run = self.inner.id, "run panicked"),
            }
            result
        });

        let (exception, traceback) = match result {
            Ok(Ok(())) => (None, None),
            Ok(Err(err)) => (Some(err.to_string()), Some(traceback_of(err.as_ref()))),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let traceback = format!("panicked: {message}");
                (Some(message), Some(traceback))
            }
        };

        self.complete(RunOutcome {
            thread_name: self.inner.thread_name.clone(),
            thread_failed: exception.is_some(),
            exception,
            traceback,
            warnings: self.inner.log.finish(),
            elapsed: started.elapsed(),
        });
    }

    fn complete(&self, outcome: RunOutcome) {
        *self.inner.state.lock() = RunState::Finished(outcome.clone());
        self.finished.emit(&outcome);
        let _state = self.inner.state.lock();
        self.inner.settled.store(true, Ordering::SeqCst);
        self.inner.done.notify_all();
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.inner.id)
            .field("thread_name", &self.inner.thread_name)
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

/// Re-emits run events at or above the run's log level to the host's
/// subscriber.
///
/// Spans opened on the worker stay local to the run, so forwarded events
/// arrive without span context.
struct HostForward {
    host: Dispatch,
}

impl<S: Subscriber> Layer<S> for HostForward {
    fn register_callsite(&self, _: &'static Metadata<'static>) -> Interest {
        Interest::sometimes()
    }

    fn on_event(&self, event: &Event<'_>, _: Context<'_, S>) {
        if self.host.enabled(event.metadata()) {
            self.host.event(event);
        }
    }
}

/// The error followed by each of its causes.
fn traceback_of(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = format!("Error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(&format!("\nCaused by: {cause}"));
        source = cause.source();
    }
    text
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
