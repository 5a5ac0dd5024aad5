// Load orchestration shared by every view-model
//
// Work runs on the tokio runtime; every state change funnels through one
// publication task, so observers see a strictly ordered sequence.

use crate::api::ApiError;
use crate::config::OrchestratorConfig;
use crate::state::{Presenter, State};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

enum Command<T> {
    Publish {
        run: CancellationToken,
        state: State<T>,
    },
    Subscribe(mpsc::UnboundedSender<State<T>>),
    AttachPresenter(Box<dyn Presenter<T>>),
}

// Handle a background run uses to publish into the orchestrator
struct RunPublisher<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    id: u64,
    run: CancellationToken,
}

impl<T> RunPublisher<T> {
    fn publish(&self, state: State<T>) {
        if self.run.is_cancelled() {
            return;
        }
        let _ = self.commands.send(Command::Publish {
            run: self.run.clone(),
            state,
        });
    }
}

struct ActiveRun {
    id: u64,
    token: CancellationToken,
}

// Shared with the publication task: a publication is checked and delivered
// while holding this lock, and cancellation takes it too
type RunRegistry = Arc<Mutex<Vec<ActiveRun>>>;

pub struct LoadOrchestrator<T> {
    name: &'static str,
    config: OrchestratorConfig,
    // Everything currently in flight
    runs: RunRegistry,
    next_run_id: AtomicU64,
    commands: mpsc::UnboundedSender<Command<T>>,
    slot: watch::Receiver<State<T>>,
    started_at: Arc<Mutex<Instant>>,
}

impl<T> LoadOrchestrator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates the orchestrator and spawns its publication task, so this
    /// must be called within a tokio runtime.
    pub fn new(name: &'static str) -> Self {
        Self::with_config(name, OrchestratorConfig::default())
    }

    pub fn with_config(name: &'static str, config: OrchestratorConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (slot_tx, slot) = watch::channel(State::Idle);
        let started_at = Arc::new(Mutex::new(Instant::now()));
        let runs = RunRegistry::default();

        tokio::spawn(publication_loop(
            name,
            receiver,
            slot_tx,
            runs.clone(),
            started_at.clone(),
        ));

        Self {
            name,
            config,
            runs,
            next_run_id: AtomicU64::new(0),
            commands,
            slot,
            started_at,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Latest published state.
    pub fn state(&self) -> State<T> {
        self.slot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<State<T>> {
        self.slot.clone()
    }

    /// Every transition published after this call, in order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<State<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(Command::Subscribe(tx));
        rx
    }

    /// The presenter is called from the publication task and must not call
    /// back into this orchestrator.
    pub fn attach_presenter<P: Presenter<T>>(&self, presenter: P) {
        let _ = self
            .commands
            .send(Command::AttachPresenter(Box::new(presenter)));
    }

    /// Runs that are neither finished nor cancelled.
    pub fn active_runs(&self) -> usize {
        self.runs.lock().len()
    }

    /// Cancels everything in flight. Safe to call repeatedly. Once this
    /// returns, no further state from those runs reaches any observer.
    pub fn cancel_all(&self) {
        let mut runs = self.runs.lock();
        cancel_drained(self.name, &mut runs);
    }

    /// Runs a single-valued operation: `Loaded` then `Complete`, or `Error`.
    pub fn start_single<F>(&self, operation: F)
    where
        F: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let publisher = self.begin_run();
        let fallback = self.config.error_fallback_message.clone();

        self.launch(publisher.id, publisher.run.clone(), async move {
            match operation.await {
                Ok(value) => {
                    publisher.publish(State::Loaded(value));
                    publisher.publish(State::Complete);
                }
                Err(error) => publisher.publish(State::Error(describe_failure(&error, &fallback))),
            }
        });
    }

    /// Runs a streaming operation: one `Loaded` per item, then `Complete`.
    /// The first failure publishes `Error` and ends the run.
    pub fn start_stream<S>(&self, operation: S)
    where
        S: Stream<Item = Result<T, ApiError>> + Send + 'static,
    {
        let publisher = self.begin_run();
        let fallback = self.config.error_fallback_message.clone();

        self.launch(publisher.id, publisher.run.clone(), async move {
            let mut operation = Box::pin(operation);
            while let Some(next) = operation.next().await {
                match next {
                    Ok(item) => publisher.publish(State::Loaded(item)),
                    Err(error) => {
                        publisher.publish(State::Error(describe_failure(&error, &fallback)));
                        return;
                    }
                }
            }
            publisher.publish(State::Complete);
        });
    }

    /// Runs an operation that produces no data: `Complete` or `Error` only.
    pub fn start_completable<F>(&self, operation: F)
    where
        F: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        let publisher = self.begin_run();
        let fallback = self.config.error_fallback_message.clone();

        self.launch(publisher.id, publisher.run.clone(), async move {
            match operation.await {
                Ok(()) => publisher.publish(State::Complete),
                Err(error) => publisher.publish(State::Error(describe_failure(&error, &fallback))),
            }
        });
    }

    /// Cancels running work and drives `source` without touching the state
    /// slot. Items are logged and forwarded to the returned receiver.
    pub fn relay<S>(&self, label: &'static str, source: S) -> mpsc::UnboundedReceiver<S::Item>
    where
        S: Stream + Send + 'static,
        S::Item: Debug + Send + 'static,
    {
        let (id, run) = {
            let mut runs = self.runs.lock();
            cancel_drained(self.name, &mut runs);
            self.register(&mut runs)
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let name = self.name;

        self.launch(id, run, async move {
            let mut source = Box::pin(source);
            while let Some(item) = source.next().await {
                info!(orchestrator = name, label, ?item, "relayed item");
                if tx.send(item).is_err() {
                    break;
                }
            }
        });
        rx
    }

    fn begin_run(&self) -> RunPublisher<T> {
        // Held across cancel, register and Loading so concurrent starts
        // still leave exactly one active run
        let mut runs = self.runs.lock();
        cancel_drained(self.name, &mut runs);

        let (id, run) = self.register(&mut runs);
        *self.started_at.lock() = Instant::now();
        info!(orchestrator = self.name, run = id, "starting run");

        let publisher = RunPublisher {
            commands: self.commands.clone(),
            id,
            run,
        };
        publisher.publish(State::Loading);
        publisher
    }

    fn register(&self, runs: &mut Vec<ActiveRun>) -> (u64, CancellationToken) {
        let id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        runs.push(ActiveRun {
            id,
            token: token.clone(),
        });
        (id, token)
    }

    fn launch<F>(&self, id: u64, run: CancellationToken, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = self.name;
        let runs = self.runs.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = run.cancelled() => debug!(orchestrator = name, run = id, "run cancelled"),
                _ = work => {}
            }
            runs.lock().retain(|active| active.id != id);
        });
    }
}

impl<T> Drop for LoadOrchestrator<T> {
    fn drop(&mut self) {
        cancel_drained(self.name, &mut self.runs.lock());
        debug!(orchestrator = self.name, "orchestrator disposed");
    }
}

fn cancel_drained(name: &'static str, runs: &mut Vec<ActiveRun>) {
    if runs.is_empty() {
        return;
    }
    debug!(orchestrator = name, count = runs.len(), "disposing running streams");
    for run in runs.drain(..) {
        run.token.cancel();
    }
}

fn describe_failure(error: &ApiError, fallback: &str) -> String {
    let message = error.to_string();
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

fn state_label<T>(state: &State<T>) -> &'static str {
    match state {
        State::Idle => "idle",
        State::Loading => "loading",
        State::Loaded(_) => "loaded",
        State::Complete => "complete",
        State::Error(_) => "error",
    }
}

async fn publication_loop<T: Clone + Send + 'static>(
    name: &'static str,
    mut commands: mpsc::UnboundedReceiver<Command<T>>,
    slot: watch::Sender<State<T>>,
    runs: RunRegistry,
    started_at: Arc<Mutex<Instant>>,
) {
    let mut subscribers: Vec<mpsc::UnboundedSender<State<T>>> = Vec::new();
    let mut presenter: Option<Box<dyn Presenter<T>>> = None;

    while let Some(command) = commands.recv().await {
        match command {
            Command::Publish { run, state } => {
                // Cancellation waits on this lock, so a run cancelled while
                // this was queued or mid-check is never delivered
                let _runs = runs.lock();
                if run.is_cancelled() {
                    debug!(orchestrator = name, state = state_label(&state), "dropped stale publication");
                    continue;
                }

                let elapsed_s = started_at.lock().elapsed().as_secs();
                info!(orchestrator = name, state = state_label(&state), elapsed_s, "publishing");

                subscribers.retain(|subscriber| subscriber.send(state.clone()).is_ok());
                if let Some(presenter) = presenter.as_mut() {
                    presenter.render(state.clone());
                }
                slot.send_replace(state);
            }
            Command::Subscribe(subscriber) => subscribers.push(subscriber),
            Command::AttachPresenter(attached) => presenter = Some(attached),
        }
    }

    debug!(orchestrator = name, "publication context closed");
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::state::State;
    use tokio::sync::mpsc;

    /// Collects transitions up to and including the next terminal state.
    pub async fn collect_run<T>(rx: &mut mpsc::UnboundedReceiver<State<T>>) -> Vec<State<T>> {
        let mut states = Vec::new();
        while let Some(state) = rx.recv().await {
            let terminal = state.is_terminal();
            states.push(state);
            if terminal {
                break;
            }
        }
        states
    }
}
