use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::dispatcher::ModuleDispatcher;
use crate::error::EngineError;
use crate::reference::ModuleReference;

// best-effort recompile callback, invoked once per affected document after a drain cycle
// produces useful work; failures are logged and swallowed
#[async_trait::async_trait]
pub trait CompilationManager: Send + Sync {
    // used to dedupe notification targets across drain cycles
    fn id(&self) -> u64;
    async fn refresh(&self, document_uri: &str) -> Result<(), EngineError>;
}

struct QueueItem {
    compilation_manager: Arc<dyn CompilationManager>,
    document_uri: String,
    references: Vec<ModuleReference>,
}

struct State {
    queue: VecDeque<QueueItem>,
    woken: bool,
}

// producer/consumer queue for restore requests from editor sessions; coalesces overlapping
// enqueues between drains and notifies listeners once per drain, not once per request
pub struct RestoreScheduler {
    dispatcher: Arc<ModuleDispatcher>,
    state: Mutex<State>,
    wake: Notify,
    cancelled: AtomicBool,
    disposed: AtomicBool,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl RestoreScheduler {
    pub fn new(dispatcher: Arc<ModuleDispatcher>) -> Arc<Self> {
        Arc::new(RestoreScheduler {
            dispatcher,
            state: Mutex::new(State { queue: VecDeque::new(), woken: false }),
            wake: Notify::new(),
            cancelled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            consumer: Mutex::new(None),
        })
    }

    pub fn request_restore(
        &self,
        compilation_manager: Arc<dyn CompilationManager>,
        document_uri: String,
        references: Vec<ModuleReference>,
    ) -> Result<(), EngineError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::AlreadyDisposed);
        }
        {
            let mut state = self.state.lock().unwrap();
            state.queue.push_back(QueueItem { compilation_manager, document_uri, references });
            state.woken = true;
        }
        self.wake.notify_one();
        Ok(())
    }

    // calling this twice on the same scheduler is a bug
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_consumer().await });
        *self.consumer.lock().unwrap() = Some(handle);
    }

    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
        let handle = self.consumer.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn run_consumer(self: Arc<Self>) {
        loop {
            if self.is_cancelled() {
                return;
            }

            loop {
                let notified = self.wake.notified();
                if self.state.lock().unwrap().woken {
                    break;
                }
                if self.is_cancelled() {
                    return;
                }
                notified.await;
                if self.is_cancelled() {
                    return;
                }
            }

            let (targets, references) = {
                let mut state = self.state.lock().unwrap();
                let mut targets: Vec<(Arc<dyn CompilationManager>, String)> = Vec::new();
                let mut seen: HashSet<(u64, String)> = HashSet::new();
                let mut references = Vec::new();
                for item in state.queue.drain(..) {
                    let key = (item.compilation_manager.id(), item.document_uri.clone());
                    if seen.insert(key) {
                        targets.push((item.compilation_manager.clone(), item.document_uri.clone()));
                    }
                    references.extend(item.references);
                }
                state.woken = false;
                (targets, references)
            };

            if self.is_cancelled() {
                return;
            }

            debug!("drain cycle: {} references, {} notification targets", references.len(), targets.len());
            let did_work = self.dispatcher.restore(&references).await;
            if !did_work {
                continue;
            }

            if self.is_cancelled() {
                return;
            }

            for (compilation_manager, document_uri) in targets {
                if let Err(e) = compilation_manager.refresh(&document_uri).await {
                    warn!("refresh failed for {document_uri}: {e}");
                }
            }
        }
    }
}
