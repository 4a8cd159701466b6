//! Background action dispatcher.
//!
//! Front ends (the daemon loop, a tray, a signal handler) send `Action`s
//! over a channel and receive an `ActionOutcome` for each one. Long-running
//! work runs on its own task so the loop keeps accepting input.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::pipeline::{Pipeline, RunOutcome};

/// User-triggerable operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Login,
    Logout,
    GenerateDigest,
    ViewLastDigest,
    ReloadConfig,
    Shutdown,
}

/// Completion report for one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Completed { action: Action, detail: String },
    Failed { action: Action, error: String },
    /// Refused without running, e.g. a digest run already in progress.
    Rejected { action: Action, reason: String },
}

impl ActionOutcome {
    pub fn action(&self) -> Action {
        match self {
            Self::Completed { action, .. }
            | Self::Failed { action, .. }
            | Self::Rejected { action, .. } => *action,
        }
    }
}

type Opener = Arc<dyn Fn(&Path) -> std::io::Result<()> + Send + Sync>;

/// Serializes user actions against one pipeline.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    config_path: PathBuf,
    cancel: CancellationToken,
    outcomes: mpsc::UnboundedSender<ActionOutcome>,
    digest_busy: Arc<AtomicBool>,
    login_busy: Arc<AtomicBool>,
    opener: Opener,
}

/// Clears a busy flag when a run ends, even by panic or abort.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    /// Set `flag`, or `None` when another run already holds it.
    fn claim(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Dispatcher {
    pub fn new(
        pipeline: Arc<Pipeline>,
        config_path: PathBuf,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<ActionOutcome>) {
        let (outcomes, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            pipeline,
            config_path,
            cancel,
            outcomes,
            digest_busy: Arc::new(AtomicBool::new(false)),
            login_busy: Arc::new(AtomicBool::new(false)),
            opener: Arc::new(|path: &Path| open::that(path)),
        };
        (dispatcher, receiver)
    }

    /// Replace how digests are shown to the user.
    #[must_use]
    pub fn with_opener(
        mut self,
        opener: impl Fn(&Path) -> std::io::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.opener = Arc::new(opener);
        self
    }

    /// Process actions until `Shutdown`, channel close, or cancellation.
    ///
    /// In-flight work is cancelled and awaited before returning.
    pub async fn run(self, mut actions: mpsc::Receiver<Action>) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                action = actions.recv() => match action {
                    None | Some(Action::Shutdown) => break,
                    Some(action) => self.dispatch(action, &mut tasks),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Action task panicked");
                    }
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "Dispatcher shutting down");
        self.cancel.cancel();
        while tasks.join_next().await.is_some() {}
        self.report(ActionOutcome::Completed {
            action: Action::Shutdown,
            detail: "stopped".to_string(),
        });
    }

    fn report(&self, outcome: ActionOutcome) {
        // A closed receiver only means nobody is listening any more
        let _ = self.outcomes.send(outcome);
    }

    fn dispatch(&self, action: Action, tasks: &mut JoinSet<()>) {
        tracing::info!(?action, "Dispatching action");
        match action {
            Action::GenerateDigest => self.spawn_digest(tasks),
            Action::Login => self.spawn_login(tasks),
            Action::Logout => {
                let outcome = match self.pipeline.logout() {
                    Ok(()) => ActionOutcome::Completed {
                        action,
                        detail: "logged out".to_string(),
                    },
                    Err(e) => ActionOutcome::Failed {
                        action,
                        error: e.to_string(),
                    },
                };
                self.report(outcome);
            }
            Action::ViewLastDigest => {
                let outcome = match self.pipeline.latest_digest() {
                    Ok(path) => match (self.opener)(&path) {
                        Ok(()) => ActionOutcome::Completed {
                            action,
                            detail: path.display().to_string(),
                        },
                        Err(e) => ActionOutcome::Failed {
                            action,
                            error: format!("could not open {}: {e}", path.display()),
                        },
                    },
                    Err(e) => ActionOutcome::Failed {
                        action,
                        error: e.to_string(),
                    },
                };
                self.report(outcome);
            }
            Action::ReloadConfig => {
                let outcome = match self.pipeline.reload_config(&self.config_path) {
                    Ok(()) => ActionOutcome::Completed {
                        action,
                        detail: "configuration reloaded".to_string(),
                    },
                    Err(e) => ActionOutcome::Failed {
                        action,
                        error: e.to_string(),
                    },
                };
                self.report(outcome);
            }
            Action::Shutdown => {}
        }
    }

    fn spawn_digest(&self, tasks: &mut JoinSet<()>) {
        let action = Action::GenerateDigest;
        let Some(guard) = BusyGuard::claim(&self.digest_busy) else {
            self.report(ActionOutcome::Rejected {
                action,
                reason: "a digest run is already in progress".to_string(),
            });
            return;
        };
        let pipeline = Arc::clone(&self.pipeline);
        let cancel = self.cancel.child_token();
        let outcomes = self.outcomes.clone();

        tasks.spawn(async move {
            let _guard = guard;
            let outcome = match pipeline.generate_digest(&cancel).await {
                Ok(summary) => ActionOutcome::Completed {
                    action,
                    detail: match (summary.outcome, &summary.digest) {
                        (RunOutcome::DigestWritten, Some(path)) => path.display().to_string(),
                        (RunOutcome::NoItems, _) => "no posts scraped".to_string(),
                        _ => "no relevant posts".to_string(),
                    },
                },
                Err(e) => ActionOutcome::Failed {
                    action,
                    error: e.to_string(),
                },
            };
            let _ = outcomes.send(outcome);
        });
    }

    fn spawn_login(&self, tasks: &mut JoinSet<()>) {
        let action = Action::Login;
        let Some(guard) = BusyGuard::claim(&self.login_busy) else {
            self.report(ActionOutcome::Rejected {
                action,
                reason: "a login window is already open".to_string(),
            });
            return;
        };
        let pipeline = Arc::clone(&self.pipeline);
        let cancel = self.cancel.child_token();
        let outcomes = self.outcomes.clone();

        tasks.spawn(async move {
            let _guard = guard;
            let outcome = match pipeline.login(&cancel).await {
                Ok(bundle) => ActionOutcome::Completed {
                    action,
                    detail: match bundle.expires_at {
                        Some(at) => format!("logged in until {at}"),
                        None => "logged in".to_string(),
                    },
                },
                Err(e) => ActionOutcome::Failed {
                    action,
                    error: e.to_string(),
                },
            };
            let _ = outcomes.send(outcome);
        });
    }
}
