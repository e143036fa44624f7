//! Single task that owns the engine and runs the poll cycle.
//!
//! Each cycle schedules the next one only after it finishes, so at most one
//! cycle is ever in flight. Commands from [`SyncHandle`] are handled between
//! cycles on the same task.

use super::engine::{CycleReport, ReconciliationEngine, SearchResults, SendReceipt};
use super::view::ConversationView;
use crate::config::ClientConfig;
use crate::crypto::SessionStorage;
use crate::error::{ChatError, Result};
use crate::models::input::{EditInput, OutgoingMessage, SearchQuery};
use crate::models::{MessageId, Scope};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 32;

enum Command {
    Send {
        message: OutgoingMessage,
        reply: oneshot::Sender<Result<SendReceipt>>,
    },
    Edit {
        id: MessageId,
        input: EditInput,
        reply: oneshot::Sender<Result<()>>,
    },
    Delete {
        id: MessageId,
        reply: oneshot::Sender<Result<()>>,
    },
    SwitchScope {
        scope: Scope,
        name: Option<String>,
        reply: oneshot::Sender<()>,
    },
    Search {
        query: SearchQuery,
        reply: oneshot::Sender<Result<SearchResults>>,
    },
    Logout {
        reply: oneshot::Sender<Result<()>>,
    },
    Refresh {
        reply: oneshot::Sender<CycleReport>,
    },
    SetActive(bool),
    Shutdown,
}

/// Cloneable handle to a running driver
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<ConversationView>,
}

impl SyncHandle {
    pub async fn send(&self, message: OutgoingMessage) -> Result<SendReceipt> {
        self.request(|reply| Command::Send { message, reply }).await?
    }

    pub async fn edit(&self, id: MessageId, input: EditInput) -> Result<()> {
        self.request(|reply| Command::Edit { id, input, reply }).await?
    }

    pub async fn delete(&self, id: MessageId) -> Result<()> {
        self.request(|reply| Command::Delete { id, reply }).await?
    }

    pub async fn switch_scope(&self, scope: Scope, name: Option<String>) -> Result<()> {
        self.request(|reply| Command::SwitchScope { scope, name, reply })
            .await
    }

    pub async fn search(&self, query: SearchQuery) -> Result<SearchResults> {
        self.request(|reply| Command::Search { query, reply }).await?
    }

    pub async fn logout(&self) -> Result<()> {
        self.request(|reply| Command::Logout { reply }).await?
    }

    /// Run one cycle now
    pub async fn refresh(&self) -> Result<CycleReport> {
        self.request(|reply| Command::Refresh { reply }).await
    }

    /// Pause or resume polling; resuming republishes the view and runs a
    /// cycle right away
    pub async fn set_active(&self, active: bool) -> Result<()> {
        self.commands
            .send(Command::SetActive(active))
            .await
            .map_err(|_| stopped())
    }

    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            debug!("Sync driver already stopped");
        }
    }

    /// Latest view; updated after every cycle and command
    pub fn subscribe(&self) -> watch::Receiver<ConversationView> {
        self.view.clone()
    }

    pub fn current_view(&self) -> ConversationView {
        self.view.borrow().clone()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands.send(make(reply)).await.map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())
    }
}

fn stopped() -> ChatError {
    ChatError::Transport("sync driver stopped".to_string())
}

pub struct SyncDriver<S> {
    engine: ReconciliationEngine<S>,
    commands: mpsc::Receiver<Command>,
    view: watch::Sender<ConversationView>,
    poll_interval: Duration,
    cycle_timeout: Duration,
    active: bool,
}

impl<S: SessionStorage + 'static> SyncDriver<S> {
    /// Start the driver task. The first cycle runs immediately.
    ///
    /// The task hands the engine back when it stops.
    pub fn spawn(
        engine: ReconciliationEngine<S>,
        config: &ClientConfig,
    ) -> (SyncHandle, JoinHandle<ReconciliationEngine<S>>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (view_tx, view_rx) = watch::channel(engine.view());

        let driver = Self {
            engine,
            commands: command_rx,
            view: view_tx,
            poll_interval: config.poll_interval(),
            cycle_timeout: config.cycle_timeout(),
            active: true,
        };

        let handle = SyncHandle {
            commands: command_tx,
            view: view_rx,
        };
        (handle, tokio::spawn(driver.run()))
    }

    async fn run(mut self) -> ReconciliationEngine<S> {
        info!(interval = ?self.poll_interval, scope = %self.engine.scope(), "Sync driver started");

        let next_cycle = time::sleep(Duration::ZERO);
        tokio::pin!(next_cycle);

        loop {
            tokio::select! {
                _ = &mut next_cycle, if self.active => {
                    self.cycle().await;
                    next_cycle.as_mut().reset(Instant::now() + self.poll_interval);
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("All sync handles dropped");
                        break;
                    };
                    match command {
                        Command::Shutdown => {
                            info!("Shutdown requested, stopping sync driver");
                            break;
                        }
                        Command::SetActive(active) => {
                            if active && !self.active {
                                debug!("Sync resumed");
                                // Highlights may have expired while paused
                                self.publish();
                                next_cycle.as_mut().reset(Instant::now());
                            } else if !active && self.active {
                                debug!("Sync paused");
                            }
                            self.active = active;
                        }
                        Command::Refresh { reply } => {
                            let report = self.cycle().await;
                            let _ = reply.send(report);
                            next_cycle.as_mut().reset(Instant::now() + self.poll_interval);
                        }
                        Command::SwitchScope { scope, name, reply } => {
                            self.engine.switch_scope(scope, name.as_deref());
                            self.publish();
                            let _ = reply.send(());
                            // New scope starts from scratch; fetch it now
                            next_cycle.as_mut().reset(Instant::now());
                        }
                        command => self.handle(command).await,
                    }
                }
            }
        }

        self.engine
    }

    /// One bounded cycle; a timeout is an ordinary transport failure
    async fn cycle(&mut self) -> CycleReport {
        let report = match time::timeout(self.cycle_timeout, self.engine.run_cycle()).await {
            Ok(report) => report,
            Err(_) => {
                warn!(timeout = ?self.cycle_timeout, "Sync cycle timed out");
                CycleReport {
                    failed: true,
                    ..CycleReport::default()
                }
            }
        };
        self.publish();
        report
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Send { message, reply } => {
                let result = self.engine.send_optimistic(message).await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Edit { id, input, reply } => {
                let result = self.engine.edit_message(&id, input).await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Delete { id, reply } => {
                let result = self.engine.delete_message(&id).await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Search { query, reply } => {
                let _ = reply.send(self.engine.search_messages(&query).await);
            }
            Command::Logout { reply } => {
                let result = self.engine.logout();
                self.publish();
                let _ = reply.send(result);
            }
            Command::SwitchScope { .. }
            | Command::Refresh { .. }
            | Command::SetActive(_)
            | Command::Shutdown => {}
        }
    }

    fn publish(&self) {
        let view = self.engine.view();
        self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}
