//! Streaming session: one per WebSocket connection.
//!
//! A session runs two tasks over the same transport:
//!
//! - the **reader** parses client commands (`watch`, `extract`, `delete`) and
//!   enforces the pong deadline;
//! - the **writer** is the only task that writes. It pushes a fresh
//!   [`Directory`] snapshot when the watched path changes, re-lists after
//!   every broker wake-up and pushes only when the listing differs from the
//!   last one sent, and pings the client periodically.
//!
//! The two tasks share a single-slot channel for the watched path and a
//! cancellation token; whichever ends first takes the other down with it.

use crate::extract::Extractor;
use crate::snapshot::Snapshotter;
use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use skiff_core::config::ServerConfig;
use skiff_core::{ChangeBroker, Directory, ObjectStore, Subscription};
use skiff_notify::ChangeNotifier;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Connection limits and keepalive timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_message_size: usize,
    pub ping_period: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
}

impl From<&ServerConfig> for SessionConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            ping_period: config.ping_period(),
            pong_wait: config.pong_wait(),
            write_wait: config.write_wait(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Watch(String),
    Extract(String),
    Delete(String),
}

/// Client message that ends the session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("binary messages are not supported")]
    Binary,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("command '{0}' has no argument")]
    MissingArgument(String),
}

impl Command {
    /// Parse `<verb> <path>`. Only the first three characters of the verb are
    /// significant, so `wat`, `watch` and `watching` all select watch.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let (verb, argument) = text
            .split_once(' ')
            .ok_or_else(|| ProtocolError::MissingArgument(text.to_string()))?;

        let argument = argument.trim().to_string();
        match verb.get(..3) {
            Some("wat") => Ok(Self::Watch(argument)),
            Some("ext") => Ok(Self::Extract(argument)),
            Some("del") => Ok(Self::Delete(argument)),
            _ => Err(ProtocolError::UnknownCommand(verb.to_string())),
        }
    }
}

/// Collaborators shared by every session of a server
#[derive(Clone)]
pub struct SessionContext {
    pub snapshotter: Snapshotter,
    pub extractor: Extractor,
    pub broker: ChangeBroker,
    pub notifier: Arc<dyn ChangeNotifier>,
    pub config: SessionConfig,
}

/// One client connection
pub struct Session {
    id: String,
    ctx: SessionContext,
}

impl Session {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ctx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Serve the connection until the client leaves, a protocol or transport
    /// error occurs, or `cancel` fires.
    pub async fn run<T, E>(self, transport: T, cancel: CancellationToken)
    where
        T: Stream<Item = Result<Message, E>> + Sink<Message, Error = E> + Send + 'static,
        E: Display + Send + 'static,
    {
        info!("Session {} started", self.id);

        let (sink, stream) = transport.split();
        let (path_tx, path_rx) = mpsc::channel(1);
        let session_cancel = cancel.child_token();

        let writer = Writer {
            id: self.id.clone(),
            snapshotter: self.ctx.snapshotter.clone(),
            config: self.ctx.config.clone(),
            subscription: self.ctx.broker.subscribe(),
            paths: path_rx,
            sink,
            cancel: session_cancel.clone(),
        };
        let writer_task = tokio::spawn(writer.run());

        self.read(stream, path_tx, &session_cancel).await;
        session_cancel.cancel();

        if let Err(e) = writer_task.await {
            error!("Writer of session {} failed: {}", self.id, e);
        }
        info!("Session {} closed", self.id);
    }

    async fn read<S, E>(
        &self,
        mut stream: S,
        paths: mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let pong_wait = self.ctx.config.pong_wait;
        let deadline = tokio::time::sleep(pong_wait);
        tokio::pin!(deadline);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut deadline => {
                    warn!("Session {}: no pong within {:?}", self.id, pong_wait);
                    break;
                }
                next = stream.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    debug!("Session {}: read failed: {}", self.id, e);
                    break;
                }
                None => {
                    debug!("Session {}: stream ended", self.id);
                    break;
                }
            };

            match message {
                Message::Text(text) => {
                    let command = match self.decode(text.as_str()) {
                        Ok(command) => command,
                        Err(e) => {
                            warn!("Session {}: {}", self.id, e);
                            break;
                        }
                    };
                    if !self.dispatch(command, &paths, cancel).await {
                        break;
                    }
                }
                Message::Pong(_) => {
                    trace!("Session {}: pong", self.id);
                    deadline.as_mut().reset(Instant::now() + pong_wait);
                }
                // Answered by the transport
                Message::Ping(_) => {}
                Message::Binary(_) => {
                    warn!("Session {}: {}", self.id, ProtocolError::Binary);
                    break;
                }
                Message::Close(frame) => {
                    debug!(
                        "Session {}: close received ({:?})",
                        self.id,
                        frame.map(|f| f.code)
                    );
                    break;
                }
            }
        }
    }

    fn decode(&self, text: &str) -> Result<Command, ProtocolError> {
        let limit = self.ctx.config.max_message_size;
        if text.len() > limit {
            return Err(ProtocolError::TooLarge {
                size: text.len(),
                limit,
            });
        }
        Command::parse(text)
    }

    /// Act on a command. Returns `false` when the session must end.
    async fn dispatch(
        &self,
        command: Command,
        paths: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> bool {
        match command {
            Command::Watch(path) => {
                debug!("Session {}: watch {}", self.id, path);
                tokio::select! {
                    _ = cancel.cancelled() => false,
                    sent = paths.send(path) => sent.is_ok(),
                }
            }
            Command::Extract(path) => {
                info!("Session {}: extract {}", self.id, path);
                let extractor = self.ctx.extractor.clone();
                let notifier = self.ctx.notifier.clone();
                tokio::spawn(async move {
                    match extractor.extract(&path).await {
                        Ok(count) => info!("Extracted {} files from {}", count, path),
                        Err(e) => warn!("Failed to extract {}: {}", path, e),
                    }
                    notifier.notify();
                });
                true
            }
            Command::Delete(path) => {
                info!("Session {}: delete {}", self.id, path);
                let store = self.ctx.snapshotter.store().clone();
                let notifier = self.ctx.notifier.clone();
                tokio::spawn(async move {
                    match store.delete_recursive(&path).await {
                        Ok(count) => info!("Deleted {} objects under {}", count, path),
                        Err(e) => warn!("Failed to delete {}: {}", path, e),
                    }
                    notifier.notify();
                });
                true
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("write failed: {0}")]
    Transport(String),
}

struct Writer<K> {
    id: String,
    snapshotter: Snapshotter,
    config: SessionConfig,
    subscription: Subscription,
    paths: mpsc::Receiver<String>,
    sink: K,
    cancel: CancellationToken,
}

impl<K> Writer<K>
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    async fn run(mut self) {
        let period = self.config.ping_period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut watched: Option<String> = None;
        let mut previous: Option<Directory> = None;

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                path = self.paths.recv() => {
                    let Some(path) = path else { break };
                    // A new path always gets a push.
                    previous = None;
                    let outcome = self.push(&path, &mut previous).await;
                    watched = Some(path);
                    outcome
                }
                woken = self.subscription.wait(&self.cancel) => {
                    if !woken {
                        break;
                    }
                    match watched.as_deref() {
                        Some(path) => self.push(path, &mut previous).await,
                        None => Ok(()),
                    }
                }
                _ = ticker.tick() => {
                    trace!("Session {}: ping", self.id);
                    self.write(Message::Ping(Bytes::new())).await
                }
            };

            if let Err(e) = outcome {
                if self.cancel.is_cancelled() {
                    debug!("Session {}: {} while closing", self.id, e);
                } else {
                    warn!("Session {}: {}", self.id, e);
                }
                break;
            }
        }

        self.cancel.cancel();
        debug!("Writer of session {} stopped", self.id);
    }

    /// Snapshot `path` and send it unless it equals `previous`.
    async fn push(
        &mut self,
        path: &str,
        previous: &mut Option<Directory>,
    ) -> Result<(), WriteError> {
        let current = match self.snapshotter.snapshot(path).await {
            Ok(current) => current,
            Err(e) => {
                warn!("Session {}: failed to list {}: {}", self.id, path, e);
                return Ok(());
            }
        };

        if previous.as_ref() == Some(&current) {
            trace!("Session {}: {} unchanged", self.id, path);
            return Ok(());
        }

        let json = match serde_json::to_string(&current) {
            Ok(json) => json,
            Err(e) => {
                error!("Session {}: failed to encode {}: {}", self.id, path, e);
                return Ok(());
            }
        };

        self.write(Message::Text(json.into())).await?;
        debug!("Session {}: pushed {}", self.id, current.path);
        *previous = Some(current);
        Ok(())
    }

    async fn write(&mut self, message: Message) -> Result<(), WriteError> {
        let wait = self.config.write_wait;
        match tokio::time::timeout(wait, self.sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WriteError::Transport(e.to_string())),
            Err(_) => Err(WriteError::Timeout(wait)),
        }
    }
}
