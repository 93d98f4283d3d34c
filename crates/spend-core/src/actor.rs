//! Per-chat actors: one task plus one private mailbox each.

use std::time::Duration;

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{domain::ChatId, messaging::types::InboundMessage};

/// What the actor loop does after a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// A conversation handler that owns all of its state.
///
/// Turns are delivered one at a time, in arrival order.
#[async_trait]
pub trait ChatActor: Send + 'static {
    fn kind(&self) -> &'static str;

    async fn handle(&mut self, msg: InboundMessage) -> Flow;
}

/// Router-side handle to a running actor.
pub struct Mailbox {
    tx: mpsc::UnboundedSender<InboundMessage>,
    handle: JoinHandle<()>,
}

impl Mailbox {
    /// Run `actor` on its own task.
    ///
    /// With `idle` set the actor stops after that long without a message.
    pub fn spawn<A: ChatActor>(
        chat_id: ChatId,
        mut actor: A,
        cancel: CancellationToken,
        idle: Option<Duration>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();
        let handle = tokio::spawn(async move {
            let kind = actor.kind();
            debug!(chat_id = chat_id.0, kind, "actor started");
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = idle_for(idle) => {
                        debug!(chat_id = chat_id.0, kind, "actor idle");
                        break;
                    }
                    msg = rx.recv() => msg,
                };
                let Some(msg) = msg else {
                    break;
                };
                let flow = tokio::select! {
                    _ = cancel.cancelled() => break,
                    flow = actor.handle(msg) => flow,
                };
                if flow == Flow::Stop {
                    break;
                }
            }
            debug!(chat_id = chat_id.0, kind, "actor stopped");
        });
        Self { tx, handle }
    }

    /// Queue a message; returns `false` if the actor has already stopped.
    pub fn deliver(&self, msg: InboundMessage) -> bool {
        self.tx.send(msg).is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn idle_for(idle: Option<Duration>) {
    match idle {
        Some(after) => sleep(after).await,
        None => std::future::pending().await,
    }
}
