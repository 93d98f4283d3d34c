//! Per-chat dispatch: owns the chat → actor registry.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::mpsc, time::interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    actor::Mailbox,
    aggregator::Aggregator,
    credentials::Authenticator,
    domain::{ChatId, SenderHandle, UtcOffset},
    expense::ExpenseActor,
    messaging::{
        port::MessagingPort,
        types::{InboundMessage, OutgoingMessage},
    },
    onboarding::{Completion, OnboardingActor, ReporterNames, CMD_LOGIN, CMD_REGISTER},
};

pub const CMD_START: &str = "start";

pub const WELCOME: &str = "Hi! I keep track of your spending.\n\n\
/register to create an account\n\
/login if you already have one";

const ALREADY_AUTHORIZED: &str = "You are already authorized";

/// An onboarding conversation with no messages for this long is abandoned.
pub const ONBOARDING_IDLE: Duration = Duration::from_secs(60 * 60);

const PRUNE_EVERY: Duration = Duration::from_secs(10 * 60);

/// Handed to the report scheduler once a chat finishes onboarding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriberNotice {
    pub sender: SenderHandle,
    pub username: String,
    pub offset: UtcOffset,
}

enum Binding {
    Onboarding(Mailbox),
    Expense(Mailbox),
}

/// Everything the router needs to create actors.
pub struct RouterDeps {
    pub auth: Authenticator,
    pub aggregator: Aggregator,
    pub messenger: Arc<dyn MessagingPort>,
    pub reporters: ReporterNames,
    pub subscribers: mpsc::UnboundedSender<SubscriberNotice>,
}

pub struct Router {
    deps: RouterDeps,
    chats: HashMap<ChatId, Binding>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    cancel: CancellationToken,
    onboarding_created: usize,
}

impl Router {
    pub fn new(deps: RouterDeps, cancel: CancellationToken) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            deps,
            chats: HashMap::new(),
            completions_tx,
            completions_rx,
            cancel,
            onboarding_created: 0,
        }
    }

    /// Drive the router until cancelled or the inbound stream ends.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundMessage>) {
        info!("router started");
        let mut prune = interval(PRUNE_EVERY);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = inbound.recv() => match msg {
                    Some(msg) => self.dispatch(msg).await,
                    None => break,
                },
                Some(done) = self.completions_rx.recv() => self.on_completed(done),
                _ = prune.tick() => self.prune(),
            }
        }
        info!("router stopped");
    }

    /// Route one message by the state of its chat.
    ///
    /// Authorized chats get everything verbatim. Otherwise `/start` gets the
    /// welcome, `/register` and `/login` start or restart onboarding, and
    /// plain text reaches a live onboarding conversation or is dropped.
    pub async fn dispatch(&mut self, msg: InboundMessage) {
        // A conversation may have finished since the last message.
        while let Ok(done) = self.completions_rx.try_recv() {
            self.on_completed(done);
        }

        let chat_id = msg.chat_id;
        let binding = self.chats.get(&chat_id);

        if let Some(Binding::Expense(mailbox)) = binding {
            if !mailbox.is_finished() {
                if !mailbox.deliver(msg) {
                    warn!(chat_id = chat_id.0, "expense actor closed, dropping message");
                }
                return;
            }
        }

        if msg.is_command_named(CMD_START) {
            self.reply(&msg, WELCOME).await;
            return;
        }

        let onboarding_cmd = msg.is_command_named(CMD_REGISTER) || msg.is_command_named(CMD_LOGIN);
        match binding {
            // Authorized, but the actor is gone (shutdown).
            Some(Binding::Expense(_)) if onboarding_cmd => {
                self.reply(&msg, ALREADY_AUTHORIZED).await;
            }
            Some(Binding::Onboarding(mailbox)) if !mailbox.is_finished() => {
                if !mailbox.deliver(msg) {
                    warn!(chat_id = chat_id.0, "onboarding actor closed, dropping message");
                }
            }
            Some(Binding::Onboarding(_)) | None if onboarding_cmd => {
                self.start_onboarding(msg);
            }
            _ => {
                debug!(chat_id = chat_id.0, text = %msg.text, "no live conversation, message dropped");
            }
        }
    }

    fn start_onboarding(&mut self, msg: InboundMessage) {
        let chat_id = msg.chat_id;
        let actor = OnboardingActor::new(
            chat_id,
            self.deps.auth.clone(),
            self.deps.messenger.clone(),
            self.deps.reporters.clone(),
            self.completions_tx.clone(),
        );
        let mailbox = Mailbox::spawn(
            chat_id,
            actor,
            self.cancel.child_token(),
            Some(ONBOARDING_IDLE),
        );
        self.onboarding_created += 1;
        debug!(chat_id = chat_id.0, "onboarding started");
        mailbox.deliver(msg);
        self.chats.insert(chat_id, Binding::Onboarding(mailbox));
    }

    /// Forget onboarding conversations that have stopped.
    pub fn prune(&mut self) {
        let before = self.chats.len();
        self.chats
            .retain(|_, b| !matches!(b, Binding::Onboarding(mailbox) if mailbox.is_finished()));
        let pruned = before - self.chats.len();
        if pruned > 0 {
            debug!(pruned, "abandoned onboarding conversations forgotten");
        }
    }

    /// Promote a chat from onboarding to expense entry.
    pub fn on_completed(&mut self, done: Completion) {
        if matches!(self.chats.get(&done.chat_id), Some(Binding::Expense(_))) {
            warn!(chat_id = done.chat_id.0, "duplicate completion ignored");
            return;
        }

        let actor = ExpenseActor::new(
            done.chat_id,
            done.username.clone(),
            done.offset,
            self.deps.aggregator.clone(),
            self.deps.messenger.clone(),
        );
        let mailbox = Mailbox::spawn(done.chat_id, actor, self.cancel.child_token(), None);
        self.chats.insert(done.chat_id, Binding::Expense(mailbox));
        info!(chat_id = done.chat_id.0, username = %done.username, "chat authorized");

        let notice = SubscriberNotice {
            sender: done.sender,
            username: done.username,
            offset: done.offset,
        };
        if self.deps.subscribers.send(notice).is_err() {
            warn!(chat_id = done.chat_id.0, "scheduler is gone, subscriber notice dropped");
        }
    }

    async fn reply(&self, msg: &InboundMessage, text: &str) {
        if let Err(e) = self.deps.messenger.send(OutgoingMessage::reply(msg, text)).await {
            warn!(chat_id = msg.chat_id.0, "failed to reply: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregator::{AggregateStore, BucketKey, MemoryAggregateStore},
        credentials::MemoryUserStore,
        expense::USAGE,
        test_support::{inbound, FakeMessenger},
    };

    struct Fixture {
        router: Router,
        messenger: Arc<FakeMessenger>,
        aggregates: Arc<MemoryAggregateStore>,
        notices: mpsc::UnboundedReceiver<SubscriberNotice>,
    }

    fn fixture() -> Fixture {
        let messenger = Arc::new(FakeMessenger::default());
        let aggregates = Arc::new(MemoryAggregateStore::new());
        let (tx, notices) = mpsc::unbounded_channel();
        let deps = RouterDeps {
            auth: Authenticator::new(
                Arc::new(MemoryUserStore::new()),
                "pepper",
                Duration::from_secs(1),
            ),
            aggregator: Aggregator::new(aggregates.clone(), Duration::from_secs(1)),
            messenger: messenger.clone(),
            reporters: ReporterNames {
                daily: "@d".to_string(),
                monthly: "@m".to_string(),
            },
            subscribers: tx,
        };
        Fixture {
            router: Router::new(deps, CancellationToken::new()),
            messenger,
            aggregates,
            notices,
        }
    }

    fn completion(chat: i64) -> Completion {
        Completion {
            username: "dima".to_string(),
            chat_id: ChatId(chat),
            sender: SenderHandle(format!("tg-{chat}")),
            offset: UtcOffset::UTC,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn repeated_onboarding_commands_create_one_actor() {
        let mut f = fixture();
        for id in 1..=3 {
            f.router.dispatch(inbound(5, id, "/register")).await;
        }
        f.router.dispatch(inbound(5, 4, "/login")).await;
        assert_eq!(f.router.onboarding_created, 1);
        assert_eq!(f.router.chats.len(), 1);
    }

    #[tokio::test]
    async fn start_replies_with_welcome_and_creates_nothing() {
        let mut f = fixture();
        f.router.dispatch(inbound(5, 1, "/start")).await;
        assert_eq!(f.messenger.texts(), vec![WELCOME]);
        assert!(f.router.chats.is_empty());
    }

    #[tokio::test]
    async fn unknown_chat_text_is_dropped() {
        let mut f = fixture();
        f.router.dispatch(inbound(5, 1, "coffee 3")).await;
        settle().await;
        assert!(f.router.chats.is_empty());
        assert!(f.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn completion_promotes_chat_and_notifies_scheduler() {
        let mut f = fixture();
        f.router.dispatch(inbound(5, 1, "/register")).await;
        f.router.on_completed(completion(5));

        assert!(matches!(f.router.chats.get(&ChatId(5)), Some(Binding::Expense(_))));
        let notice = f.notices.try_recv().unwrap();
        assert_eq!(notice.username, "dima");
        assert_eq!(notice.sender, SenderHandle("tg-5".to_string()));
    }

    #[tokio::test]
    async fn authorized_chat_gets_commands_verbatim() {
        let mut f = fixture();
        f.router.on_completed(completion(5));
        f.router.dispatch(inbound(5, 10, "/login")).await;
        f.router.dispatch(inbound(5, 11, "/start")).await;
        settle().await;

        // Both reached the expense actor, which cannot read them as expenses.
        assert_eq!(f.messenger.texts(), vec![USAGE, USAGE]);
        assert_eq!(f.router.onboarding_created, 0);
    }

    #[tokio::test]
    async fn completion_is_applied_before_the_next_message() {
        let mut f = fixture();
        f.router.completions_tx.send(completion(6)).unwrap();
        f.router.dispatch(inbound(6, 1, "taxi 7")).await;
        settle().await;

        assert!(matches!(f.router.chats.get(&ChatId(6)), Some(Binding::Expense(_))));
        let daily = f
            .aggregates
            .read_many(&["dima".to_string()], &BucketKey::Daily)
            .await
            .unwrap();
        assert_eq!(daily["dima"]["taxi"], 7.0);
    }

    #[tokio::test]
    async fn stopped_expense_actor_still_counts_as_authorized() {
        let mut f = fixture();
        f.router.on_completed(completion(5));
        f.router.cancel.cancel();
        settle().await;

        f.router.dispatch(inbound(5, 1, "/login")).await;
        assert_eq!(f.messenger.texts(), vec![ALREADY_AUTHORIZED]);
        assert_eq!(f.router.onboarding_created, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_onboarding_is_pruned_and_can_restart() {
        let mut f = fixture();
        f.router.dispatch(inbound(5, 1, "/register")).await;
        settle().await;

        tokio::time::sleep(ONBOARDING_IDLE + Duration::from_secs(1)).await;
        settle().await;
        f.router.prune();
        assert!(f.router.chats.is_empty());

        f.router.dispatch(inbound(5, 2, "/register")).await;
        assert_eq!(f.router.onboarding_created, 2);
        assert_eq!(f.router.chats.len(), 1);
    }

    #[tokio::test]
    async fn authorized_chat_forwards_expenses() {
        let mut f = fixture();
        f.router.on_completed(completion(8));
        f.router.dispatch(inbound(8, 1, "taxi 7")).await;
        settle().await;

        let daily = f
            .aggregates
            .read_many(&["dima".to_string()], &BucketKey::Daily)
            .await
            .unwrap();
        assert_eq!(daily["dima"]["taxi"], 7.0);
    }

    #[tokio::test]
    async fn run_loop_exits_on_cancel() {
        let f = fixture();
        let cancel = f.router.cancel.clone();
        let (_tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(f.router.run(rx));
        cancel.cancel();
        handle.await.unwrap();
    }
}
