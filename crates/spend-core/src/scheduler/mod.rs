//! Timezone-aware daily and monthly reports.
//!
//! Two tasks: a listener that learns who is who (onboarding notices and report
//! bot subscriptions) and a tick loop aligned to wall-clock boundaries that
//! sends reports to every user whose local day or month just rolled over.

mod report;
mod timezones;

pub use report::{render_report, report_title};
pub use timezones::{
    ended_local_day, is_day_rollover, is_month_rollover, next_boundary, next_tick, TimezoneTable,
};

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{sync::mpsc, sync::RwLock, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    aggregator::{Aggregator, BucketKey},
    domain::{ChatId, SenderHandle, UtcOffset},
    messaging::{port::MessagingPort, types::OutgoingMessage},
    router::SubscriberNotice,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Daily,
    Monthly,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportKind::Daily => f.write_str("daily"),
            ReportKind::Monthly => f.write_str("monthly"),
        }
    }
}

/// Someone messaged one of the report bots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub kind: ReportKind,
    pub sender: SenderHandle,
    pub chat_id: ChatId,
}

#[derive(Default)]
struct Subscriptions {
    /// Sender handle → username, learned from onboarding.
    expected: HashMap<SenderHandle, String>,
    daily: HashMap<String, ChatId>,
    monthly: HashMap<String, ChatId>,
}

impl Subscriptions {
    fn chats(&self, kind: ReportKind) -> &HashMap<String, ChatId> {
        match kind {
            ReportKind::Daily => &self.daily,
            ReportKind::Monthly => &self.monthly,
        }
    }

    fn chats_mut(&mut self, kind: ReportKind) -> &mut HashMap<String, ChatId> {
        match kind {
            ReportKind::Daily => &mut self.daily,
            ReportKind::Monthly => &mut self.monthly,
        }
    }
}

/// Outbound ports for the two report bots.
#[derive(Clone)]
pub struct ReportBots {
    pub daily: Arc<dyn MessagingPort>,
    pub monthly: Arc<dyn MessagingPort>,
}

impl ReportBots {
    fn port(&self, kind: ReportKind) -> &Arc<dyn MessagingPort> {
        match kind {
            ReportKind::Daily => &self.daily,
            ReportKind::Monthly => &self.monthly,
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    aggregator: Aggregator,
    bots: ReportBots,
    interval: Duration,
    timezones: Arc<TimezoneTable>,
    subscriptions: Arc<RwLock<Subscriptions>>,
}

impl Scheduler {
    pub fn new(aggregator: Aggregator, bots: ReportBots, interval: Duration) -> Self {
        Self {
            aggregator,
            bots,
            interval,
            timezones: Arc::new(TimezoneTable::new()),
            subscriptions: Arc::new(RwLock::new(Subscriptions::default())),
        }
    }

    /// Start the listener and the tick loop.
    pub fn spawn(
        self,
        notices: mpsc::UnboundedReceiver<SubscriberNotice>,
        events: mpsc::Receiver<SubscriptionEvent>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let listener = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.listen(notices, events, cancel).await })
        };
        let ticker = tokio::spawn(async move { self.tick_loop(cancel).await });
        vec![listener, ticker]
    }

    async fn listen(
        &self,
        mut notices: mpsc::UnboundedReceiver<SubscriberNotice>,
        mut events: mpsc::Receiver<SubscriptionEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(notice) = notices.recv() => self.on_notice(notice).await,
                Some(event) = events.recv() => self.on_subscription(event).await,
                else => break,
            }
        }
        debug!("subscription listener stopped");
    }

    async fn tick_loop(&self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "report scheduler started");
        let mut last = None;
        loop {
            let now = Utc::now();
            let at = next_tick(now, last, self.interval);
            let dur = (at - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(dur) => {
                    self.run_tick(at).await;
                    last = Some(at);
                }
            }
        }
        info!("report scheduler stopped");
    }

    /// Register a freshly authorized user.
    pub async fn on_notice(&self, notice: SubscriberNotice) {
        self.timezones.add(&notice.username, notice.offset).await;
        let mut subs = self.subscriptions.write().await;
        subs.expected.insert(notice.sender, notice.username);
    }

    pub async fn on_subscription(&self, event: SubscriptionEvent) {
        let username = {
            let mut subs = self.subscriptions.write().await;
            let Some(username) = subs.expected.get(&event.sender).cloned() else {
                drop(subs);
                debug!(sender = %event.sender, kind = %event.kind, "subscription from unknown sender");
                self.notify(
                    event.kind,
                    event.chat_id,
                    "Please log in to the main bot first, then send /start here again",
                )
                .await;
                return;
            };
            subs.chats_mut(event.kind).insert(username.clone(), event.chat_id);
            username
        };

        info!(%username, kind = %event.kind, chat_id = event.chat_id.0, "subscribed to reports");
        let text = format!("{username}, you are subscribed to {} reports", event.kind);
        self.notify(event.kind, event.chat_id, &text).await;
    }

    /// Send every report that is due at the boundary `at`.
    pub async fn run_tick(&self, at: DateTime<Utc>) {
        for (offset, users) in self.timezones.month_rollovers(at, self.interval).await {
            let period = ended_local_day(offset, at);
            let bucket = BucketKey::month_of(period);
            self.send_reports(ReportKind::Monthly, offset, &users, &bucket, at)
                .await;
        }

        for (offset, users) in self.timezones.day_rollovers(at, self.interval).await {
            let read = self
                .send_reports(ReportKind::Daily, offset, &users, &BucketKey::Daily, at)
                .await;
            if !read {
                // Keep the day's totals rather than lose them unreported.
                warn!(%offset, "daily totals kept, report could not be read");
                continue;
            }
            if let Err(e) = self.aggregator.clear(&users, &BucketKey::Daily).await {
                error!(%offset, "failed to reset daily totals: {e}");
            }
        }
    }

    /// Returns false only when the totals could not be read.
    async fn send_reports(
        &self,
        kind: ReportKind,
        offset: UtcOffset,
        users: &[String],
        bucket: &BucketKey,
        at: DateTime<Utc>,
    ) -> bool {
        let targets: Vec<(String, ChatId)> = {
            let subs = self.subscriptions.read().await;
            let chats = subs.chats(kind);
            users
                .iter()
                .filter_map(|u| chats.get(u).map(|chat| (u.clone(), *chat)))
                .collect()
        };
        if targets.is_empty() {
            return true;
        }

        let names: Vec<String> = targets.iter().map(|(u, _)| u.clone()).collect();
        let totals = match self.aggregator.read_many(&names, bucket).await {
            Ok(v) => v,
            Err(e) => {
                error!(%offset, %kind, %bucket, "failed to read totals: {e}");
                return false;
            }
        };

        let title = report_title(kind, ended_local_day(offset, at));
        for (username, chat_id) in targets {
            let Some(user_totals) = totals.get(&username) else {
                debug!(%username, %kind, "nothing recorded, no report");
                continue;
            };
            let text = render_report(&title, user_totals);
            let port = self.bots.port(kind);
            match port.send(OutgoingMessage::text(chat_id, text)).await {
                Ok(_) => debug!(%username, %kind, "report sent"),
                Err(e) => warn!(%username, %kind, chat_id = chat_id.0, "failed to send report: {e}"),
            }
        }
        true
    }

    async fn notify(&self, kind: ReportKind, chat_id: ChatId, text: &str) {
        let port = self.bots.port(kind);
        if let Err(e) = port.send(OutgoingMessage::text(chat_id, text)).await {
            warn!(%kind, chat_id = chat_id.0, "failed to send subscription reply: {e}");
        }
    }
}
