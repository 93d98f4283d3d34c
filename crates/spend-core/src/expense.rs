//! Expense entry for an authorized chat.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, warn};

use crate::{
    actor::{ChatActor, Flow},
    aggregator::{Aggregator, Entry},
    domain::{ChatId, UtcOffset},
    messaging::{
        port::MessagingPort,
        types::{InboundMessage, OutgoingMessage},
    },
};

pub(crate) const USAGE: &str = "Could not read that expense. Send exactly two words separated \
by a space: the category and the amount, e.g.\n\ncoffee 3.5";

pub struct ExpenseActor {
    chat_id: ChatId,
    username: String,
    offset: UtcOffset,
    aggregator: Aggregator,
    messenger: Arc<dyn MessagingPort>,
}

impl ExpenseActor {
    pub fn new(
        chat_id: ChatId,
        username: String,
        offset: UtcOffset,
        aggregator: Aggregator,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            chat_id,
            username,
            offset,
            aggregator,
            messenger,
        }
    }

    async fn reply(&self, msg: &InboundMessage, text: String) {
        if let Err(e) = self.messenger.send(OutgoingMessage::reply(msg, text)).await {
            warn!(chat_id = self.chat_id.0, username = %self.username, "failed to reply: {e}");
        }
    }
}

#[async_trait]
impl ChatActor for ExpenseActor {
    fn kind(&self) -> &'static str {
        "expense"
    }

    async fn handle(&mut self, msg: InboundMessage) -> Flow {
        let Some((category, amount)) = parse_expense(&msg.text) else {
            debug!(chat_id = self.chat_id.0, username = %self.username, "malformed expense");
            self.reply(&msg, USAGE.to_string()).await;
            return Flow::Continue;
        };

        let entry = Entry {
            username: self.username.clone(),
            category: category.to_string(),
            amount,
            at: Utc::now(),
            offset: self.offset,
        };
        if let Err(e) = self.aggregator.record(&entry).await {
            error!(chat_id = self.chat_id.0, username = %self.username, "failed to record expense: {e}");
            return Flow::Continue;
        }

        self.reply(&msg, format!("Expense recorded\n{category}: {amount:.2}"))
            .await;
        Flow::Continue
    }
}

/// Parse `<category> <amount>`; anything but exactly two space-separated tokens fails.
pub fn parse_expense(text: &str) -> Option<(&str, f64)> {
    let mut parts = text.split(' ');
    let (Some(category), Some(amount), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    if category.is_empty() {
        return None;
    }
    let amount: f64 = amount.parse().ok()?;
    amount.is_finite().then_some((category, amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregator::{AggregateStore, BucketKey, Entry, MemoryAggregateStore},
        errors::Error,
        test_support::{inbound, FakeMessenger},
        Result,
    };
    use chrono::{DateTime, Datelike};
    use std::{collections::HashMap, time::Duration};

    struct Fixture {
        actor: ExpenseActor,
        store: Arc<MemoryAggregateStore>,
        messenger: Arc<FakeMessenger>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryAggregateStore::new());
        let messenger = Arc::new(FakeMessenger::default());
        let actor = ExpenseActor::new(
            ChatId(3),
            "dima".to_string(),
            UtcOffset::UTC,
            Aggregator::new(store.clone(), Duration::from_secs(1)),
            messenger.clone(),
        );
        Fixture {
            actor,
            store,
            messenger,
        }
    }

    #[test]
    fn parse_requires_exactly_two_tokens_and_a_number() {
        assert_eq!(parse_expense("coffee 3.5"), Some(("coffee", 3.5)));
        assert_eq!(parse_expense("food.outside 12"), Some(("food.outside", 12.0)));
        assert_eq!(parse_expense("coffee"), None);
        assert_eq!(parse_expense("coffee 3.5 extra"), None);
        assert_eq!(parse_expense("coffee  3.5"), None);
        assert_eq!(parse_expense("coffee abc"), None);
        assert_eq!(parse_expense(" 3.5"), None);
        assert_eq!(parse_expense("coffee NaN"), None);
        assert_eq!(parse_expense("coffee inf"), None);
    }

    #[tokio::test]
    async fn valid_expense_writes_both_buckets_and_confirms() {
        let mut f = fixture();
        let before = Utc::now().date_naive();
        assert_eq!(f.actor.handle(inbound(3, 1, "coffee 3.5")).await, Flow::Continue);
        let after = Utc::now().date_naive();

        let daily = f.store.read("dima", &BucketKey::Daily).await.unwrap();
        assert_eq!(daily["coffee"], 3.5);

        // Skip the month check if the turn straddled a month boundary.
        if before.month() == after.month() {
            let month = f.store.read("dima", &BucketKey::month_of(after)).await.unwrap();
            assert_eq!(month["coffee"], 3.5);
        }

        assert_eq!(f.messenger.texts(), vec!["Expense recorded\ncoffee: 3.50"]);
    }

    #[tokio::test]
    async fn malformed_expense_writes_nothing() {
        let mut f = fixture();
        f.actor.handle(inbound(3, 1, "coffee three")).await;

        assert!(f.store.read("dima", &BucketKey::Daily).await.unwrap().is_empty());
        assert!(f.messenger.last().unwrap().text.starts_with("Could not read"));
    }

    struct DownStore;

    #[async_trait]
    impl AggregateStore for DownStore {
        async fn increment(&self, _: &BucketKey, _: &Entry) -> Result<()> {
            Err(Error::Store("down".to_string()))
        }
        async fn read(&self, _: &str, _: &BucketKey) -> Result<HashMap<String, f64>> {
            Ok(HashMap::new())
        }
        async fn read_many(
            &self,
            _: &[String],
            _: &BucketKey,
        ) -> Result<HashMap<String, HashMap<String, f64>>> {
            Ok(HashMap::new())
        }
        async fn delete_many(&self, _: &[String], _: &BucketKey) -> Result<()> {
            Ok(())
        }
        async fn purge_stale(&self, _: &BucketKey, _: DateTime<Utc>) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn store_failure_is_silent_to_the_user() {
        let messenger = Arc::new(FakeMessenger::default());
        let mut actor = ExpenseActor::new(
            ChatId(3),
            "dima".to_string(),
            UtcOffset::UTC,
            Aggregator::new(Arc::new(DownStore), Duration::from_secs(1)),
            messenger.clone(),
        );
        assert_eq!(actor.handle(inbound(3, 1, "coffee 3.5")).await, Flow::Continue);
        assert!(messenger.sent().is_empty());
    }
}
