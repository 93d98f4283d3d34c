use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use spend_core::{
    messaging::types::InboundMessage,
    scheduler::{ReportKind, SubscriptionEvent},
};

use crate::handlers;

/// The three bots the service talks through.
#[derive(Clone)]
pub struct Bots {
    pub main: Bot,
    pub daily: Bot,
    pub monthly: Bot,
}

impl Bots {
    pub fn from_tokens(main: &str, daily: &str, monthly: &str) -> Self {
        Self {
            main: Bot::new(main),
            daily: Bot::new(daily),
            monthly: Bot::new(monthly),
        }
    }
}

/// Long-poll all three bots until `cancel` fires.
///
/// Teloxide's default distribution handles updates of one chat sequentially,
/// so per-chat order survives into the router queue.
pub async fn run_polling(
    bots: Bots,
    inbound: mpsc::Sender<InboundMessage>,
    subscriptions: mpsc::Sender<SubscriptionEvent>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    for (name, bot) in [("main", &bots.main), ("daily", &bots.daily), ("monthly", &bots.monthly)] {
        match bot.get_me().await {
            Ok(me) => info!(bot = name, username = %me.username(), "telegram bot connected"),
            Err(e) => return Err(anyhow::anyhow!("{name} bot failed get_me: {e}")),
        }
    }

    let main_handler = Update::filter_message().endpoint(handlers::handle_main_message);
    let main = Dispatcher::builder(bots.main.clone(), main_handler)
        .dependencies(dptree::deps![inbound])
        .build();

    let daily = report_dispatcher(bots.daily.clone(), ReportKind::Daily, subscriptions.clone());
    let monthly = report_dispatcher(bots.monthly.clone(), ReportKind::Monthly, subscriptions);

    let mut dispatchers = [main, daily, monthly];
    for d in &dispatchers {
        let token = d.shutdown_token();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            match token.shutdown() {
                Ok(done) => done.await,
                Err(e) => warn!("dispatcher was not running at shutdown: {e}"),
            }
        });
    }

    let [main, daily, monthly] = &mut dispatchers;
    tokio::join!(main.dispatch(), daily.dispatch(), monthly.dispatch());
    info!("telegram polling stopped");
    Ok(())
}

fn report_dispatcher(
    bot: Bot,
    kind: ReportKind,
    events: mpsc::Sender<SubscriptionEvent>,
) -> Dispatcher<Bot, teloxide::RequestError, teloxide::dispatching::DefaultKey> {
    let handler = Update::filter_message().endpoint(handlers::handle_report_message);
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![kind, events])
        .build()
}
