use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use spend_core::{
    aggregator::{Aggregator, MemoryAggregateStore},
    credentials::{Authenticator, FileUserStore, MemoryUserStore, UserStore},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    onboarding::ReporterNames,
    router::{Router, RouterDeps},
    scheduler::{ReportBots, Scheduler},
    sweeper::Sweeper,
};
use spend_telegram::{
    router::{run_polling, Bots},
    TelegramMessenger,
};

mod config;

use config::Config;

const INBOUND_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), spend_core::Error> {
    spend_core::logging::init("spend")?;

    let cfg = Config::load()?;
    let settings = cfg.settings.clone();

    let users: Arc<dyn UserStore> = match &cfg.users_file {
        Some(path) => {
            info!(path = %path.display(), "using file credential store");
            Arc::new(FileUserStore::open(path)?)
        }
        None => Arc::new(MemoryUserStore::new()),
    };
    let aggregator = Aggregator::new(Arc::new(MemoryAggregateStore::new()), settings.store_timeout);

    let bots = Bots::from_tokens(&cfg.main_bot_token, &cfg.daily_bot_token, &cfg.monthly_bot_token);
    // Telegram flood limits apply per bot, so each bot gets its own throttle.
    let throttled = |raw: TelegramMessenger| -> Arc<dyn MessagingPort> {
        Arc::new(ThrottledMessenger::new(Arc::new(raw), ThrottleConfig::default()))
    };

    let cancel = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let (events_tx, events_rx) = mpsc::channel(INBOUND_QUEUE);
    let (notices_tx, notices_rx) = mpsc::unbounded_channel();

    let router = Router::new(
        RouterDeps {
            auth: Authenticator::new(users, settings.auth_salt.clone(), settings.store_timeout),
            aggregator: aggregator.clone(),
            messenger: throttled(TelegramMessenger::new(bots.main.clone())),
            reporters: ReporterNames {
                daily: settings.daily_reporter_name.clone(),
                monthly: settings.monthly_reporter_name.clone(),
            },
            subscribers: notices_tx,
        },
        cancel.child_token(),
    );
    let router_task = tokio::spawn(router.run(inbound_rx));

    let scheduler = Scheduler::new(
        aggregator.clone(),
        ReportBots {
            daily: throttled(TelegramMessenger::new(bots.daily.clone())),
            monthly: throttled(TelegramMessenger::new(bots.monthly.clone())),
        },
        settings.report_interval,
    );
    let scheduler_tasks = scheduler.spawn(notices_rx, events_rx, cancel.child_token());

    let sweeper_task = tokio::spawn(
        Sweeper::new(aggregator, settings.sweep_stale_after).run(cancel.child_token()),
    );

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
            }
            cancel.cancel();
        });
    }

    if let Err(e) = run_polling(bots, inbound_tx, events_tx, cancel.clone()).await {
        error!("telegram polling failed: {e}");
        cancel.cancel();
        return Err(spend_core::Error::External(format!("telegram bot failed: {e}")));
    }

    cancel.cancel();
    let _ = router_task.await;
    for task in scheduler_tasks {
        let _ = task.await;
    }
    let _ = sweeper_task.await;
    info!("spend stopped");
    Ok(())
}
