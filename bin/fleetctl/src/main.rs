mod stub_client;

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use activity::ActivitySimulator;
use campaigns::{CampaignScheduler, MessageStore};
use common::{Clock, Config, RandomSource, RiskEvent, SystemClock, SystemRandom};
use dispatch::{FleetDispatcherSpawner, SendGate};
use fingerprint::FingerprintRegistry;
use quarantine::QuarantineManager;
use risk::{RiskConfig, RiskEngine};
use supervisor::Supervisor;
use telegram_ctrl::{start_bot, BotDeps};

use stub_client::{StubMemberStore, StubTelegramClient};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!("fleetctl starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .unwrap_or_else(|e| panic!("Database migration failed: {e}"));
    info!("Database ready");

    // ── Shared primitives ──────────────────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rng: Arc<dyn RandomSource> = Arc::new(SystemRandom);
    let (log_tx, _) = broadcast::channel::<String>(1024);

    // ── Core subsystems ────────────────────────────────────────────────────────
    let store = MessageStore::new(db.clone());
    let store = Arc::new(store);

    let risk_cfg = RiskConfig {
        quarantine_threshold: cfg.risk_quarantine_threshold,
        critical_threshold: cfg.risk_critical_threshold,
        high_threshold: cfg.risk_high_threshold,
        ..RiskConfig::default()
    };
    let (risk_event_tx, mut risk_event_rx) = mpsc::channel::<RiskEvent>(64);
    let risk = Arc::new(RiskEngine::new(risk_cfg, risk_event_tx));

    let quarantine = Arc::new(QuarantineManager::new(db.clone(), clock.clone()));
    let fingerprints = Arc::new(FingerprintRegistry::new(
        db.clone(),
        clock.clone(),
        rng.clone(),
        cfg.fingerprint_max_age_days,
    ));
    let activity = Arc::new(ActivitySimulator::new(rng.clone()));

    // ── Send Gate + dispatcher fleet ───────────────────────────────────────────
    let gate = Arc::new(SendGate::new(
        risk.clone(),
        quarantine.clone(),
        activity.clone(),
        rng.clone(),
    ));

    let telegram_client: Arc<dyn common::TelegramClient> = Arc::new(StubTelegramClient);
    let member_store: Arc<dyn common::MemberStore> = Arc::new(StubMemberStore);

    let spawner = Arc::new(FleetDispatcherSpawner::new(
        store.clone(),
        gate.clone(),
        risk.clone(),
        fingerprints.clone(),
        telegram_client,
        member_store,
        rng.clone(),
        clock.clone(),
    ));

    // ── Scheduler ──────────────────────────────────────────────────────────────
    let scheduler = Arc::new(CampaignScheduler::new(
        store.as_ref().clone(),
        clock.clone(),
        spawner.clone(),
    ));

    // ── Supervisor ─────────────────────────────────────────────────────────────
    let supervisor = Arc::new(Supervisor::new(
        risk.clone(),
        quarantine.clone(),
        fingerprints.clone(),
        clock.clone(),
    ));

    // ── Telegram control bot ───────────────────────────────────────────────────
    let bot_deps = BotDeps {
        store: store.clone(),
        risk: risk.clone(),
        quarantine: quarantine.clone(),
        fingerprints: fingerprints.clone(),
        spawner: spawner.clone(),
        allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
    };

    // ── Fleet control API ──────────────────────────────────────────────────────
    let api_state = api::AppState {
        store: store.clone(),
        risk: risk.clone(),
        quarantine: quarantine.clone(),
        fingerprints: fingerprints.clone(),
        activity: activity.clone(),
        spawner: spawner.clone(),
        api_token: cfg.dashboard_token.clone(),
        log_tx: log_tx.clone(),
        log_buffer: api::LogBuffer::new(500),
    };

    // ── Risk event forwarder: auto-quarantine + Telegram alerts ───────────────
    let telegram_token = cfg.telegram_token.clone();
    let alert_user_ids = cfg.telegram_allowed_user_ids.clone();
    let alert_risk = risk.clone();
    let alert_quarantine = quarantine.clone();
    tokio::spawn(async move {
        let bot = teloxide::Bot::new(telegram_token);
        let chat_ids: Vec<teloxide::types::ChatId> =
            alert_user_ids.iter().map(|&id| teloxide::types::ChatId(id)).collect();

        while let Some(event) = risk_event_rx.recv().await {
            let msg = match event {
                RiskEvent::QuarantineRequested { account_id, reason, duration_minutes, ban_probability } => {
                    if let Err(e) = alert_quarantine
                        .quarantine(&account_id, reason, duration_minutes, None)
                        .await
                    {
                        warn!(account_id = %account_id, error = %e, "auto-quarantine failed");
                    }
                    alert_risk.set_quarantined(&account_id, true).await;
                    format!(
                        "\u{26a0}\u{fe0f} {account_id} auto-quarantined ({reason}, {duration_minutes}m). Ban probability {ban_probability:.2}."
                    )
                }
                RiskEvent::SpamPatternDetected { account_id } => {
                    format!("Repetitive message pattern detected on {account_id}.")
                }
                RiskEvent::AccountReleased { account_id } => {
                    format!("{account_id} released from quarantine.")
                }
                RiskEvent::DailyReset => "Daily risk counters rolled over.".to_string(),
            };
            telegram_ctrl::commands::send_alert(&bot, &chat_ids, &msg).await;
        }
    });

    // ── Scheduler tick loop ────────────────────────────────────────────────────
    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                scheduler.tick().await;
            }
        });
    }

    // ── Spawn remaining tasks ──────────────────────────────────────────────────
    let port = cfg.dashboard_port;
    tokio::spawn(supervisor.run());
    tokio::spawn(start_bot(cfg.telegram_token.clone(), bot_deps));
    tokio::spawn(api::serve(api_state, port));

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.unwrap();
    info!("Shutdown signal received. Exiting.");
}
