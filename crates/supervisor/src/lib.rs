use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use common::{AccountId, Clock, RiskSnapshot};
use fingerprint::FingerprintRegistry;
use quarantine::QuarantineManager;
use risk::RiskEngine;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Process-wide periodic maintenance: quarantine expiry, risk window aging,
/// fingerprint staleness, cached snapshots, and the UTC-midnight daily
/// reset event. Runs at 1 Hz; every sub-task below is cheap enough that a
/// single tick never blocks the next one meaningfully.
pub struct Supervisor {
    risk: Arc<RiskEngine>,
    quarantine: Arc<QuarantineManager>,
    fingerprints: Arc<FingerprintRegistry>,
    clock: Arc<dyn Clock>,
    snapshot_cache: RwLock<HashMap<AccountId, RiskSnapshot>>,
    last_snapshot_refresh: RwLock<DateTime<Utc>>,
    last_fingerprint_check: RwLock<DateTime<Utc>>,
    last_daily_reset_day: RwLock<Option<chrono::NaiveDate>>,
}

impl Supervisor {
    pub fn new(
        risk: Arc<RiskEngine>,
        quarantine: Arc<QuarantineManager>,
        fingerprints: Arc<FingerprintRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            risk,
            quarantine,
            fingerprints,
            clock,
            snapshot_cache: RwLock::new(HashMap::new()),
            last_snapshot_refresh: RwLock::new(now),
            last_fingerprint_check: RwLock::new(now),
            last_daily_reset_day: RwLock::new(None),
        }
    }

    /// Runs `tick` once a second until the process shuts down. Call via
    /// `tokio::spawn`.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&self) {
        let now = self.clock.now();

        match self.quarantine.sweep_expired().await {
            Ok(released) => {
                for account_id in released {
                    self.risk.set_quarantined(&account_id, false).await;
                }
            }
            Err(e) => error!(error = %e, "supervisor: quarantine sweep failed"),
        }

        self.risk.tick(now).await;

        let due_for_fingerprint_check = {
            let last = *self.last_fingerprint_check.read().await;
            now - last >= chrono::Duration::seconds(60)
        };
        if due_for_fingerprint_check {
            *self.last_fingerprint_check.write().await = now;
            self.rotate_stale_fingerprints().await;
        }

        let due_for_snapshot_refresh = {
            let last = *self.last_snapshot_refresh.read().await;
            now - last >= chrono::Duration::seconds(60)
        };
        if due_for_snapshot_refresh {
            *self.last_snapshot_refresh.write().await = now;
            self.refresh_snapshots().await;
        }

        self.maybe_daily_reset(now).await;
    }

    async fn rotate_stale_fingerprints(&self) {
        let accounts = match self.fingerprints.known_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(error = %e, "supervisor: failed to list known accounts for rotation check");
                return;
            }
        };
        for account_id in accounts {
            match self.fingerprints.auto_rotate_if_stale(&account_id).await {
                Ok(Some(fp)) => {
                    info!(account_id = %account_id, rotation_count = fp.rotation_count, "supervisor auto-rotated stale fingerprint");
                }
                Ok(None) => {}
                Err(e) => {
                    error!(account_id = %account_id, error = %e, "supervisor: fingerprint rotation check failed");
                }
            }
        }
    }

    async fn refresh_snapshots(&self) {
        let accounts = match self.fingerprints.known_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(error = %e, "supervisor: failed to list known accounts for snapshot refresh");
                return;
            }
        };
        let mut cache = self.snapshot_cache.write().await;
        for account_id in accounts {
            let snapshot = self.risk.get_status(&account_id).await;
            cache.insert(account_id, snapshot);
        }
    }

    async fn maybe_daily_reset(&self, now: DateTime<Utc>) {
        let today = now.date_naive();
        let mut last_reset_day = self.last_daily_reset_day.write().await;
        if *last_reset_day != Some(today) && now.num_seconds_from_midnight() < 2 {
            *last_reset_day = Some(today);
            self.risk.daily_reset().await;
        }
    }

    /// Read-heavy observers (dashboard, Telegram control bot) consult this
    /// instead of hitting the risk engine directly.
    pub async fn cached_snapshot(&self, account_id: &AccountId) -> Option<RiskSnapshot> {
        self.snapshot_cache.read().await.get(account_id).cloned()
    }
}

trait NumSecondsFromMidnight {
    fn num_seconds_from_midnight(&self) -> u32;
}

impl NumSecondsFromMidnight for DateTime<Utc> {
    fn num_seconds_from_midnight(&self) -> u32 {
        use chrono::Timelike;
        self.hour() * 3600 + self.minute() * 60 + self.second()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SystemClock;
    use tokio::sync::mpsc;

    async fn test_pool() -> sqlx::SqlitePool {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn tick_sweeps_expired_quarantines() {
        let db = test_pool().await;
        let (tx, _rx) = mpsc::channel(16);
        let risk = Arc::new(RiskEngine::new(risk::RiskConfig::default(), tx));
        let quarantine = Arc::new(QuarantineManager::new(db.clone(), Arc::new(SystemClock)));
        let fingerprints = Arc::new(FingerprintRegistry::new(
            db,
            Arc::new(SystemClock),
            Arc::new(common::SystemRandom),
            14,
        ));
        let supervisor = Supervisor::new(risk, quarantine.clone(), fingerprints, Arc::new(SystemClock));

        let account: AccountId = "+9000".into();
        quarantine
            .quarantine(&account, common::QuarantineReason::Manual, -1, None)
            .await
            .unwrap();
        assert!(quarantine.is_quarantined(&account).await.unwrap().is_none());

        supervisor.tick().await;
        let stats = quarantine.stats(&account).await.unwrap();
        assert_eq!(stats.total_quarantines, 1);
    }
}
