use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{AccountId, Clock, QuarantineReason, QuarantineStats};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::{error, info};

type Observer = Arc<dyn Fn(QuarantineEvent) + Send + Sync>;

/// Notification delivered to registered observers. Errors inside an
/// observer callback are logged and swallowed — they must never block the
/// manager.
#[derive(Debug, Clone)]
pub enum QuarantineEvent {
    Quarantined { account_id: AccountId, release_at: DateTime<Utc> },
    Released { account_id: AccountId },
}

/// Durable store of active quarantines plus an append-only history,
/// backed by `quarantine_active` and `quarantine_history`.
pub struct QuarantineManager {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    observers: RwLock<Vec<Observer>>,
}

impl QuarantineManager {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub async fn register_observer<F>(&self, callback: F)
    where
        F: Fn(QuarantineEvent) + Send + Sync + 'static,
    {
        self.observers.write().await.push(Arc::new(callback));
    }

    async fn notify(&self, event: QuarantineEvent) {
        for observer in self.observers.read().await.iter() {
            let observer = observer.clone();
            let event = event.clone();
            // Observers run detached so a slow or panicking callback can
            // never stall a quarantine decision.
            tokio::task::spawn_blocking(move || observer(event)).await.unwrap_or_else(|e| {
                error!(error = %e, "quarantine observer callback panicked");
            });
        }
    }

    /// Overwrites any existing active record, keeping the later `release_at`.
    pub async fn quarantine(
        &self,
        account_id: &AccountId,
        reason: QuarantineReason,
        duration_minutes: i64,
        metrics_snapshot: Option<String>,
    ) -> common::Result<()> {
        let now = self.clock.now();
        let mut release_at = now + chrono::Duration::minutes(duration_minutes);

        if let Some((_, existing_release)) = self.is_quarantined(account_id).await? {
            if existing_release > release_at {
                release_at = existing_release;
            }
        }

        let reason_str = reason.to_string();
        sqlx::query!(
            r#"
            INSERT INTO quarantine_active (account_id, reason, quarantined_at, release_at, metrics_json)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                reason = excluded.reason,
                quarantined_at = excluded.quarantined_at,
                release_at = excluded.release_at,
                metrics_json = excluded.metrics_json
            "#,
            account_id,
            reason_str,
            now,
            release_at,
            metrics_snapshot,
        )
        .execute(&self.db)
        .await?;

        sqlx::query!(
            r#"
            INSERT INTO quarantine_history
                (account_id, reason, quarantined_at, released_at, duration_minutes, metrics_json, notes)
            VALUES (?, ?, ?, NULL, ?, ?, NULL)
            "#,
            account_id,
            reason_str,
            now,
            duration_minutes,
            metrics_snapshot,
        )
        .execute(&self.db)
        .await?;

        info!(account_id = %account_id, reason = %reason, release_at = %release_at, "account quarantined");
        self.notify(QuarantineEvent::Quarantined {
            account_id: account_id.clone(),
            release_at,
        })
        .await;
        Ok(())
    }

    pub async fn release(&self, account_id: &AccountId) -> common::Result<()> {
        let now = self.clock.now();
        sqlx::query!("DELETE FROM quarantine_active WHERE account_id = ?", account_id)
            .execute(&self.db)
            .await?;

        sqlx::query!(
            r#"
            UPDATE quarantine_history
            SET released_at = ?
            WHERE account_id = ? AND released_at IS NULL
            "#,
            now,
            account_id,
        )
        .execute(&self.db)
        .await?;

        info!(account_id = %account_id, "account released from quarantine");
        self.notify(QuarantineEvent::Released {
            account_id: account_id.clone(),
        })
        .await;
        Ok(())
    }

    pub async fn is_quarantined(
        &self,
        account_id: &AccountId,
    ) -> common::Result<Option<(QuarantineReason, DateTime<Utc>)>> {
        let row = sqlx::query!(
            r#"SELECT reason, release_at as "release_at: DateTime<Utc>" FROM quarantine_active WHERE account_id = ?"#,
            account_id
        )
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else { return Ok(None) };
        if row.release_at <= self.clock.now() {
            return Ok(None);
        }
        Ok(Some((parse_reason(&row.reason), row.release_at)))
    }

    /// Releases every account whose `release_at` has passed. Called by the
    /// Supervisor each tick.
    pub async fn sweep_expired(&self) -> common::Result<Vec<AccountId>> {
        let now = self.clock.now();
        let expired: Vec<AccountId> = sqlx::query_scalar!(
            "SELECT account_id FROM quarantine_active WHERE release_at <= ?",
            now
        )
        .fetch_all(&self.db)
        .await?;

        for account_id in &expired {
            self.release(account_id).await?;
        }
        Ok(expired)
    }

    pub async fn stats(&self, account_id: &AccountId) -> common::Result<QuarantineStats> {
        let row = sqlx::query!(
            r#"
            SELECT
                COUNT(*) as "total_quarantines!: i64",
                COALESCE(SUM(duration_minutes), 0) as "total_minutes!: i64",
                MAX(quarantined_at) as "last_quarantine_at: DateTime<Utc>"
            FROM quarantine_history
            WHERE account_id = ?
            "#,
            account_id
        )
        .fetch_one(&self.db)
        .await?;

        Ok(QuarantineStats {
            total_quarantines: row.total_quarantines,
            total_minutes: row.total_minutes,
            last_quarantine_at: row.last_quarantine_at,
        })
    }
}

fn parse_reason(raw: &str) -> QuarantineReason {
    match raw {
        "high_ban_risk" => QuarantineReason::HighBanRisk,
        "floodwait" => QuarantineReason::Floodwait,
        "repeated_errors" => QuarantineReason::RepeatedErrors,
        "pattern_detected" => QuarantineReason::PatternDetected,
        _ => QuarantineReason::Manual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn quarantine_then_release_clears_active_state() {
        let db = test_pool().await;
        let manager = QuarantineManager::new(db, Arc::new(SystemClock));
        let account: AccountId = "+4000".into();

        manager
            .quarantine(&account, QuarantineReason::Manual, 30, None)
            .await
            .unwrap();
        assert!(manager.is_quarantined(&account).await.unwrap().is_some());

        manager.release(&account).await.unwrap();
        assert!(manager.is_quarantined(&account).await.unwrap().is_none());

        let stats = manager.stats(&account).await.unwrap();
        assert_eq!(stats.total_quarantines, 1);
    }

    #[tokio::test]
    async fn observers_are_notified_without_blocking() {
        let db = test_pool().await;
        let manager = QuarantineManager::new(db, Arc::new(SystemClock));
        let account: AccountId = "+4001".into();

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        manager
            .register_observer(move |_event| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        manager
            .quarantine(&account, QuarantineReason::HighBanRisk, 10, None)
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
