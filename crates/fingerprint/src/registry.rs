use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use common::{AccountId, Clock, Fingerprint, RandomSource, RiskLevel};
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::info;

use crate::pool;

/// Issues and rotates per-account Telegram client fingerprints, durable
/// across restarts via the `fingerprints` table.
pub struct FingerprintRegistry {
    db: SqlitePool,
    cache: RwLock<HashMap<AccountId, Fingerprint>>,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RandomSource>,
    max_age_days: i64,
}

impl FingerprintRegistry {
    pub fn new(
        db: SqlitePool,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RandomSource>,
        max_age_days: i64,
    ) -> Self {
        Self {
            db,
            cache: RwLock::new(HashMap::new()),
            clock,
            rng,
            max_age_days,
        }
    }

    pub async fn get_or_create(
        &self,
        account_id: &AccountId,
        preferred_client_type: Option<common::ClientType>,
    ) -> common::Result<Fingerprint> {
        if let Some(existing) = self.cache.read().await.get(account_id) {
            return Ok(existing.clone());
        }

        if let Some(row) = self.load(account_id).await? {
            self.cache.write().await.insert(account_id.clone(), row.clone());
            return Ok(row);
        }

        let client_type = preferred_client_type.unwrap_or_else(|| pool::sample_client_type(self.rng.as_ref()));
        let device = pool::sample_device(client_type, self.rng.as_ref());
        let (lang_code, system_lang_code, timezone_offset) =
            pool::sample_language_and_offset(self.rng.as_ref());
        let now = self.clock.now();

        let fingerprint = Fingerprint {
            account_id: account_id.clone(),
            client_type,
            device_model: device.model.to_string(),
            system_version: device.system_version.to_string(),
            app_version: device.app_version.to_string(),
            lang_code: lang_code.to_string(),
            system_lang_code: system_lang_code.to_string(),
            layer: pool::DEFAULT_LAYER,
            timezone_offset,
            created_at: now,
            last_rotated_at: now,
            rotation_count: 0,
        };

        self.persist(&fingerprint).await?;
        self.cache.write().await.insert(account_id.clone(), fingerprint.clone());
        info!(account_id = %account_id, client_type = %client_type, "fingerprint created");
        Ok(fingerprint)
    }

    /// New device within the same client type; language is preserved.
    pub async fn rotate(&self, account_id: &AccountId) -> common::Result<Fingerprint> {
        let current = self.get_or_create(account_id, None).await?;
        self.rotate_to_type(account_id, current.client_type, true).await
    }

    pub async fn rotate_to_type(
        &self,
        account_id: &AccountId,
        new_type: common::ClientType,
        preserve_language: bool,
    ) -> common::Result<Fingerprint> {
        let current = self.get_or_create(account_id, None).await?;
        let device = pool::sample_device(new_type, self.rng.as_ref());
        let now = self.clock.now();

        let (lang_code, system_lang_code, timezone_offset) = if preserve_language {
            (current.lang_code.clone(), current.system_lang_code.clone(), current.timezone_offset)
        } else {
            let (l, s, o) = pool::sample_language_and_offset(self.rng.as_ref());
            (l.to_string(), s.to_string(), o)
        };

        let rotated = Fingerprint {
            account_id: account_id.clone(),
            client_type: new_type,
            device_model: device.model.to_string(),
            system_version: device.system_version.to_string(),
            app_version: device.app_version.to_string(),
            lang_code,
            system_lang_code,
            layer: pool::DEFAULT_LAYER,
            timezone_offset,
            created_at: current.created_at,
            last_rotated_at: now,
            rotation_count: current.rotation_count + 1,
        };

        self.persist(&rotated).await?;
        self.cache.write().await.insert(account_id.clone(), rotated.clone());
        info!(account_id = %account_id, client_type = %new_type, rotation_count = rotated.rotation_count, "fingerprint rotated");
        Ok(rotated)
    }

    pub async fn cycle_type(&self, account_id: &AccountId) -> common::Result<Fingerprint> {
        let current = self.get_or_create(account_id, None).await?;
        self.rotate_to_type(account_id, current.client_type.next_in_cycle(), true).await
    }

    /// `safe/low` → no-op, `moderate` → rotate, `high/critical` → cycle type.
    pub async fn smart_rotate(
        &self,
        account_id: &AccountId,
        risk_level: RiskLevel,
    ) -> common::Result<Fingerprint> {
        match risk_level {
            RiskLevel::Safe | RiskLevel::Low => self.get_or_create(account_id, None).await,
            RiskLevel::Moderate => self.rotate(account_id).await,
            RiskLevel::High | RiskLevel::Critical | RiskLevel::Quarantined => {
                self.cycle_type(account_id).await
            }
        }
    }

    /// Called on each tick by the Supervisor: rotates any fingerprint whose
    /// age has crossed `max_age_days`.
    pub async fn auto_rotate_if_stale(&self, account_id: &AccountId) -> common::Result<Option<Fingerprint>> {
        let current = self.get_or_create(account_id, None).await?;
        let now = self.clock.now();
        if current.is_due_for_rotation(now, self.max_age_days) {
            Ok(Some(self.rotate(account_id).await?))
        } else {
            Ok(None)
        }
    }

    /// All account ids with a cached or persisted fingerprint.
    pub async fn known_accounts(&self) -> common::Result<Vec<AccountId>> {
        let rows = sqlx::query_scalar!("SELECT account_id FROM fingerprints")
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }

    async fn load(&self, account_id: &AccountId) -> common::Result<Option<Fingerprint>> {
        let row = sqlx::query!(
            r#"
            SELECT account_id, client_type, device_model, system_version, app_version,
                   lang_code, system_lang_code, layer, timezone_offset,
                   created_at as "created_at: chrono::DateTime<Utc>",
                   last_rotated_at as "last_rotated_at: chrono::DateTime<Utc>",
                   rotation_count
            FROM fingerprints WHERE account_id = ?
            "#,
            account_id
        )
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let client_type = match row.client_type.as_str() {
            "android" => common::ClientType::Android,
            "ios" => common::ClientType::Ios,
            _ => common::ClientType::Desktop,
        };

        Ok(Some(Fingerprint {
            account_id: row.account_id,
            client_type,
            device_model: row.device_model,
            system_version: row.system_version,
            app_version: row.app_version,
            lang_code: row.lang_code,
            system_lang_code: row.system_lang_code,
            layer: row.layer as u32,
            timezone_offset: row.timezone_offset as i32,
            created_at: row.created_at,
            last_rotated_at: row.last_rotated_at,
            rotation_count: row.rotation_count as u32,
        }))
    }

    async fn persist(&self, fp: &Fingerprint) -> common::Result<()> {
        let client_type = fp.client_type.to_string();
        sqlx::query!(
            r#"
            INSERT INTO fingerprints
                (account_id, client_type, device_model, system_version, app_version,
                 lang_code, system_lang_code, layer, timezone_offset,
                 created_at, last_rotated_at, rotation_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                client_type = excluded.client_type,
                device_model = excluded.device_model,
                system_version = excluded.system_version,
                app_version = excluded.app_version,
                lang_code = excluded.lang_code,
                system_lang_code = excluded.system_lang_code,
                layer = excluded.layer,
                timezone_offset = excluded.timezone_offset,
                last_rotated_at = excluded.last_rotated_at,
                rotation_count = excluded.rotation_count
            "#,
            fp.account_id,
            client_type,
            fp.device_model,
            fp.system_version,
            fp.app_version,
            fp.lang_code,
            fp.system_lang_code,
            fp.layer,
            fp.timezone_offset,
            fp.created_at,
            fp.last_rotated_at,
            fp.rotation_count,
        )
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SystemClock;

    struct FixedRandom(f64);
    impl RandomSource for FixedRandom {
        fn uniform(&self, lo: f64, hi: f64) -> f64 {
            lo + (hi - lo) * self.0
        }
        fn bernoulli(&self, p: f64) -> bool {
            self.0 < p
        }
        fn index(&self, len: usize) -> usize {
            ((self.0 * len as f64) as usize).min(len.saturating_sub(1))
        }
    }

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn rotate_increments_count_and_updates_timestamp() {
        let db = test_pool().await;
        let registry = FingerprintRegistry::new(
            db,
            Arc::new(SystemClock),
            Arc::new(FixedRandom(0.1)),
            14,
        );
        let account: AccountId = "+2000".into();

        let original = registry.get_or_create(&account, None).await.unwrap();
        let rotated = registry.rotate(&account).await.unwrap();

        assert_eq!(rotated.rotation_count, original.rotation_count + 1);
        assert_eq!(rotated.lang_code, original.lang_code);
    }

    #[tokio::test]
    async fn cycle_type_advances_android_ios_desktop() {
        let db = test_pool().await;
        let registry = FingerprintRegistry::new(
            db,
            Arc::new(SystemClock),
            Arc::new(FixedRandom(0.01)),
            14,
        );
        let account: AccountId = "+2001".into();

        let original = registry
            .get_or_create(&account, Some(common::ClientType::Android))
            .await
            .unwrap();
        let cycled = registry.cycle_type(&account).await.unwrap();

        assert_eq!(original.client_type, common::ClientType::Android);
        assert_eq!(cycled.client_type, common::ClientType::Ios);
    }
}
