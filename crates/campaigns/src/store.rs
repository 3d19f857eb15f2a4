use chrono::{DateTime, Utc};
use common::{Campaign, CampaignId, CampaignMessage, CampaignStatus, Error, MessageStatus, Result, TargetId};
use sqlx::SqlitePool;
use tracing::warn;

/// Durable `campaigns` and `campaign_messages` storage. Message inserts are
/// idempotent on `(campaign_id, target_id)`: a second attempt for the same
/// pair is rejected, so a terminal status is write-once.
#[derive(Clone)]
pub struct MessageStore {
    db: SqlitePool,
}

impl MessageStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn create_campaign(&self, campaign: &Campaign) -> Result<()> {
        let status = campaign.status.to_string();
        let target_ids = serde_json::to_string(&campaign.target_ids)?;
        let account_ids = serde_json::to_string(&campaign.account_ids)?;
        let active_days = campaign
            .active_days
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query!(
            r#"
            INSERT INTO campaigns (
                id, name, template, status, target_member_ids, account_ids,
                rate_limit_delay, max_messages_per_hour, max_messages_per_account,
                scheduled_start, scheduled_end, active_hours_start, active_hours_end,
                active_days, timezone, recurring, recurrence_interval, auto_paused,
                sent_count, failed_count, blocked_count, created_at, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            campaign.id,
            campaign.name,
            campaign.template,
            status,
            target_ids,
            account_ids,
            campaign.rate_limit_delay_s,
            campaign.max_messages_per_hour,
            campaign.max_messages_per_account,
            campaign.scheduled_start,
            campaign.scheduled_end,
            campaign.active_hours_start,
            campaign.active_hours_end,
            active_days,
            campaign.timezone,
            campaign.recurring,
            campaign.recurrence_interval_days,
            campaign.auto_paused,
            campaign.sent_count,
            campaign.failed_count,
            campaign.blocked_count,
            campaign.created_at,
            campaign.started_at,
            campaign.completed_at,
        )
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn get_campaign(&self, id: &CampaignId) -> Result<Campaign> {
        let row = sqlx::query!(
            r#"
            SELECT id, name, template, status, target_member_ids, account_ids,
                   rate_limit_delay, max_messages_per_hour, max_messages_per_account,
                   scheduled_start as "scheduled_start: DateTime<Utc>",
                   scheduled_end as "scheduled_end: DateTime<Utc>",
                   active_hours_start, active_hours_end, active_days, timezone,
                   recurring, recurrence_interval, auto_paused,
                   sent_count, failed_count, blocked_count,
                   created_at as "created_at: DateTime<Utc>",
                   started_at as "started_at: DateTime<Utc>",
                   completed_at as "completed_at: DateTime<Utc>"
            FROM campaigns WHERE id = ?
            "#,
            id
        )
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("campaign {id}")))?;

        Ok(Campaign {
            id: row.id,
            name: row.name,
            template: row.template,
            status: parse_status(&row.status),
            target_ids: serde_json::from_str(&row.target_member_ids)?,
            account_ids: serde_json::from_str(&row.account_ids)?,
            rate_limit_delay_s: row.rate_limit_delay,
            max_messages_per_hour: row.max_messages_per_hour as u32,
            max_messages_per_account: row.max_messages_per_account as u32,
            scheduled_start: row.scheduled_start,
            scheduled_end: row.scheduled_end,
            active_hours_start: row.active_hours_start.map(|v| v as u32),
            active_hours_end: row.active_hours_end.map(|v| v as u32),
            active_days: row.active_days.map(|s| serde_json::from_str(&s)).transpose()?,
            timezone: row.timezone,
            recurring: row.recurring,
            recurrence_interval_days: row.recurrence_interval,
            auto_paused: row.auto_paused,
            sent_count: row.sent_count as u32,
            failed_count: row.failed_count as u32,
            blocked_count: row.blocked_count as u32,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }

    pub async fn list_campaigns(&self, status: Option<CampaignStatus>) -> Result<Vec<Campaign>> {
        let ids: Vec<String> = match status {
            Some(s) => {
                let s = s.to_string();
                sqlx::query_scalar!("SELECT id FROM campaigns WHERE status = ?", s)
                    .fetch_all(&self.db)
                    .await?
            }
            None => sqlx::query_scalar!("SELECT id FROM campaigns").fetch_all(&self.db).await?,
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.get_campaign(&id).await?);
        }
        Ok(out)
    }

    pub async fn set_status(&self, id: &CampaignId, status: CampaignStatus) -> Result<()> {
        let status_str = status.to_string();
        sqlx::query!("UPDATE campaigns SET status = ? WHERE id = ?", status_str, id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn set_status_with_auto_paused(
        &self,
        id: &CampaignId,
        status: CampaignStatus,
        auto_paused: bool,
    ) -> Result<()> {
        let status_str = status.to_string();
        sqlx::query!(
            "UPDATE campaigns SET status = ?, auto_paused = ? WHERE id = ?",
            status_str,
            auto_paused,
            id
        )
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn mark_started(&self, id: &CampaignId, now: DateTime<Utc>) -> Result<()> {
        let status = CampaignStatus::Running.to_string();
        sqlx::query!(
            "UPDATE campaigns SET status = ?, started_at = ? WHERE id = ?",
            status,
            now,
            id
        )
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(&self, id: &CampaignId, now: DateTime<Utc>) -> Result<()> {
        let status = CampaignStatus::Completed.to_string();
        sqlx::query!(
            "UPDATE campaigns SET status = ?, completed_at = ? WHERE id = ?",
            status,
            now,
            id
        )
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Clears `recurring` on a completed campaign once its successor has
    /// been created, so the scheduler's recurrence sweep does not clone it
    /// again on every subsequent tick.
    pub async fn mark_recurrence_cloned(&self, id: &CampaignId) -> Result<()> {
        sqlx::query!("UPDATE campaigns SET recurring = 0 WHERE id = ?", id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn flush_counters(
        &self,
        id: &CampaignId,
        sent_count: u32,
        failed_count: u32,
        blocked_count: u32,
    ) -> Result<()> {
        sqlx::query!(
            "UPDATE campaigns SET sent_count = ?, failed_count = ?, blocked_count = ? WHERE id = ?",
            sent_count,
            failed_count,
            blocked_count,
            id
        )
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Insert a `pending` record for `(campaign_id, target_id)`. Returns
    /// `Ok(false)` without writing if a record already exists — the
    /// idempotency guarantee.
    pub async fn try_create_message(
        &self,
        campaign_id: &CampaignId,
        target_id: TargetId,
        account_id: &str,
        text: &str,
    ) -> Result<bool> {
        let status = MessageStatus::Pending.to_string();
        let result = sqlx::query!(
            r#"
            INSERT INTO campaign_messages (campaign_id, target_id, account_id, text, status, retry_count)
            VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT(campaign_id, target_id) DO NOTHING
            "#,
            campaign_id,
            target_id,
            account_id,
            text,
            status,
        )
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_message_status(
        &self,
        campaign_id: &CampaignId,
        target_id: TargetId,
        status: MessageStatus,
        error: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if !status.is_terminal() && status != MessageStatus::Pending {
            warn!(campaign_id = %campaign_id, target_id, "non-terminal status write ignored");
        }
        let status_str = status.to_string();
        sqlx::query!(
            r#"
            UPDATE campaign_messages
            SET status = ?, error = ?, sent_at = ?
            WHERE campaign_id = ? AND target_id = ?
            "#,
            status_str,
            error,
            sent_at,
            campaign_id,
            target_id,
        )
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn get_message(
        &self,
        campaign_id: &CampaignId,
        target_id: TargetId,
    ) -> Result<Option<CampaignMessage>> {
        let row = sqlx::query!(
            r#"
            SELECT campaign_id, target_id, account_id, text, status,
                   sent_at as "sent_at: DateTime<Utc>", error, retry_count
            FROM campaign_messages WHERE campaign_id = ? AND target_id = ?
            "#,
            campaign_id,
            target_id
        )
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| CampaignMessage {
            campaign_id: r.campaign_id,
            target_id: r.target_id,
            account_id: r.account_id,
            text: r.text,
            status: parse_message_status(&r.status),
            sent_at: r.sent_at,
            error: r.error,
            retry_count: r.retry_count as u32,
        }))
    }
}

fn parse_status(raw: &str) -> CampaignStatus {
    match raw {
        "draft" => CampaignStatus::Draft,
        "queued" => CampaignStatus::Queued,
        "running" => CampaignStatus::Running,
        "paused" => CampaignStatus::Paused,
        "completed" => CampaignStatus::Completed,
        "cancelled" => CampaignStatus::Cancelled,
        _ => CampaignStatus::Error,
    }
}

fn parse_message_status(raw: &str) -> MessageStatus {
    match raw {
        "sent" => MessageStatus::Sent,
        "failed" => MessageStatus::Failed,
        "blocked" => MessageStatus::Blocked,
        "privacy_restricted" => MessageStatus::PrivacyRestricted,
        "invalid_user" => MessageStatus::InvalidUser,
        "rate_limited" => MessageStatus::RateLimited,
        _ => MessageStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AccountId;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_campaign() -> Campaign {
        Campaign {
            id: "c1".into(),
            name: "Launch".into(),
            template: "Hello {first_name}, welcome!".into(),
            status: CampaignStatus::Draft,
            target_ids: vec![1, 2, 3],
            account_ids: vec!["+1".to_string()],
            rate_limit_delay_s: 1.0,
            max_messages_per_hour: 100,
            max_messages_per_account: 1000,
            scheduled_start: None,
            scheduled_end: None,
            active_hours_start: None,
            active_hours_end: None,
            active_days: None,
            timezone: "UTC".into(),
            recurring: false,
            recurrence_interval_days: None,
            auto_paused: false,
            sent_count: 0,
            failed_count: 0,
            blocked_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn duplicate_message_insert_is_rejected() {
        let db = test_pool().await;
        let store = MessageStore::new(db);
        store.create_campaign(&sample_campaign()).await.unwrap();

        let account: AccountId = "+1".into();
        let first = store.try_create_message(&"c1".to_string(), 1, &account, "Hi").await.unwrap();
        let second = store.try_create_message(&"c1".to_string(), 1, &account, "Hi again").await.unwrap();

        assert!(first);
        assert!(!second, "second insert for the same (campaign, target) must be rejected");
    }

    #[tokio::test]
    async fn campaign_round_trips_through_storage() {
        let db = test_pool().await;
        let store = MessageStore::new(db);
        let campaign = sample_campaign();
        store.create_campaign(&campaign).await.unwrap();

        let loaded = store.get_campaign(&campaign.id).await.unwrap();
        assert_eq!(loaded.name, campaign.name);
        assert_eq!(loaded.target_ids, campaign.target_ids);
    }
}
