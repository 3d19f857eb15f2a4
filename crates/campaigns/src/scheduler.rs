use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use common::{Campaign, CampaignId, CampaignStatus, Clock, Result};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::store::MessageStore;

/// Hook the scheduler calls to actually bring a campaign's dispatchers up
/// or down. Implemented by the dispatch crate; kept here as a trait object
/// so `campaigns` never depends on `dispatch`.
#[async_trait]
pub trait DispatcherSpawner: Send + Sync {
    async fn start(&self, campaign: &Campaign);
    async fn stop(&self, campaign_id: &CampaignId);
}

/// Single supervisor loop for campaign lifecycle, run at 1/60 Hz.
pub struct CampaignScheduler {
    store: MessageStore,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn DispatcherSpawner>,
}

impl CampaignScheduler {
    pub fn new(store: MessageStore, clock: Arc<dyn Clock>, spawner: Arc<dyn DispatcherSpawner>) -> Self {
        Self { store, clock, spawner }
    }

    pub async fn tick(&self) {
        let now = self.clock.now();

        if let Err(e) = self.start_scheduled(now).await {
            error!(error = %e, "scheduler: start_scheduled failed");
        }
        if let Err(e) = self.gate_active_hours(now).await {
            error!(error = %e, "scheduler: gate_active_hours failed");
        }
        if let Err(e) = self.resume_paused(now).await {
            error!(error = %e, "scheduler: resume_paused failed");
        }
        if let Err(e) = self.recreate_recurring(now).await {
            error!(error = %e, "scheduler: recreate_recurring failed");
        }
    }

    async fn start_scheduled(&self, now: DateTime<Utc>) -> Result<()> {
        for campaign in self.store.list_campaigns(Some(CampaignStatus::Queued)).await? {
            let due = campaign.scheduled_start.map_or(true, |s| s <= now);
            if due && is_within_active_hours(&campaign, now) {
                self.store.mark_started(&campaign.id, now).await?;
                let mut started = campaign.clone();
                started.status = CampaignStatus::Running;
                started.started_at = Some(now);
                info!(campaign_id = %started.id, "campaign started");
                self.spawner.start(&started).await;
            }
        }
        Ok(())
    }

    async fn gate_active_hours(&self, now: DateTime<Utc>) -> Result<()> {
        for campaign in self.store.list_campaigns(Some(CampaignStatus::Running)).await? {
            if let Some(end) = campaign.scheduled_end {
                if now >= end {
                    self.store.mark_completed(&campaign.id, now).await?;
                    self.spawner.stop(&campaign.id).await;
                    info!(campaign_id = %campaign.id, "campaign completed: scheduled_end reached");
                    continue;
                }
            }
            if !is_within_active_hours(&campaign, now) {
                self.store
                    .set_status_with_auto_paused(&campaign.id, CampaignStatus::Paused, true)
                    .await?;
                self.spawner.stop(&campaign.id).await;
                warn!(campaign_id = %campaign.id, "campaign auto-paused: outside active hours");
            }
        }
        Ok(())
    }

    async fn resume_paused(&self, now: DateTime<Utc>) -> Result<()> {
        for campaign in self.store.list_campaigns(Some(CampaignStatus::Paused)).await? {
            if campaign.auto_paused && is_within_active_hours(&campaign, now) {
                self.store
                    .set_status_with_auto_paused(&campaign.id, CampaignStatus::Running, false)
                    .await?;
                let mut resumed = campaign.clone();
                resumed.status = CampaignStatus::Running;
                info!(campaign_id = %resumed.id, "campaign resumed: back within active hours");
                self.spawner.start(&resumed).await;
            }
        }
        Ok(())
    }

    async fn recreate_recurring(&self, now: DateTime<Utc>) -> Result<()> {
        for campaign in self.store.list_campaigns(Some(CampaignStatus::Completed)).await? {
            if !campaign.recurring {
                continue;
            }
            let Some(interval_days) = campaign.recurrence_interval_days else {
                continue;
            };
            let Some(completed_at) = campaign.completed_at else {
                continue;
            };
            let due_at = completed_at + chrono::Duration::days(interval_days);
            if due_at <= now {
                let next = recreate_recurring_campaign(&campaign, now, interval_days);
                self.store.create_campaign(&next).await?;
                // The clone carries `recurring` forward for its own future
                // cycle; the original must stop matching this sweep or it
                // would be recreated again on every subsequent tick.
                self.store.mark_recurrence_cloned(&campaign.id).await?;
                info!(
                    original_id = %campaign.id,
                    next_id = %next.id,
                    "recurring campaign recreated"
                );
            }
        }
        Ok(())
    }
}

/// Copies template/target/account lists and schedule fields verbatim into
/// a fresh draft, with a new id and `scheduled_start = now + interval`.
fn recreate_recurring_campaign(campaign: &Campaign, now: DateTime<Utc>, interval_days: i64) -> Campaign {
    Campaign {
        id: Uuid::new_v4().to_string(),
        name: campaign.name.clone(),
        template: campaign.template.clone(),
        status: CampaignStatus::Queued,
        target_ids: campaign.target_ids.clone(),
        account_ids: campaign.account_ids.clone(),
        rate_limit_delay_s: campaign.rate_limit_delay_s,
        max_messages_per_hour: campaign.max_messages_per_hour,
        max_messages_per_account: campaign.max_messages_per_account,
        scheduled_start: Some(now + chrono::Duration::days(interval_days)),
        scheduled_end: campaign.scheduled_end,
        active_hours_start: campaign.active_hours_start,
        active_hours_end: campaign.active_hours_end,
        active_days: campaign.active_days.clone(),
        timezone: campaign.timezone.clone(),
        recurring: campaign.recurring,
        recurrence_interval_days: campaign.recurrence_interval_days,
        auto_paused: false,
        sent_count: 0,
        failed_count: 0,
        blocked_count: 0,
        created_at: now,
        started_at: None,
        completed_at: None,
    }
}

fn is_within_active_hours(campaign: &Campaign, now: DateTime<Utc>) -> bool {
    let tz: chrono_tz::Tz = campaign.timezone.parse().unwrap_or(chrono_tz::UTC);
    let local = now.with_timezone(&tz);

    if let Some(days) = &campaign.active_days {
        if !days.is_empty() && !days.contains(&local.weekday().num_days_from_monday()) {
            return false;
        }
    }

    match (campaign.active_hours_start, campaign.active_hours_end) {
        (Some(start), Some(end)) => {
            let hour = local.hour();
            if start <= end {
                hour >= start && hour < end
            } else {
                hour >= start || hour < end
            }
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    fn base_campaign() -> Campaign {
        Campaign {
            id: "c1".into(),
            name: "Test".into(),
            template: "Hello {name}, welcome to the family!".into(),
            status: CampaignStatus::Queued,
            target_ids: vec![1],
            account_ids: vec!["+1".into()],
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

    #[test]
    fn overnight_window_wraps_across_midnight() {
        let mut c = base_campaign();
        c.active_hours_start = Some(22);
        c.active_hours_end = Some(6);

        let inside = Utc.with_ymd_and_hms(2026, 1, 1, 23, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert!(is_within_active_hours(&c, inside));
        assert!(!is_within_active_hours(&c, outside));
    }

    #[test]
    fn day_window_excludes_outside_range() {
        let mut c = base_campaign();
        c.active_hours_start = Some(9);
        c.active_hours_end = Some(17);

        let inside = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 1, 1, 20, 0, 0).unwrap();
        assert!(is_within_active_hours(&c, inside));
        assert!(!is_within_active_hours(&c, outside));
    }

    struct CountingSpawner {
        starts: AsyncMutex<Vec<CampaignId>>,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl DispatcherSpawner for CountingSpawner {
        async fn start(&self, campaign: &Campaign) {
            self.starts.lock().await.push(campaign.id.clone());
        }
        async fn stop(&self, _campaign_id: &CampaignId) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn test_store() -> MessageStore {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
        MessageStore::new(pool)
    }

    #[tokio::test]
    async fn due_queued_campaign_starts_on_tick() {
        let store = test_store().await;
        let mut campaign = base_campaign();
        campaign.scheduled_start = Some(Utc::now() - chrono::Duration::seconds(5));
        store.create_campaign(&campaign).await.unwrap();

        let spawner = Arc::new(CountingSpawner {
            starts: AsyncMutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        });
        let scheduler = CampaignScheduler::new(store, Arc::new(SystemClock), spawner.clone());
        scheduler.tick().await;

        assert_eq!(spawner.starts.lock().await.as_slice(), ["c1".to_string()]);
    }
}
