use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use campaigns::MessageStore;
use chrono::{DateTime, Timelike, Utc};
use common::{
    AccountId, CampaignId, Clock, Decision, ErrorKind, MemberStore, MessageStatus, RandomSource, RiskLevel,
    SendOutcome, TargetId, TelegramClient,
};
use risk::RiskEngine;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::gate::{AccountRateLimiter, SendGate};

/// Campaign's shared remaining-targets queue. Bounds memory to `|targets|`;
/// pop is atomic under a single mutex.
pub struct TargetQueue {
    inner: Mutex<VecDeque<TargetId>>,
}

impl TargetQueue {
    pub fn new(targets: Vec<TargetId>) -> Self {
        Self {
            inner: Mutex::new(targets.into_iter().collect()),
        }
    }

    pub async fn pop(&self) -> Option<TargetId> {
        self.inner.lock().await.pop_front()
    }

    pub async fn push_back(&self, target_id: TargetId) {
        self.inner.lock().await.push_back(target_id);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Counters flushed to the durable campaign row every 10 dispatcher
/// iterations, shared across all dispatchers of one campaign.
#[derive(Default)]
pub struct CampaignCounters {
    pub sent: AtomicU32,
    pub failed: AtomicU32,
    pub blocked: AtomicU32,
}

/// Everything dispatchers of one (campaign) share: the target queue, a
/// cooperative stop flag, the set of accounts excluded mid-run because
/// their risk turned critical, and running counters.
pub struct CampaignRuntime {
    pub campaign_id: CampaignId,
    pub queue: Arc<TargetQueue>,
    pub stop: Arc<AtomicBool>,
    pub excluded_accounts: Arc<RwLock<HashSet<AccountId>>>,
    pub counters: Arc<CampaignCounters>,
}

/// One worker per (campaign, account). Strictly sequential per account;
/// parallel across accounts of the same campaign.
pub struct AccountDispatcher {
    pub campaign_id: CampaignId,
    pub account_id: AccountId,
    pub template: String,
    pub timezone_offset: i32,
    pub max_messages_per_hour: u32,
    pub max_messages_per_account: u32,
    pub rate_limit_delay_s: f64,
    pub gate: Arc<SendGate>,
    pub risk: Arc<RiskEngine>,
    pub store: Arc<MessageStore>,
    pub telegram: Arc<dyn TelegramClient>,
    pub members: Arc<dyn MemberStore>,
    pub runtime: Arc<CampaignRuntime>,
    pub rng: Arc<dyn RandomSource>,
    pub clock: Arc<dyn Clock>,
}

impl AccountDispatcher {
    /// Runs until the target queue drains, the campaign is stopped, or this
    /// account's risk turns critical. Call via `tokio::spawn`.
    pub async fn run(self) {
        let mut limiter = AccountRateLimiter::new(self.clock.now());
        let mut iterations: u32 = 0;

        loop {
            if self.runtime.stop.load(Ordering::SeqCst) {
                info!(account_id = %self.account_id, campaign_id = %self.campaign_id, "dispatcher stopping: campaign signaled stop");
                break;
            }

            let Some(target_id) = self.runtime.queue.pop().await else {
                info!(account_id = %self.account_id, campaign_id = %self.campaign_id, "dispatcher exiting: targets exhausted");
                break;
            };

            let now = self.clock.now();
            let decision = match self
                .gate
                .can_send(
                    &self.account_id,
                    self.timezone_offset,
                    &limiter,
                    self.max_messages_per_hour,
                    self.max_messages_per_account,
                    now,
                )
                .await
            {
                Ok(d) => d,
                Err(e) => {
                    warn!(account_id = %self.account_id, error = %e, "send gate query failed; requeuing target");
                    self.runtime.queue.push_back(target_id).await;
                    continue;
                }
            };

            match decision {
                Decision::Deny { reason, .. } if reason == "quarantined" => {
                    self.runtime.queue.push_back(target_id).await;
                    info!(account_id = %self.account_id, "dispatcher exiting: account quarantined");
                    break;
                }
                Decision::Deny { reason, .. } if reason == "sleeping" => {
                    self.runtime.queue.push_back(target_id).await;
                    let wake_in = seconds_until_local_hour(now, self.timezone_offset, sleep_end_hour_hint());
                    tokio::time::sleep(std::time::Duration::from_secs(wake_in.max(1) as u64)).await;
                    continue;
                }
                Decision::Deny { .. } => {
                    info!(account_id = %self.account_id, "dispatcher exiting: account capped");
                    break;
                }
                Decision::Delay { seconds, reason } => {
                    self.runtime.queue.push_back(target_id).await;
                    warn!(account_id = %self.account_id, seconds, reason, "dispatcher delaying");
                    tokio::time::sleep(std::time::Duration::from_secs_f64(seconds.max(0.0))).await;
                    continue;
                }
                Decision::Allow { mandatory_delay_s } => {
                    self.handle_send(target_id, &mut limiter).await;
                    iterations += 1;
                    if iterations % 10 == 0 {
                        self.flush_counters().await;
                    }

                    if self.risk.get_status(&self.account_id).await.risk_level == RiskLevel::Critical {
                        self.runtime.excluded_accounts.write().await.insert(self.account_id.clone());
                        warn!(account_id = %self.account_id, "dispatcher exiting: risk turned critical");
                        break;
                    }

                    let jitter = self.rng.uniform(-1.0, 1.0);
                    let sleep_s = (mandatory_delay_s + self.rate_limit_delay_s + jitter).max(0.0);
                    tokio::time::sleep(std::time::Duration::from_secs_f64(sleep_s)).await;
                }
            }
        }

        self.flush_counters().await;
    }

    async fn handle_send(&self, target_id: TargetId, limiter: &mut AccountRateLimiter) {
        let member = match self.members.get_member(target_id).await {
            Ok(Some(m)) => m,
            Ok(None) => {
                let _ = self
                    .store
                    .mark_message_status(&self.campaign_id, target_id, MessageStatus::InvalidUser, None, None)
                    .await;
                self.runtime.counters.failed.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Err(e) => {
                warn!(account_id = %self.account_id, target_id, error = %e, "member lookup failed");
                return;
            }
        };

        let text = campaigns::TemplateEngine::render(&self.template, &member);

        match self
            .store
            .try_create_message(&self.campaign_id, target_id, &self.account_id, &text)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // A row already exists for this (campaign, target). If it's
                // terminal, a prior attempt finished and this is a genuine
                // duplicate pop — skip it. If it's still `pending`, a prior
                // attempt was interrupted (e.g. FloodWait requeue) before it
                // reached a terminal status, so this send is a resume, not a
                // duplicate — proceed using the row's own text.
                match self.store.get_message(&self.campaign_id, target_id).await {
                    Ok(Some(existing)) if !existing.status.is_terminal() => {}
                    Ok(_) => return,
                    Err(e) => {
                        warn!(account_id = %self.account_id, target_id, error = %e, "message lookup failed");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(account_id = %self.account_id, target_id, error = %e, "message persistence failed");
                return;
            }
        }

        let now = self.clock.now();
        match self.telegram.send_message(&self.account_id, target_id, &text).await {
            Ok(SendOutcome::Sent) => {
                let _ = self
                    .store
                    .mark_message_status(&self.campaign_id, target_id, MessageStatus::Sent, None, Some(now))
                    .await;
                self.risk.record_send(&self.account_id, &text, target_id).await;
                limiter.record_send(now);
                self.runtime.counters.sent.fetch_add(1, Ordering::SeqCst);
            }
            Ok(SendOutcome::FloodWait(seconds)) => {
                self.risk.record_error(&self.account_id, ErrorKind::Floodwait).await;
                self.runtime.queue.push_back(target_id).await;
                let jitter = self.rng.uniform(5.0, 15.0);
                warn!(account_id = %self.account_id, seconds, "flood wait; sleeping and requeuing target");
                tokio::time::sleep(std::time::Duration::from_secs_f64(seconds as f64 + jitter)).await;
            }
            Ok(outcome @ (SendOutcome::UserBlocked | SendOutcome::UserPrivacyRestricted)) => {
                let status = if matches!(outcome, SendOutcome::UserBlocked) {
                    MessageStatus::Blocked
                } else {
                    MessageStatus::PrivacyRestricted
                };
                let _ = self
                    .store
                    .mark_message_status(&self.campaign_id, target_id, status, None, None)
                    .await;
                self.risk.record_error(&self.account_id, ErrorKind::UserBlocked).await;
                self.runtime.counters.blocked.fetch_add(1, Ordering::SeqCst);
            }
            Ok(SendOutcome::PeerIdInvalid | SendOutcome::UserDeactivated | SendOutcome::UserBannedInChannel) => {
                let _ = self
                    .store
                    .mark_message_status(&self.campaign_id, target_id, MessageStatus::InvalidUser, None, None)
                    .await;
                self.risk.record_error(&self.account_id, ErrorKind::InvalidUser).await;
                self.runtime.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(SendOutcome::Generic(msg)) => {
                let _ = self
                    .store
                    .mark_message_status(&self.campaign_id, target_id, MessageStatus::Failed, Some(&msg), None)
                    .await;
                self.risk.record_error(&self.account_id, ErrorKind::Generic).await;
                self.runtime.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                let _ = self
                    .store
                    .mark_message_status(
                        &self.campaign_id,
                        target_id,
                        MessageStatus::Failed,
                        Some(&e.to_string()),
                        None,
                    )
                    .await;
                self.risk.record_error(&self.account_id, ErrorKind::Generic).await;
                self.runtime.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn flush_counters(&self) {
        let sent = self.runtime.counters.sent.load(Ordering::SeqCst);
        let failed = self.runtime.counters.failed.load(Ordering::SeqCst);
        let blocked = self.runtime.counters.blocked.load(Ordering::SeqCst);
        if let Err(e) = self.store.flush_counters(&self.campaign_id, sent, failed, blocked).await {
            warn!(campaign_id = %self.campaign_id, error = %e, "failed to flush campaign counters");
        }
    }
}

/// Whole-hour-offset approximation of seconds remaining until the account's
/// local clock reaches `target_hour`, consistent with the fixed-offset
/// model the activity envelope itself uses.
fn seconds_until_local_hour(now: DateTime<Utc>, timezone_offset: i32, target_hour: u32) -> i64 {
    let local_hour = (now.hour() as i32 + timezone_offset).rem_euclid(24) as u32;
    let mut hours_until = (target_hour as i32 - local_hour as i32).rem_euclid(24);
    if hours_until == 0 {
        hours_until = 24;
    }
    let seconds_left_this_hour = (60 - now.minute() as i64) * 60 - now.second() as i64;
    (hours_until as i64 - 1) * 3600 + seconds_left_this_hour
}

/// Midpoint of the sampled sleep-end range (06..08); used only to pick a
/// reasonable re-check cadence while denied for sleeping, not as a source
/// of truth for the envelope itself.
fn sleep_end_hour_hint() -> u32 {
    7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_pop_and_push_back_is_fifo() {
        let queue = TargetQueue::new(vec![1, 2, 3]);
        assert_eq!(queue.pop().await, Some(1));
        queue.push_back(1).await;
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, Some(3));
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, None);
    }

    #[test]
    fn seconds_until_local_hour_handles_wraparound() {
        use chrono::TimeZone;
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 23, 30, 0).unwrap();
        // Local hour = 23 + 5 = 28 % 24 = 4, target 7 -> 3 hours away.
        let seconds = seconds_until_local_hour(now, 5, 7);
        assert!(seconds > 0 && seconds <= 3 * 3600);
    }
}
