use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use campaigns::{DispatcherSpawner, MessageStore};
use common::{Campaign, CampaignId, Clock, MemberStore, RandomSource, TelegramClient};
use fingerprint::FingerprintRegistry;
use risk::RiskEngine;
use tokio::sync::RwLock;
use tracing::info;

use crate::dispatcher::{AccountDispatcher, CampaignCounters, CampaignRuntime, TargetQueue};
use crate::gate::SendGate;

/// Bridges the campaign scheduler to live dispatcher tasks. Implements
/// `campaigns::DispatcherSpawner` so `campaigns` never has to depend on
/// this crate.
pub struct FleetDispatcherSpawner {
    store: Arc<MessageStore>,
    gate: Arc<SendGate>,
    risk: Arc<RiskEngine>,
    fingerprints: Arc<FingerprintRegistry>,
    telegram: Arc<dyn TelegramClient>,
    members: Arc<dyn MemberStore>,
    rng: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
    runtimes: RwLock<HashMap<CampaignId, Arc<CampaignRuntime>>>,
}

impl FleetDispatcherSpawner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MessageStore>,
        gate: Arc<SendGate>,
        risk: Arc<RiskEngine>,
        fingerprints: Arc<FingerprintRegistry>,
        telegram: Arc<dyn TelegramClient>,
        members: Arc<dyn MemberStore>,
        rng: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gate,
            risk,
            fingerprints,
            telegram,
            members,
            rng,
            clock,
            runtimes: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DispatcherSpawner for FleetDispatcherSpawner {
    async fn start(&self, campaign: &Campaign) {
        let runtime = Arc::new(CampaignRuntime {
            campaign_id: campaign.id.clone(),
            queue: Arc::new(TargetQueue::new(campaign.target_ids.clone())),
            stop: Arc::new(AtomicBool::new(false)),
            excluded_accounts: Arc::new(RwLock::new(HashSet::new())),
            counters: Arc::new(CampaignCounters::default()),
        });
        self.runtimes.write().await.insert(campaign.id.clone(), runtime.clone());

        for account_id in &campaign.account_ids {
            let fingerprint = match self.fingerprints.get_or_create(account_id, None).await {
                Ok(fp) => fp,
                Err(e) => {
                    tracing::warn!(account_id = %account_id, error = %e, "skipping account: fingerprint lookup failed");
                    continue;
                }
            };

            let dispatcher = AccountDispatcher {
                campaign_id: campaign.id.clone(),
                account_id: account_id.clone(),
                template: campaign.template.clone(),
                timezone_offset: fingerprint.timezone_offset,
                max_messages_per_hour: campaign.max_messages_per_hour,
                max_messages_per_account: campaign.max_messages_per_account,
                rate_limit_delay_s: campaign.rate_limit_delay_s,
                gate: self.gate.clone(),
                risk: self.risk.clone(),
                store: self.store.clone(),
                telegram: self.telegram.clone(),
                members: self.members.clone(),
                runtime: runtime.clone(),
                rng: self.rng.clone(),
                clock: self.clock.clone(),
            };

            info!(campaign_id = %campaign.id, account_id = %account_id, "starting account dispatcher");
            tokio::spawn(dispatcher.run());
        }
    }

    async fn stop(&self, campaign_id: &CampaignId) {
        if let Some(runtime) = self.runtimes.read().await.get(campaign_id) {
            runtime.stop.store(true, Ordering::SeqCst);
            info!(campaign_id = %campaign_id, "signaled dispatchers to stop");
        }
    }
}
