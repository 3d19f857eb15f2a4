use async_trait::async_trait;
use common::{Member, MemberStore, Result, SendOutcome, TargetId, TelegramClient};
use tracing::warn;

/// Placeholder `TelegramClient` used until a real MTProto session client is
/// wired in. Every send reports `Sent` without making network calls — this
/// exists so the binary composes and runs end-to-end against the risk,
/// quarantine, and scheduling logic. Replace with a client backed by actual
/// account sessions before pointing this at production traffic.
pub struct StubTelegramClient;

#[async_trait]
impl TelegramClient for StubTelegramClient {
    async fn send_message(
        &self,
        account_id: &str,
        target_id: TargetId,
        _text: &str,
    ) -> Result<SendOutcome> {
        warn!(
            account_id = account_id,
            target_id = target_id,
            "StubTelegramClient: no wire client configured, simulating Sent"
        );
        Ok(SendOutcome::Sent)
    }
}

/// Placeholder `MemberStore` used until the scraper's member database is
/// wired in. Always reports no known members.
pub struct StubMemberStore;

#[async_trait]
impl MemberStore for StubMemberStore {
    async fn get_member(&self, _target_id: TargetId) -> Result<Option<Member>> {
        Ok(None)
    }

    async fn get_members_batch(&self, _target_ids: &[TargetId]) -> Result<Vec<Member>> {
        Ok(Vec::new())
    }
}
