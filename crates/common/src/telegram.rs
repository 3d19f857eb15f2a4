use async_trait::async_trait;

use crate::{Member, Result, SendOutcome, TargetId};

/// Abstraction over the Telegram MTProto client used to actually deliver
/// messages. Production binaries wire this to whatever client library holds
/// the account sessions; tests use a scripted fake.
///
/// Only the `AccountDispatcher` in `crates/dispatch` should hold a reference
/// to a `dyn TelegramClient`. All sends must go through the Send Gate first.
#[async_trait]
pub trait TelegramClient: Send + Sync {
    /// Send a text message from `account_id` to `target_id`.
    async fn send_message(
        &self,
        account_id: &str,
        target_id: TargetId,
        text: &str,
    ) -> Result<SendOutcome>;
}

/// Abstraction over wherever scraped member profiles live (a prior-stage
/// scraper's own store). The core never scrapes; it only reads from here.
#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn get_member(&self, target_id: TargetId) -> Result<Option<Member>>;

    async fn get_members_batch(&self, target_ids: &[TargetId]) -> Result<Vec<Member>>;
}
