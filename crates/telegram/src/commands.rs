use std::sync::Arc;

use campaigns::{DispatcherSpawner, MessageStore};
use common::{CampaignStatus, QuarantineReason};
use fingerprint::FingerprintRegistry;
use quarantine::QuarantineManager;
use risk::RiskEngine;
use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tracing::{info, warn};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub store: Arc<MessageStore>,
    pub risk: Arc<RiskEngine>,
    pub quarantine: Arc<QuarantineManager>,
    pub fingerprints: Arc<FingerprintRegistry>,
    pub spawner: Arc<dyn DispatcherSpawner>,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the fleet operator.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "ClawFleet operator commands:")]
pub enum Command {
    #[command(description = "List campaigns and their status")]
    Campaigns,
    #[command(description = "Show risk and quarantine status for an account: /account <id>")]
    Account(String),
    #[command(description = "Quarantine an account: /quarantine <id> <minutes> <reason>")]
    Quarantine(String),
    #[command(description = "Release an account from quarantine: /release <id>")]
    Release(String),
    #[command(description = "Pause a running campaign: /pause <id>")]
    Pause(String),
    #[command(description = "Resume a paused campaign: /resume <id>")]
    Resume(String),
    #[command(description = "Cancel a campaign: /cancel <id>")]
    Cancel(String),
}

/// Start the Telegram control bot in long-polling mode.
pub async fn start_bot(token: String, deps: BotDeps) {
    let bot = Bot::new(token);
    let deps = Arc::new(deps);

    info!("Telegram control bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Campaigns].endpoint(handle_campaigns))
        .branch(case![Command::Account(id)].endpoint(handle_account))
        .branch(case![Command::Quarantine(args)].endpoint(handle_quarantine))
        .branch(case![Command::Release(id)].endpoint(handle_release))
        .branch(case![Command::Pause(id)].endpoint(handle_pause))
        .branch(case![Command::Resume(id)].endpoint(handle_resume))
        .branch(case![Command::Cancel(id)].endpoint(handle_cancel));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_campaigns(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let campaigns = deps.store.list_campaigns(None).await?;
    if campaigns.is_empty() {
        bot.send_message(msg.chat.id, "No campaigns.").await?;
        return Ok(());
    }
    let mut text = String::from("Campaigns:\n");
    for c in campaigns {
        text.push_str(&format!(
            "{} [{}] sent={} failed={} blocked={}\n",
            c.id, c.status, c.sent_count, c.failed_count, c.blocked_count
        ));
    }
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_account(bot: Bot, msg: Message, deps: Arc<BotDeps>, account_id: String) -> HandlerResult {
    let account_id = account_id.trim().to_string();
    if account_id.is_empty() {
        bot.send_message(msg.chat.id, "Usage: /account <id>").await?;
        return Ok(());
    }

    let snapshot = deps.risk.get_status(&account_id).await;
    let quarantine_line = match deps.quarantine.is_quarantined(&account_id).await {
        Ok(Some((reason, release_at))) => format!("quarantined: {reason} until {release_at}"),
        Ok(None) => "quarantined: no".to_string(),
        Err(e) => format!("quarantined: unknown ({e})"),
    };
    let fingerprint_line = match deps.fingerprints.get_or_create(&account_id, None).await {
        Ok(fp) => format!("fingerprint: {} (rotated {}x)", fp.client_type, fp.rotation_count),
        Err(e) => format!("fingerprint: unavailable ({e})"),
    };

    let text = format!(
        "Account {account_id}\n\
         risk: {} (ban probability {:.2})\n\
         sent 1h/24h: {}/{}\n\
         errors 24h: {} (floodwait {})\n\
         diversity: {:.2}\n\
         {quarantine_line}\n\
         {fingerprint_line}",
        snapshot.risk_level,
        snapshot.ban_probability,
        snapshot.messages_sent_1h,
        snapshot.messages_sent_24h,
        snapshot.errors_24h,
        snapshot.floodwait_24h,
        snapshot.diversity_score,
    );
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_quarantine(bot: Bot, msg: Message, deps: Arc<BotDeps>, args: String) -> HandlerResult {
    let mut parts = args.splitn(3, ' ');
    let (Some(account_id), Some(minutes_str)) = (parts.next(), parts.next()) else {
        bot.send_message(msg.chat.id, "Usage: /quarantine <id> <minutes> <reason>").await?;
        return Ok(());
    };
    let Ok(minutes) = minutes_str.parse::<i64>() else {
        bot.send_message(msg.chat.id, "Duration must be a number of minutes.").await?;
        return Ok(());
    };
    let reason_text = parts.next().unwrap_or("manual operator action");

    let account_id = account_id.to_string();
    deps.quarantine
        .quarantine(&account_id, QuarantineReason::Manual, minutes, Some(reason_text.to_string()))
        .await?;
    deps.risk.set_quarantined(&account_id, true).await;

    info!(account_id = %account_id, minutes, "account manually quarantined via Telegram");
    bot.send_message(msg.chat.id, format!("{account_id} quarantined for {minutes} minutes.")).await?;
    Ok(())
}

async fn handle_release(bot: Bot, msg: Message, deps: Arc<BotDeps>, account_id: String) -> HandlerResult {
    let account_id = account_id.trim().to_string();
    if account_id.is_empty() {
        bot.send_message(msg.chat.id, "Usage: /release <id>").await?;
        return Ok(());
    }

    deps.quarantine.release(&account_id).await?;
    deps.risk.set_quarantined(&account_id, false).await;

    info!(account_id = %account_id, "account manually released via Telegram");
    bot.send_message(msg.chat.id, format!("{account_id} released from quarantine.")).await?;
    Ok(())
}

async fn handle_pause(bot: Bot, msg: Message, deps: Arc<BotDeps>, campaign_id: String) -> HandlerResult {
    let campaign_id = campaign_id.trim().to_string();
    let campaign = deps.store.get_campaign(&campaign_id).await?;
    if campaign.status != CampaignStatus::Running {
        bot.send_message(msg.chat.id, format!("Campaign {campaign_id} is not running.")).await?;
        return Ok(());
    }

    deps.store.set_status_with_auto_paused(&campaign_id, CampaignStatus::Paused, false).await?;
    deps.spawner.stop(&campaign_id).await;

    info!(campaign_id = %campaign_id, "campaign paused via Telegram");
    bot.send_message(msg.chat.id, format!("Campaign {campaign_id} paused.")).await?;
    Ok(())
}

async fn handle_resume(bot: Bot, msg: Message, deps: Arc<BotDeps>, campaign_id: String) -> HandlerResult {
    let campaign_id = campaign_id.trim().to_string();
    let campaign = deps.store.get_campaign(&campaign_id).await?;
    if campaign.status != CampaignStatus::Paused {
        bot.send_message(msg.chat.id, format!("Campaign {campaign_id} is not paused.")).await?;
        return Ok(());
    }

    deps.store.set_status(&campaign_id, CampaignStatus::Running).await?;
    deps.spawner.start(&deps.store.get_campaign(&campaign_id).await?).await;

    info!(campaign_id = %campaign_id, "campaign resumed via Telegram");
    bot.send_message(msg.chat.id, format!("Campaign {campaign_id} resumed.")).await?;
    Ok(())
}

async fn handle_cancel(bot: Bot, msg: Message, deps: Arc<BotDeps>, campaign_id: String) -> HandlerResult {
    let campaign_id = campaign_id.trim().to_string();
    deps.store.set_status(&campaign_id, CampaignStatus::Cancelled).await?;
    deps.spawner.stop(&campaign_id).await;

    info!(campaign_id = %campaign_id, "campaign cancelled via Telegram");
    bot.send_message(msg.chat.id, format!("Campaign {campaign_id} cancelled.")).await?;
    Ok(())
}

/// Send a proactive alert to all configured chat ids. Called by the
/// Supervisor or Risk Engine event loop when an account auto-quarantines.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "failed to send Telegram alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarantine_command_parses_reason_with_spaces() {
        let args = "+1555 120 flagged by manual review";
        let mut parts = args.splitn(3, ' ');
        let account_id = parts.next().unwrap();
        let minutes: i64 = parts.next().unwrap().parse().unwrap();
        let reason = parts.next().unwrap();
        assert_eq!(account_id, "+1555");
        assert_eq!(minutes, 120);
        assert_eq!(reason, "flagged by manual review");
    }
}
