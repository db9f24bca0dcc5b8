use crate::types::notification::{Notification, NotificationKind, Notifier};
use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::Bot;
use tracing::warn;

/// Posts plain-text custody events to the operator chats.
pub struct TelegramNotifier {
    bot: Bot,
    admin_chat_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, admin_chat_ids: Vec<i64>) -> Self {
        Self { bot, admin_chat_ids }
    }
}

pub fn format_notification(notification: &Notification) -> String {
    let who = notification.user_handle.as_deref().unwrap_or("unknown user");
    match notification.kind {
        NotificationKind::DepositCredited => {
            let amount = notification
                .amount_usd
                .map(|usd| format!("${}", usd.round_dp(2)))
                .unwrap_or_else(|| "?".to_string());
            format!(
                "Deposit credited: {} {} on {} for {}\ntx: {}",
                amount, notification.asset, notification.chain, who, notification.tx_ref
            )
        }
        NotificationKind::SweepAddressMismatch => format!(
            "SWEEP HALTED: derived address mismatch on {} ({})\n{}",
            notification.chain, notification.asset, notification.tx_ref
        ),
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let text = format_notification(&notification);
        for chat_id in &self.admin_chat_ids {
            if let Err(e) = self.bot.send_message(ChatId(*chat_id), text.clone()).await {
                warn!("Telegram delivery to {} failed: {}", chat_id, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chain::{Asset, Chain};
    use rust_decimal_macros::dec;

    #[test]
    fn test_formats_deposit_credited() {
        let text = format_notification(&Notification {
            kind: NotificationKind::DepositCredited,
            user_handle: Some("alice".to_string()),
            amount_usd: Some(dec!(5.004)),
            asset: Asset::Usdc,
            chain: Chain::Base,
            tx_ref: "0xabc".to_string(),
        });
        assert_eq!(text, "Deposit credited: $5.00 USDC on base for alice\ntx: 0xabc");
    }

    #[test]
    fn test_formats_mismatch() {
        let text = format_notification(&Notification {
            kind: NotificationKind::SweepAddressMismatch,
            user_handle: None,
            amount_usd: None,
            asset: Asset::Sol,
            chain: Chain::Solana,
            tx_ref: "deposit address 7".to_string(),
        });
        assert!(text.starts_with("SWEEP HALTED"));
        assert!(text.contains("solana"));
    }
}
