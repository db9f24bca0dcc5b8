use crate::types::chain::{Asset, Chain};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_derive::Serialize;
use std::sync::Arc;
use strum_macros::Display;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationKind {
    DepositCredited,
    SweepAddressMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub user_handle: Option<String>,
    pub amount_usd: Option<Decimal>,
    pub asset: Asset,
    pub chain: Chain,
    pub tx_ref: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Used when no delivery channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        debug!("Notification {}: {:?}", notification.kind, notification);
        Ok(())
    }
}

/// Fire and forget, delivery failures are logged and dropped.
pub fn spawn_notify(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = notifier.clone();
    tokio::spawn(async move {
        let kind = notification.kind;
        if let Err(e) = notifier.notify(notification).await {
            warn!("Failed to deliver {} notification: {}", kind, e);
        }
    });
}
