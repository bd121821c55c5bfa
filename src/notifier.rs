use anyhow::Result;
use log::{info, warn};
use std::io::Write;
use tokio::sync::mpsc;

use crate::models::Notification;

/// Drains the notification sink into `out` until every sender is gone, so
/// messages queued before shutdown are still delivered.
/// Returns the number of delivered notifications.
pub async fn run_delivery_loop<W: Write>(mut rx: mpsc::Receiver<Notification>, mut out: W) -> usize {
    let mut delivered = 0;

    while let Some(notification) = rx.recv().await {
        match deliver(&mut out, &notification) {
            Ok(()) => delivered += 1,
            Err(e) => warn!("Failed to deliver notification to chat {}: {}", notification.chat_id, e),
        }
    }

    info!("Notification delivery stopped after {} messages", delivered);
    delivered
}

fn deliver<W: Write>(out: &mut W, notification: &Notification) -> Result<()> {
    writeln!(out, "[chat {}]\n{}\n", notification.chat_id, notification.text)?;
    out.flush()?;
    Ok(())
}
