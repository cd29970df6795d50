//! Inbound operator commands.
//!
//! Answers status queries from the configured chat using the latest
//! engine snapshot. Nothing here can change engine state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::telegram::TelegramClient;
use crate::engine::EngineSnapshot;

/// Long-poll hold time for `getUpdates`.
const POLL_HOLD_SECS: u64 = 30;

/// Pause after a failed poll.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Render the reply to a chat command, or `None` for unknown input.
pub fn render_command(text: &str, snapshot: &EngineSnapshot) -> Option<String> {
    // "/status@MyBot args" → "/status"
    let command = text.split_whitespace().next()?.split('@').next()?;

    let reply = match command {
        "/start" => format!(
            "{} is running{}.\nCommands: /status /positions /budget",
            snapshot.agent_name,
            if snapshot.dry_run { " (dry run)" } else { "" }
        ),
        "/status" => {
            let mut out = format!(
                "Open positions: {}\nTotal invested: {:.6} ETH\nTicks: {} ({} failed)\nUpdated: {}",
                snapshot.positions.len(),
                snapshot.total_invested,
                snapshot.ticks,
                snapshot.failed_ticks,
                snapshot.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            );
            for p in &snapshot.positions {
                out.push_str(&format!(
                    "\n- {} qty {:.6} entry {:.6} ETH",
                    p.token,
                    p.whole_tokens(),
                    p.entry_value
                ));
            }
            out
        }
        "/positions" => {
            if snapshot.positions.is_empty() {
                "No open positions.".to_string()
            } else {
                snapshot
                    .positions
                    .iter()
                    .map(|p| {
                        format!(
                            "{} qty {:.6} entry {:.6} ETH ratio {} opened {}",
                            p.token,
                            p.whole_tokens(),
                            p.entry_value,
                            p.entry_ratio,
                            p.opened_at.format("%Y-%m-%d %H:%M"),
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        "/budget" => {
            let b = &snapshot.budget;
            let fee_cap = b
                .fee_cap
                .map(|c| format!("{c:.6} ETH"))
                .unwrap_or_else(|| "none".to_string());
            format!(
                "Period {} ({})\nTrades: {}/{} used, {} left\nTrade size: {:.6} ETH\nInvested: {:.6} ETH\nFees: {:.6} ETH (cap {})",
                b.period,
                b.status,
                b.trades_used,
                b.max_trades,
                b.trades_remaining,
                b.trade_size,
                b.invested,
                b.fees,
                fee_cap,
            )
        }
        _ => return None,
    };
    Some(reply)
}

/// Long-polls Telegram for commands and replies from the snapshot channel.
pub struct CommandListener {
    client: Arc<TelegramClient>,
    snapshots: watch::Receiver<EngineSnapshot>,
}

impl CommandListener {
    pub fn new(client: Arc<TelegramClient>, snapshots: watch::Receiver<EngineSnapshot>) -> Self {
        Self { client, snapshots }
    }

    /// Run forever. Spawn this as its own task.
    pub async fn run(self) {
        if let Err(e) = self.client.delete_webhook().await {
            warn!(error = %e, "Failed to clear Telegram webhook");
        }
        info!("Command listener started");

        let mut offset = 0i64;
        loop {
            let updates = match self.client.get_updates(offset, POLL_HOLD_SECS).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Telegram getUpdates failed");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                if message.chat.id.to_string() != self.client.chat_id() {
                    debug!(chat_id = message.chat.id, "Ignoring message from unknown chat");
                    continue;
                }
                let Some(text) = message.text else {
                    continue;
                };

                let reply = {
                    let snapshot = self.snapshots.borrow();
                    render_command(&text, &snapshot)
                };
                let Some(reply) = reply else {
                    continue;
                };
                if let Err(e) = self.client.send_message(self.client.chat_id(), &reply).await {
                    warn!(error = %e, "Failed to answer command");
                }
            }
        }
    }
}
