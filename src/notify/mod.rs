//! Operator notification channel.
//!
//! The engine never talks to a chat service directly. It pushes `Alert`s
//! into an unbounded channel; a dispatcher task drains the channel and
//! forwards each alert to a `Notifier`:
//! - `TelegramNotifier`: Bot API `sendMessage`
//! - `LogNotifier`: fallback when no chat credentials are configured
//!
//! Inbound status commands live in `commands`.

pub mod commands;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Trade,
    Warning,
    Error,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "INFO"),
            AlertLevel::Trade => write!(f, "TRADE"),
            AlertLevel::Warning => write!(f, "WARN"),
            AlertLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// One outbound operator message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub text: String,
}

impl Alert {
    /// Text as delivered to the operator.
    pub fn render(&self) -> String {
        format!("[{}] {}", self.level, self.text)
    }
}

/// Cheap, cloneable handle the engine uses to raise alerts.
///
/// Sending never blocks and never fails from the caller's point of view:
/// if the dispatcher is gone the alert is dropped with a debug log.
#[derive(Debug, Clone)]
pub struct Alerts {
    tx: mpsc::UnboundedSender<Alert>,
}

impl Alerts {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, level: AlertLevel, text: impl Into<String>) {
        let alert = Alert {
            level,
            text: text.into(),
        };
        if let Err(e) = self.tx.send(alert) {
            debug!(text = %e.0.text, "Alert dropped, dispatcher stopped");
        }
    }

    pub fn info(&self, text: impl Into<String>) {
        self.send(AlertLevel::Info, text);
    }

    pub fn trade(&self, text: impl Into<String>) {
        self.send(AlertLevel::Trade, text);
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.send(AlertLevel::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.send(AlertLevel::Error, text);
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Delivery backend for rendered alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<()>;

    fn name(&self) -> &str;
}

/// Writes alerts to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        info!(alert = %text, "Operator alert");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Forward alerts until every `Alerts` handle has been dropped.
pub async fn dispatch(mut rx: mpsc::UnboundedReceiver<Alert>, notifier: Arc<dyn Notifier>) {
    while let Some(alert) = rx.recv().await {
        let text = alert.render();
        if let Err(e) = notifier.notify(&text).await {
            warn!(notifier = notifier.name(), error = %e, "Failed to deliver alert");
        }
    }
    debug!(notifier = notifier.name(), "Alert dispatcher stopped");
}

/// Spawn the dispatcher as an independent task.
pub fn spawn_dispatcher(
    rx: mpsc::UnboundedReceiver<Alert>,
    notifier: Arc<dyn Notifier>,
) -> JoinHandle<()> {
    info!(notifier = notifier.name(), "Alert dispatcher starting");
    tokio::spawn(dispatch(rx, notifier))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
