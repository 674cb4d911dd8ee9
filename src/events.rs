use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Events emitted by the ledger engine after a successful commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    StockAdjusted {
        company: i64,
        product: i64,
        inventory_id: i64,
        movement_id: i64,
        delta: Decimal,
        new_balance: Decimal,
        timestamp: DateTime<Utc>,
    },
    StockBatchAdjusted {
        company: i64,
        inventory_id: i64,
        lines: usize,
        timestamp: DateTime<Utc>,
    },
    InventoryHeaderCreated {
        company: i64,
        inventory_id: i64,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously. Delivery is best-effort; callers log
    /// and continue on failure since the adjustment itself already committed.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Consumes events from the channel and logs them. Runs until every sender
/// is dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::StockAdjusted {
                company,
                product,
                inventory_id,
                delta,
                new_balance,
                ..
            } => info!(
                company,
                product, inventory_id, %delta, %new_balance, "stock adjusted"
            ),
            Event::StockBatchAdjusted {
                company,
                inventory_id,
                lines,
                ..
            } => info!(company, inventory_id, lines, "stock batch adjusted"),
            Event::InventoryHeaderCreated {
                company,
                inventory_id,
                ..
            } => info!(company, inventory_id, "inventory header created"),
        }
    }
    warn!("event channel closed; processor exiting");
}
