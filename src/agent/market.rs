use crate::{
    bus::{Envelope, Mailbox, MessageBus, MessageKind},
    discovery::Directory,
    error::Result,
    model::{AgentId, Capability, Catalog, CorrelationId},
    protocol,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Bookkeeping only: stock is never decremented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub delivery: AgentId,
    pub correlation: CorrelationId,
    pub items: Vec<String>,
    pub cost: f64,
    pub recorded_at: DateTime<Utc>,
}

pub struct MarketAgent {
    id: AgentId,
    catalog: Catalog,
    bus: MessageBus,
    mailbox: Mailbox,
    ledger: Arc<Mutex<Vec<PurchaseRecord>>>,
}

impl MarketAgent {
    pub fn new(id: AgentId, catalog: Catalog, bus: &MessageBus, directory: &dyn Directory) -> Result<Self> {
        catalog.validate()?;
        let mailbox = bus.open_mailbox(id.clone())?;
        directory.register(&id, Capability::Market);

        tracing::info!(market = %id, "Open for business! Current stock is: {}", protocol::encode_catalog(&catalog));
        Ok(Self {
            id,
            catalog,
            bus: bus.clone(),
            mailbox,
            ledger: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn spawn(self) -> MarketHandle {
        let id = self.id.clone();
        let ledger = Arc::clone(&self.ledger);
        let join = tokio::spawn(self.run());
        MarketHandle { id, ledger, join }
    }

    pub async fn run(mut self) {
        while let Some(envelope) = self.mailbox.recv().await {
            self.handle(envelope);
        }
        tracing::debug!(market = %self.id, "Market closed");
    }

    fn handle(&self, envelope: Envelope) {
        match envelope.kind {
            MessageKind::StockQuery => {
                let reply = envelope.reply(MessageKind::StockReply, protocol::encode_catalog(&self.catalog));
                tracing::debug!(market = %self.id, delivery = %envelope.sender, "Replied with stock");
                self.bus.send_or_log(reply);
            }
            MessageKind::Purchase => {
                let items = protocol::decode_items(&envelope.content).unwrap_or_else(|e| {
                    tracing::warn!(market = %self.id, "Unreadable purchase from {}: {}", envelope.sender, e);
                    Vec::new()
                });
                self.record_purchase(&envelope, items);
                self.bus.send_or_log(envelope.reply(MessageKind::PurchaseAck, ""));
            }
            kind => {
                tracing::warn!(market = %self.id, %kind, "Ignoring unexpected message from {}", envelope.sender);
            }
        }
    }

    fn record_purchase(&self, envelope: &Envelope, items: Vec<String>) {
        let mut cost = 0.0;
        for item in &items {
            match self.catalog.price(item) {
                Some(price) => cost += price,
                None => tracing::warn!(market = %self.id, %item, "Purchase lists an item not in stock"),
            }
        }

        tracing::info!(
            market = %self.id,
            delivery = %envelope.sender,
            "Sold {:?} for {:.2}",
            items,
            cost
        );
        self.ledger.lock().push(PurchaseRecord {
            delivery: envelope.sender.clone(),
            correlation: envelope.correlation.clone(),
            items,
            cost,
            recorded_at: Utc::now(),
        });
    }
}

pub struct MarketHandle {
    pub id: AgentId,
    ledger: Arc<Mutex<Vec<PurchaseRecord>>>,
    join: JoinHandle<()>,
}

impl MarketHandle {
    /// Waits for the market loop to end (its mailbox must be closed first).
    pub async fn join(self) -> Vec<PurchaseRecord> {
        if let Err(e) = self.join.await {
            tracing::warn!(market = %self.id, "Market task failed: {}", e);
        }
        let purchases = self.ledger.lock().clone();
        purchases
    }
}
