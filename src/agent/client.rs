use crate::{
    bus::{Envelope, Mailbox, MessageBus, MessageKind, Received},
    config::AppConfig,
    discovery::{discover_with_recheck, Directory, DiscoveryPolicy},
    error::Result,
    model::{AgentId, Bid, Capability, Order},
    negotiation::{ClientOrder, OrderStatus},
    protocol,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub bidding_timeout: Duration,
    pub fulfillment_timeout: Duration,
    pub delivery_discovery: DiscoveryPolicy,
}

impl ClientSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            bidding_timeout: config.negotiation.bidding_timeout(),
            fulfillment_timeout: config.negotiation.fulfillment_timeout(),
            delivery_discovery: config.discovery.delivery_policy(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OrderOutcome {
    Fulfilled { winner: AgentId, price: f64, note: String },
    NoOffers,
    FulfillmentTimedOut { winner: AgentId, price: f64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientReport {
    pub client: AgentId,
    pub order: Order,
    pub status: OrderStatus,
    pub bids: Vec<Bid>,
    pub outcome: OrderOutcome,
}

impl ClientReport {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self.outcome, OrderOutcome::Fulfilled { .. })
    }

    pub fn winner(&self) -> Option<&AgentId> {
        match &self.outcome {
            OrderOutcome::Fulfilled { winner, .. } | OrderOutcome::FulfillmentTimedOut { winner, .. } => {
                Some(winner)
            }
            _ => None,
        }
    }
}

/// Runs a single order from discovery to fulfillment, then stops.
pub struct ClientAgent {
    id: AgentId,
    settings: ClientSettings,
    bus: MessageBus,
    directory: Arc<dyn Directory>,
    mailbox: Mailbox,
    order: ClientOrder,
}

impl ClientAgent {
    pub fn new(
        id: AgentId,
        order: Order,
        settings: ClientSettings,
        bus: &MessageBus,
        directory: Arc<dyn Directory>,
    ) -> Result<Self> {
        let mailbox = bus.open_mailbox(id.clone())?;
        tracing::info!(client = %id, "Hello! I want to buy: {:?}", order.items());

        Ok(Self {
            order: ClientOrder::new(id.clone(), order),
            id,
            settings,
            bus: bus.clone(),
            directory,
            mailbox,
        })
    }

    pub async fn run(mut self) -> ClientReport {
        let outcome = match self.negotiate().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(client = %self.id, "Order failed: {}", e);
                OrderOutcome::Failed { reason: e.to_string() }
            }
        };
        self.bus.close_mailbox(&self.id);

        ClientReport {
            client: self.id,
            order: self.order.order,
            status: self.order.status,
            bids: self.order.bids,
            outcome,
        }
    }

    async fn negotiate(&mut self) -> Result<OrderOutcome> {
        let deliveries = discover_with_recheck(
            self.directory.as_ref(),
            Capability::Delivery,
            &self.settings.delivery_discovery,
        )
        .await;
        if deliveries.is_empty() {
            tracing::warn!(client = %self.id, "No delivery services found");
        }

        let content = protocol::encode_items(self.order.order.items());
        for (delivery, token) in self.order.open_bidding(&deliveries)? {
            tracing::info!(client = %self.id, "Sending order to {}", delivery);
            self.bus.send_or_log(Envelope::new(
                self.id.clone(),
                delivery,
                MessageKind::Order,
                token,
                content.clone(),
            ));
        }

        self.collect_bids().await;

        let winner = match self.order.select()? {
            Some(best) => best.clone(),
            None => {
                tracing::warn!(client = %self.id, "No offers received, order closed");
                return Ok(OrderOutcome::NoOffers);
            }
        };
        tracing::info!(
            client = %self.id,
            "Accepting offer from {} at {:.2}",
            winner.delivery,
            winner.price
        );

        for (delivery, token, won) in self.order.decisions() {
            let kind = if won { MessageKind::Accept } else { MessageKind::Reject };
            self.bus
                .send_or_log(Envelope::new(self.id.clone(), delivery, kind, token, ""));
        }

        self.order.await_fulfillment()?;
        self.await_fulfillment(winner).await
    }

    /// Stops at the deadline or once every delivery has answered.
    async fn collect_bids(&mut self) {
        let deadline = Instant::now() + self.settings.bidding_timeout;
        while !self.order.all_answered() {
            match self.mailbox.recv_until(deadline).await {
                Received::Message(envelope) if envelope.kind == MessageKind::Bid => self.record_bid(envelope),
                Received::Message(envelope) => self.ignore(&envelope),
                Received::TimedOut => {
                    tracing::info!(
                        client = %self.id,
                        "Bidding closed with {} of {} offers",
                        self.order.bids.len(),
                        self.order.expected_deliveries()
                    );
                    break;
                }
                Received::Closed => break,
            }
        }
    }

    fn record_bid(&mut self, envelope: Envelope) {
        let Some(delivery) = self
            .order
            .delivery_for(&envelope.sender, &envelope.correlation)
            .cloned()
        else {
            self.ignore(&envelope);
            return;
        };

        match protocol::decode_price(&envelope.content) {
            Ok(price) => {
                let bid = Bid::new(delivery.clone(), price, envelope.correlation);
                match self.order.record_bid(bid) {
                    Ok(true) => tracing::info!(client = %self.id, "Received offer from {}: {:.2}", delivery, price),
                    Ok(false) => tracing::debug!(client = %self.id, "Duplicate offer from {} ignored", delivery),
                    Err(e) => tracing::warn!(client = %self.id, "Offer from {} refused: {}", delivery, e),
                }
            }
            Err(e) => {
                tracing::warn!(client = %self.id, "Unusable offer from {}: {}", delivery, e);
                self.order.record_invalid_answer(&delivery);
            }
        }
    }

    async fn await_fulfillment(&mut self, winner: Bid) -> Result<OrderOutcome> {
        let deadline = Instant::now() + self.settings.fulfillment_timeout;
        loop {
            match self.mailbox.recv_until(deadline).await {
                Received::Message(envelope)
                    if envelope.kind == MessageKind::Fulfilled
                        && envelope.sender == winner.delivery
                        && envelope.correlation == winner.correlation =>
                {
                    self.order.complete()?;
                    tracing::info!(client = %self.id, "Delivered by {}: {}", winner.delivery, envelope.content);
                    return Ok(OrderOutcome::Fulfilled {
                        winner: winner.delivery,
                        price: winner.price,
                        note: envelope.content,
                    });
                }
                Received::Message(envelope) => self.ignore(&envelope),
                Received::TimedOut | Received::Closed => {
                    tracing::warn!(client = %self.id, "{} never confirmed delivery", winner.delivery);
                    return Ok(OrderOutcome::FulfillmentTimedOut {
                        winner: winner.delivery,
                        price: winner.price,
                    });
                }
            }
        }
    }

    fn ignore(&self, envelope: &Envelope) {
        tracing::debug!(
            client = %self.id,
            kind = %envelope.kind,
            "Ignoring late or unexpected message from {}",
            envelope.sender
        );
    }
}
