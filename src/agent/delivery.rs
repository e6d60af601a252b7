//! Delivery agent.
//!
//! The agent loop only routes: an ORDER opens a Negotiation running in its own
//! task with its own inbox, every other message is forwarded by correlation
//! token. A message whose Negotiation is gone is dropped.

use crate::{
    allocation::AllocationStrategy,
    bus::{Envelope, Mailbox, MessageBus, MessageKind, Received},
    config::AppConfig,
    discovery::{discover_with_recheck, Directory, DiscoveryPolicy},
    error::{MarketError, Result},
    model::{AgentId, Capability, CorrelationId, Order},
    negotiation::{Negotiation, NegotiationRecord},
    protocol,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub fee: f64,
    pub strategy: AllocationStrategy,
    pub stock_query_timeout: Duration,
    pub decision_timeout: Duration,
    pub purchase_timeout: Duration,
    pub market_discovery: DiscoveryPolicy,
}

impl DeliverySettings {
    pub fn from_config(fee: f64, config: &AppConfig) -> Self {
        Self {
            fee,
            strategy: config.negotiation.allocation,
            stock_query_timeout: config.negotiation.stock_query_timeout(),
            decision_timeout: config.negotiation.decision_timeout(),
            purchase_timeout: config.negotiation.purchase_timeout(),
            market_discovery: config.discovery.market_policy(),
        }
    }
}

type History = Arc<Mutex<Vec<NegotiationRecord>>>;

pub struct DeliveryAgent {
    id: AgentId,
    settings: DeliverySettings,
    bus: MessageBus,
    directory: Arc<dyn Directory>,
    mailbox: Mailbox,
    history: History,
}

impl DeliveryAgent {
    pub fn new(
        id: AgentId,
        settings: DeliverySettings,
        bus: &MessageBus,
        directory: Arc<dyn Directory>,
    ) -> Result<Self> {
        if !settings.fee.is_finite() || settings.fee < 0.0 {
            return Err(MarketError::Validation(format!(
                "Delivery fee must be a non-negative number, got {}",
                settings.fee
            )));
        }

        let mailbox = bus.open_mailbox(id.clone())?;
        directory.register(&id, Capability::Delivery);
        tracing::info!(delivery = %id, "Ready to deliver! My delivery fee is: {:.2}", settings.fee);

        Ok(Self {
            id,
            settings,
            bus: bus.clone(),
            directory,
            mailbox,
            history: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn spawn(self) -> DeliveryHandle {
        let id = self.id.clone();
        let history = Arc::clone(&self.history);
        let join = tokio::spawn(self.run());
        DeliveryHandle { id, history, join }
    }

    pub async fn run(self) {
        let markets = discover_with_recheck(
            self.directory.as_ref(),
            Capability::Market,
            &self.settings.market_discovery,
        )
        .await;
        for market in &markets {
            tracing::info!(delivery = %self.id, "Found market: {}", market);
        }

        let mut mailbox = self.mailbox;
        let mut router = Router {
            delivery: self.id,
            settings: self.settings,
            bus: self.bus,
            markets: Arc::new(markets),
            history: self.history,
            routes: HashMap::new(),
            tasks: JoinSet::new(),
        };

        loop {
            tokio::select! {
                received = mailbox.recv() => match received {
                    Some(envelope) => router.dispatch(envelope),
                    None => break,
                },
                Some(finished) = router.tasks.join_next(), if !router.tasks.is_empty() => {
                    router.finished(finished);
                }
            }
        }

        router.drain().await;
    }
}

struct Router {
    delivery: AgentId,
    settings: DeliverySettings,
    bus: MessageBus,
    markets: Arc<Vec<AgentId>>,
    history: History,
    routes: HashMap<CorrelationId, mpsc::UnboundedSender<Envelope>>,
    tasks: JoinSet<CorrelationId>,
}

impl Router {
    fn dispatch(&mut self, envelope: Envelope) {
        if envelope.kind == MessageKind::Order {
            self.open_negotiation(envelope);
            return;
        }

        let correlation = envelope.correlation.clone();
        match self.routes.get(&correlation) {
            Some(route) => {
                if route.send(envelope).is_err() {
                    self.routes.remove(&correlation);
                    tracing::debug!(delivery = %self.delivery, %correlation, "Negotiation already finished");
                }
            }
            None => {
                tracing::debug!(
                    delivery = %self.delivery,
                    %correlation,
                    kind = %envelope.kind,
                    "Dropping message for unknown or finished negotiation"
                );
            }
        }
    }

    fn open_negotiation(&mut self, envelope: Envelope) {
        if self.routes.contains_key(&envelope.correlation) {
            tracing::warn!(delivery = %self.delivery, correlation = %envelope.correlation, "Duplicate order ignored");
            return;
        }

        let items = match protocol::decode_items(&envelope.content) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(delivery = %self.delivery, "Malformed order from {} skipped: {}", envelope.sender, e);
                return;
            }
        };

        let (route, inbox) = Mailbox::channel();
        self.routes.insert(envelope.correlation.clone(), route);

        let task = NegotiationTask {
            delivery: self.delivery.clone(),
            settings: self.settings.clone(),
            bus: self.bus.clone(),
            markets: Arc::clone(&self.markets),
            history: Arc::clone(&self.history),
            inbox,
            negotiation: Negotiation::new(envelope.correlation, envelope.sender, Order::new(items)),
            early_reject: false,
        };
        self.tasks.spawn(task.run());
    }

    fn finished(&mut self, finished: std::result::Result<CorrelationId, tokio::task::JoinError>) {
        match finished {
            Ok(correlation) => {
                self.routes.remove(&correlation);
            }
            Err(e) => tracing::warn!(delivery = %self.delivery, "Negotiation task failed: {}", e),
        }
    }

    /// Closes every inbox and waits for the open negotiations to settle.
    async fn drain(mut self) {
        self.routes.clear();
        while let Some(finished) = self.tasks.join_next().await {
            self.finished(finished);
        }
        tracing::debug!(delivery = %self.delivery, "Delivery agent shutting down");
    }
}

struct NegotiationTask {
    delivery: AgentId,
    settings: DeliverySettings,
    bus: MessageBus,
    markets: Arc<Vec<AgentId>>,
    history: History,
    inbox: Mailbox,
    negotiation: Negotiation,
    early_reject: bool,
}

impl NegotiationTask {
    async fn run(mut self) -> CorrelationId {
        let correlation = self.negotiation.correlation.clone();
        if let Err(e) = self.drive().await {
            tracing::warn!(delivery = %self.delivery, %correlation, "Negotiation failed: {}", e);
            if !self.negotiation.status.is_terminal() {
                let _ = self.negotiation.abandon();
            }
        }
        self.history.lock().push(self.negotiation.to_record());
        correlation
    }

    async fn drive(&mut self) -> Result<()> {
        tracing::info!(
            delivery = %self.delivery,
            client = %self.negotiation.client,
            "Received order: {:?}",
            self.negotiation.order.items()
        );

        if !self.query_markets().await? {
            return Ok(());
        }

        let allocation = self
            .negotiation
            .price(self.settings.strategy, self.settings.fee)?
            .clone();
        let price = allocation.total_price;
        if !allocation.is_complete() {
            tracing::warn!(
                delivery = %self.delivery,
                correlation = %self.negotiation.correlation,
                "Partial fulfillment, unable to source: {:?}",
                allocation.unfulfilled
            );
        }
        for assignment in &allocation.assignments {
            tracing::info!(
                delivery = %self.delivery,
                "Selected market {} for items {:?} with cost {:.2}",
                assignment.market,
                assignment.items,
                assignment.cost
            );
        }

        if self.early_reject {
            self.negotiation.await_decision()?;
            return self.rejected();
        }

        tracing::info!(delivery = %self.delivery, "Sending price {:.2}", price);
        let client = self.negotiation.client.clone();
        self.send(&client, MessageKind::Bid, protocol::encode_price(price));
        self.negotiation.await_decision()?;

        if !self.await_decision().await? {
            return Ok(());
        }
        self.purchase().await
    }

    /// Returns false if the negotiation ended while waiting.
    async fn query_markets(&mut self) -> Result<bool> {
        let markets = Arc::clone(&self.markets);
        self.negotiation.start_query(markets.iter().cloned())?;
        tracing::debug!(delivery = %self.delivery, "Sending stock queries to {} markets", markets.len());
        for market in markets.iter() {
            self.send(market, MessageKind::StockQuery, "");
        }

        let deadline = Instant::now() + self.settings.stock_query_timeout;
        while !self.negotiation.stock_complete() {
            match self.inbox.recv_until(deadline).await {
                Received::Message(envelope) if envelope.kind == MessageKind::StockReply => {
                    let catalog = protocol::decode_catalog(&envelope.content);
                    if self.negotiation.record_stock(envelope.sender.clone(), catalog)? {
                        tracing::debug!(delivery = %self.delivery, "Received stock from {}", envelope.sender);
                    } else {
                        tracing::debug!(delivery = %self.delivery, "Ignoring stock reply from {}", envelope.sender);
                    }
                }
                Received::Message(envelope) => self.unexpected(envelope),
                Received::TimedOut => {
                    tracing::info!(
                        delivery = %self.delivery,
                        missing = ?self.negotiation.missing_markets(),
                        "Stock query timed out, pricing with {} replies",
                        self.negotiation.catalogs.len()
                    );
                    break;
                }
                Received::Closed => {
                    self.abandon("inbox closed while querying markets")?;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Returns true on ACCEPT.
    async fn await_decision(&mut self) -> Result<bool> {
        let deadline = Instant::now() + self.settings.decision_timeout;
        loop {
            match self.inbox.recv_until(deadline).await {
                Received::Message(envelope) if self.from_client(&envelope, MessageKind::Accept) => {
                    return Ok(true);
                }
                Received::Message(envelope) if self.from_client(&envelope, MessageKind::Reject) => {
                    self.rejected()?;
                    return Ok(false);
                }
                Received::Message(envelope) => self.unexpected(envelope),
                Received::TimedOut => {
                    self.abandon("no decision from client")?;
                    return Ok(false);
                }
                Received::Closed => {
                    self.abandon("inbox closed while awaiting decision")?;
                    return Ok(false);
                }
            }
        }
    }

    async fn purchase(&mut self) -> Result<()> {
        let purchases = self.negotiation.accept()?;
        tracing::info!(delivery = %self.delivery, "Buying needed items from {} markets", purchases.len());
        for (market, items) in &purchases {
            self.send(market, MessageKind::Purchase, protocol::encode_items(items));
        }

        let deadline = Instant::now() + self.settings.purchase_timeout;
        while !self.negotiation.purchases_complete() {
            match self.inbox.recv_until(deadline).await {
                Received::Message(envelope) if envelope.kind == MessageKind::PurchaseAck => {
                    if self.negotiation.record_ack(&envelope.sender)? {
                        tracing::debug!(delivery = %self.delivery, "Received items from market {}", envelope.sender);
                    }
                }
                Received::Message(envelope) => self.unexpected(envelope),
                Received::TimedOut => return self.abandon("missing purchase acknowledgements"),
                Received::Closed => return self.abandon("inbox closed while purchasing"),
            }
        }

        self.negotiation.fulfil()?;
        let client = self.negotiation.client.clone();
        self.send(&client, MessageKind::Fulfilled, protocol::FULFILLMENT_NOTE);
        tracing::info!(delivery = %self.delivery, client = %client, "Order delivered");
        Ok(())
    }

    fn rejected(&mut self) -> Result<()> {
        self.negotiation.reject()?;
        tracing::info!(delivery = %self.delivery, client = %self.negotiation.client, "Offer rejected");
        Ok(())
    }

    fn abandon(&mut self, reason: &str) -> Result<()> {
        tracing::warn!(
            delivery = %self.delivery,
            correlation = %self.negotiation.correlation,
            "Abandoning negotiation: {}",
            reason
        );
        self.negotiation.abandon()
    }

    fn from_client(&self, envelope: &Envelope, kind: MessageKind) -> bool {
        envelope.kind == kind && envelope.sender == self.negotiation.client
    }

    fn unexpected(&mut self, envelope: Envelope) {
        if self.from_client(&envelope, MessageKind::Reject) {
            // The client closed bidding before this delivery could price.
            self.early_reject = true;
            return;
        }
        tracing::debug!(
            delivery = %self.delivery,
            kind = %envelope.kind,
            "Ignoring out-of-phase message from {}",
            envelope.sender
        );
    }

    fn send(&self, receiver: &AgentId, kind: MessageKind, content: impl Into<String>) {
        self.bus.send_or_log(Envelope::new(
            self.delivery.clone(),
            receiver.clone(),
            kind,
            self.negotiation.correlation.clone(),
            content,
        ));
    }
}

pub struct DeliveryHandle {
    pub id: AgentId,
    history: History,
    join: JoinHandle<()>,
}

impl DeliveryHandle {
    /// Waits for the agent loop and all its negotiations to end.
    pub async fn join(self) -> Vec<NegotiationRecord> {
        if let Err(e) = self.join.await {
            tracing::warn!(delivery = %self.id, "Delivery task failed: {}", e);
        }
        let history = self.history.lock().clone();
        history
    }
}
