//! Per-Negotiation (Delivery side) and per-Order (Client side) state machines.
//!
//! Both are plain data with checked transitions; the agents drive them from
//! incoming messages and timeouts.

use crate::{
    allocation::{Allocation, AllocationStrategy},
    error::{MarketError, Result},
    model::{AgentId, Bid, Catalog, CorrelationId, Order},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    ReceivedOrder,
    QueryingMarkets,
    Priced,
    AwaitingDecision,
    Purchasing,
    Fulfilled,
    Rejected,
    Abandoned,
}

impl NegotiationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationStatus::Fulfilled | NegotiationStatus::Rejected | NegotiationStatus::Abandoned
        )
    }
}

#[derive(Debug, Clone)]
pub struct Negotiation {
    pub correlation: CorrelationId,
    pub client: AgentId,
    pub order: Order,
    pub status: NegotiationStatus,
    pub catalogs: BTreeMap<AgentId, Catalog>,
    pub allocation: Option<Allocation>,
    expected_markets: BTreeSet<AgentId>,
    pending_acks: BTreeSet<AgentId>,
    pub updated_at: DateTime<Utc>,
}

impl Negotiation {
    pub fn new(correlation: CorrelationId, client: AgentId, order: Order) -> Self {
        Self {
            correlation,
            client,
            order,
            status: NegotiationStatus::ReceivedOrder,
            catalogs: BTreeMap::new(),
            allocation: None,
            expected_markets: BTreeSet::new(),
            pending_acks: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    fn transition(&mut self, from: NegotiationStatus, to: NegotiationStatus, event: &str) -> Result<()> {
        if self.status != from {
            return Err(MarketError::transition(self.status, event));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start_query<I>(&mut self, markets: I) -> Result<()>
    where
        I: IntoIterator<Item = AgentId>,
    {
        self.transition(
            NegotiationStatus::ReceivedOrder,
            NegotiationStatus::QueryingMarkets,
            "start_query",
        )?;
        self.expected_markets = markets.into_iter().collect();
        Ok(())
    }

    /// Returns false for replies from markets that were not queried or that
    /// already answered.
    pub fn record_stock(&mut self, market: AgentId, catalog: Catalog) -> Result<bool> {
        if self.status != NegotiationStatus::QueryingMarkets {
            return Err(MarketError::transition(self.status, "record_stock"));
        }
        if !self.expected_markets.contains(&market) || self.catalogs.contains_key(&market) {
            return Ok(false);
        }
        self.catalogs.insert(market, catalog);
        self.updated_at = Utc::now();
        Ok(true)
    }

    pub fn stock_complete(&self) -> bool {
        self.catalogs.len() >= self.expected_markets.len()
    }

    pub fn missing_markets(&self) -> Vec<&AgentId> {
        self.expected_markets
            .iter()
            .filter(|m| !self.catalogs.contains_key(*m))
            .collect()
    }

    pub fn price(&mut self, strategy: AllocationStrategy, delivery_fee: f64) -> Result<&Allocation> {
        if self.allocation.is_some() {
            return Err(MarketError::transition(self.status, "price"));
        }
        self.transition(NegotiationStatus::QueryingMarkets, NegotiationStatus::Priced, "price")?;
        let allocation = strategy.allocate(&self.order, &self.catalogs, delivery_fee);
        Ok(&*self.allocation.insert(allocation))
    }

    pub fn await_decision(&mut self) -> Result<()> {
        self.transition(
            NegotiationStatus::Priced,
            NegotiationStatus::AwaitingDecision,
            "await_decision",
        )
    }

    /// Returns the purchase list, one entry per allocated market.
    pub fn accept(&mut self) -> Result<Vec<(AgentId, Vec<String>)>> {
        self.transition(
            NegotiationStatus::AwaitingDecision,
            NegotiationStatus::Purchasing,
            "accept",
        )?;
        let purchases: Vec<(AgentId, Vec<String>)> = self
            .allocation
            .iter()
            .flat_map(|a| a.assignments.iter())
            .map(|a| (a.market.clone(), a.items.clone()))
            .collect();
        self.pending_acks = purchases.iter().map(|(m, _)| m.clone()).collect();
        Ok(purchases)
    }

    pub fn reject(&mut self) -> Result<()> {
        self.transition(
            NegotiationStatus::AwaitingDecision,
            NegotiationStatus::Rejected,
            "reject",
        )?;
        self.allocation = None;
        Ok(())
    }

    pub fn record_ack(&mut self, market: &AgentId) -> Result<bool> {
        if self.status != NegotiationStatus::Purchasing {
            return Err(MarketError::transition(self.status, "record_ack"));
        }
        let acked = self.pending_acks.remove(market);
        if acked {
            self.updated_at = Utc::now();
        }
        Ok(acked)
    }

    pub fn purchases_complete(&self) -> bool {
        self.pending_acks.is_empty()
    }

    pub fn fulfil(&mut self) -> Result<()> {
        if !self.pending_acks.is_empty() {
            return Err(MarketError::transition(self.status, "fulfil"));
        }
        self.transition(NegotiationStatus::Purchasing, NegotiationStatus::Fulfilled, "fulfil")
    }

    pub fn abandon(&mut self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(MarketError::transition(self.status, "abandon"));
        }
        self.status = NegotiationStatus::Abandoned;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn to_record(&self) -> NegotiationRecord {
        NegotiationRecord {
            correlation: self.correlation.clone(),
            client: self.client.clone(),
            status: self.status,
            price: self.allocation.as_ref().map(|a| a.total_price),
            allocation: self.allocation.clone(),
            finished_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRecord {
    pub correlation: CorrelationId,
    pub client: AgentId,
    pub status: NegotiationStatus,
    pub allocation: Option<Allocation>,
    pub price: Option<f64>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Discovering,
    AwaitingOffers,
    Selected,
    AwaitingFulfillment,
    Done,
    NoOffers,
}

#[derive(Debug, Clone)]
pub struct ClientOrder {
    pub client: AgentId,
    pub order: Order,
    pub status: OrderStatus,
    pub bids: Vec<Bid>,
    pub winner: Option<Bid>,
    tokens: BTreeMap<AgentId, CorrelationId>,
    answered: BTreeSet<AgentId>,
}

impl ClientOrder {
    pub fn new(client: AgentId, order: Order) -> Self {
        Self {
            client,
            order,
            status: OrderStatus::Discovering,
            bids: Vec::new(),
            winner: None,
            tokens: BTreeMap::new(),
            answered: BTreeSet::new(),
        }
    }

    fn transition(&mut self, from: OrderStatus, to: OrderStatus, event: &str) -> Result<()> {
        if self.status != from {
            return Err(MarketError::transition(self.status, event));
        }
        self.status = to;
        Ok(())
    }

    /// Issues one correlation token per delivery.
    pub fn open_bidding(&mut self, deliveries: &[AgentId]) -> Result<Vec<(AgentId, CorrelationId)>> {
        self.transition(OrderStatus::Discovering, OrderStatus::AwaitingOffers, "open_bidding")?;
        self.tokens = deliveries
            .iter()
            .map(|d| (d.clone(), CorrelationId::for_pair(&self.client, d)))
            .collect();
        Ok(self
            .tokens
            .iter()
            .map(|(d, t)| (d.clone(), t.clone()))
            .collect())
    }

    pub fn expected_deliveries(&self) -> usize {
        self.tokens.len()
    }

    /// The delivery a token was issued to, if `sender` matches it.
    pub fn delivery_for(&self, sender: &AgentId, correlation: &CorrelationId) -> Option<&AgentId> {
        self.tokens
            .get_key_value(sender)
            .filter(|(_, token)| *token == correlation)
            .map(|(delivery, _)| delivery)
    }

    /// Returns false for late bids, duplicates, and bids under a foreign token.
    pub fn record_bid(&mut self, bid: Bid) -> Result<bool> {
        if self.status != OrderStatus::AwaitingOffers {
            return Err(MarketError::transition(self.status, "record_bid"));
        }
        if self.delivery_for(&bid.delivery, &bid.correlation).is_none()
            || !self.answered.insert(bid.delivery.clone())
        {
            return Ok(false);
        }
        self.bids.push(bid);
        Ok(true)
    }

    /// A delivery answered with something that is not a usable bid.
    pub fn record_invalid_answer(&mut self, delivery: &AgentId) {
        self.answered.insert(delivery.clone());
    }

    pub fn all_answered(&self) -> bool {
        !self.tokens.is_empty() && self.answered.len() >= self.tokens.len()
    }

    pub fn select(&mut self) -> Result<Option<&Bid>> {
        if self.status != OrderStatus::AwaitingOffers {
            return Err(MarketError::transition(self.status, "select"));
        }
        match crate::bidding::select_best_bid(&self.bids).cloned() {
            Some(best) => {
                self.status = OrderStatus::Selected;
                Ok(Some(&*self.winner.insert(best)))
            }
            None => {
                self.status = OrderStatus::NoOffers;
                Ok(None)
            }
        }
    }

    /// Every token paired with whether its delivery won.
    pub fn decisions(&self) -> Vec<(AgentId, CorrelationId, bool)> {
        let winner = self.winner.as_ref().map(|w| &w.delivery);
        self.tokens
            .iter()
            .map(|(d, t)| (d.clone(), t.clone(), Some(d) == winner))
            .collect()
    }

    pub fn await_fulfillment(&mut self) -> Result<()> {
        self.transition(
            OrderStatus::Selected,
            OrderStatus::AwaitingFulfillment,
            "await_fulfillment",
        )
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(OrderStatus::AwaitingFulfillment, OrderStatus::Done, "complete")
    }
}
