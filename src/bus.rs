//! In-process message transport.
//!
//! Every agent owns one [`Mailbox`]; the [`MessageBus`] only keeps the sending
//! halves, so closing a mailbox on the bus ends the owning agent's receive loop.

use crate::{
    error::{MarketError, Result},
    model::{AgentId, CorrelationId},
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Order,
    StockQuery,
    StockReply,
    Bid,
    Accept,
    Reject,
    Purchase,
    PurchaseAck,
    Fulfilled,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Order => "ORDER",
            MessageKind::StockQuery => "STOCK_QUERY",
            MessageKind::StockReply => "STOCK_REPLY",
            MessageKind::Bid => "BID",
            MessageKind::Accept => "ACCEPT",
            MessageKind::Reject => "REJECT",
            MessageKind::Purchase => "PURCHASE",
            MessageKind::PurchaseAck => "PURCHASE_ACK",
            MessageKind::Fulfilled => "FULFILLED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub sender: AgentId,
    pub receiver: AgentId,
    pub kind: MessageKind,
    pub correlation: CorrelationId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(
        sender: AgentId,
        receiver: AgentId,
        kind: MessageKind,
        correlation: CorrelationId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            receiver,
            kind,
            correlation,
            content: content.into(),
            sent_at: Utc::now(),
        }
    }

    /// Same correlation, sender and receiver swapped.
    pub fn reply(&self, kind: MessageKind, content: impl Into<String>) -> Self {
        Self::new(
            self.receiver.clone(),
            self.sender.clone(),
            kind,
            self.correlation.clone(),
            content,
        )
    }
}

#[derive(Debug)]
pub enum Received {
    Message(Envelope),
    TimedOut,
    Closed,
}

pub struct Mailbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Mailbox {
    pub fn channel() -> (mpsc::UnboundedSender<Envelope>, Mailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Mailbox { rx })
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub async fn recv_until(&mut self, deadline: Instant) -> Received {
        match tokio::time::timeout_at(deadline, self.rx.recv()).await {
            Ok(Some(envelope)) => Received::Message(envelope),
            Ok(None) => Received::Closed,
            Err(_) => Received::TimedOut,
        }
    }
}

#[derive(Clone, Default)]
pub struct MessageBus {
    mailboxes: Arc<RwLock<HashMap<AgentId, mpsc::UnboundedSender<Envelope>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_mailbox(&self, agent: AgentId) -> Result<Mailbox> {
        let mut mailboxes = self.mailboxes.write();
        if let Some(existing) = mailboxes.get(&agent) {
            if !existing.is_closed() {
                return Err(MarketError::DuplicateAgent(agent));
            }
        }

        let (tx, mailbox) = Mailbox::channel();
        mailboxes.insert(agent, tx);
        Ok(mailbox)
    }

    pub fn send(&self, envelope: Envelope) -> Result<()> {
        let receiver = envelope.receiver.clone();
        let sender = self.mailboxes.read().get(&receiver).cloned();

        match sender {
            Some(tx) => tx.send(envelope).map_err(|_| {
                self.mailboxes.write().remove(&receiver);
                MarketError::AgentNotFound(receiver)
            }),
            None => Err(MarketError::AgentNotFound(receiver)),
        }
    }

    /// Sends and logs a failed delivery instead of returning it.
    pub fn send_or_log(&self, envelope: Envelope) -> bool {
        let kind = envelope.kind;
        let correlation = envelope.correlation.clone();
        match self.send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%kind, %correlation, "Message dropped: {}", e);
                false
            }
        }
    }

    pub fn is_open(&self, agent: &AgentId) -> bool {
        self.mailboxes
            .read()
            .get(agent)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn close_mailbox(&self, agent: &AgentId) -> bool {
        self.mailboxes.write().remove(agent).is_some()
    }

    pub fn shutdown(&self) {
        let closed = {
            let mut mailboxes = self.mailboxes.write();
            let count = mailboxes.len();
            mailboxes.clear();
            count
        };
        tracing::debug!("Message bus closed {} mailboxes", closed);
    }
}
