//! The three agent roles. Each owns one mailbox on the [`MessageBus`](crate::bus::MessageBus)
//! and runs as its own task.

pub mod client;
pub mod delivery;
pub mod market;

pub use client::{ClientAgent, ClientReport, ClientSettings, OrderOutcome};
pub use delivery::{DeliveryAgent, DeliveryHandle, DeliverySettings};
pub use market::{MarketAgent, MarketHandle, PurchaseRecord};
