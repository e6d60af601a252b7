//! # Grocery Market
//!
//! A three-role negotiation marketplace running on one in-process message bus.
//!
//! ## Architecture
//!
//! - **Client**: broadcasts an order to every discovered delivery service, picks the cheapest bid
//! - **Delivery**: queries every market for stock, allocates the order greedily, bids cost plus fee
//! - **Market**: answers stock queries with its full catalog and acknowledges purchases
//! - **Discovery**: capability directory shared by all agents
//! - **Bus**: per-agent mailboxes; every exchange carries a correlation token

pub mod agent;
pub mod allocation;
pub mod bidding;
pub mod bus;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod model;
pub mod negotiation;
pub mod protocol;
pub mod simulation;

pub use agent::{ClientAgent, ClientReport, DeliveryAgent, MarketAgent, OrderOutcome};
pub use allocation::{Allocation, AllocationStrategy};
pub use bus::{Envelope, MessageBus, MessageKind};
pub use config::AppConfig;
pub use discovery::{Directory, DiscoveryService};
pub use error::{MarketError, Result};
pub use model::{AgentId, Bid, Capability, Catalog, CorrelationId, Order};
pub use negotiation::{NegotiationRecord, NegotiationStatus, OrderStatus};
pub use simulation::{Marketplace, Scenario, SimulationReport};
