//! Marketplace bootstrap: puts a population of agents on one bus and runs
//! every client's order to its end.

use crate::{
    agent::{
        ClientAgent, ClientReport, ClientSettings, DeliveryAgent, DeliverySettings, MarketAgent, PurchaseRecord,
    },
    bus::MessageBus,
    config::AppConfig,
    discovery::{Directory, DiscoveryService},
    error::{MarketError, Result},
    model::{AgentId, Catalog, Order},
    negotiation::NegotiationRecord,
};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSpec {
    pub name: String,
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverySpec {
    pub name: String,
    pub fee: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSpec {
    pub name: String,
    pub catalog: Catalog,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub clients: Vec<ClientSpec>,
    pub deliveries: Vec<DeliverySpec>,
    pub markets: Vec<MarketSpec>,
}

const RANDOM_PRODUCTS: &[&str] = &[
    "golden apple",
    "caviar",
    "wagyu steak",
    "truffle",
    "champagne",
    "lobster",
    "black garlic",
    "saffron",
    "matsutake mushrooms",
    "aged balsamic vinegar",
    "kobe beef",
    "foie gras",
    "white truffle",
    "bluefin tuna",
    "artisanal honey",
    "pink himalayan salt",
    "oysters",
    "pata negra ham",
    "wasabi root",
    "handmade chocolate",
    "century egg",
    "dragonfruit",
    "ghost pepper sauce",
    "emerald lettuce",
    "platinum potatoes",
    "mystic mango",
    "quantum quinoa",
    "galaxy macarons",
    "void strawberries",
    "invisible coffee",
];

fn client(name: &str, items: &[&str]) -> ClientSpec {
    ClientSpec {
        name: name.to_string(),
        order: Order::new(items.iter().copied()),
    }
}

fn delivery(name: &str, fee: f64) -> DeliverySpec {
    DeliverySpec {
        name: name.to_string(),
        fee,
    }
}

fn market(name: &str, prices: &[(&str, f64)]) -> MarketSpec {
    MarketSpec {
        name: name.to_string(),
        catalog: prices
            .iter()
            .map(|(item, price)| (item.to_string(), *price))
            .collect(),
    }
}

fn pick<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<&'static str> {
    let mut products = RANDOM_PRODUCTS.to_vec();
    products.shuffle(rng);
    products.truncate(count);
    products
}

impl Scenario {
    /// One client, three deliveries, three markets.
    pub fn grocery() -> Self {
        Self {
            clients: vec![client("Client1", &["milk", "coffee", "rice"])],
            deliveries: vec![
                delivery("DeliveryBolt", 5.00),
                delivery("DeliveryUber", 9.99),
                delivery("DeliveryWolt", 15.50),
            ],
            markets: vec![
                market("MarketBiedronka", &[("milk", 5.00), ("rice", 3.40)]),
                market("MarketOsiedlowy", &[("rice", 1.00)]),
                market("MarketZabka", &[("coffee", 7.50), ("milk", 6.39)]),
            ],
        }
    }

    /// Five clients with disjoint-ish baskets competing for five deliveries.
    pub fn crowded() -> Self {
        Self {
            clients: vec![
                client("Client1", &["bread", "butter", "tea", "cheese", "wine"]),
                client("Client2", &["milk", "coffee", "chocolate", "yogurt", "juice"]),
                client("Client3", &["pasta", "sauce", "olive oil", "tomatoes", "parmesan"]),
                client("Client4", &["chicken", "rice", "spices", "onions", "garlic"]),
                client("Client5", &["fish", "lemons", "butter", "salt", "potatoes"]),
            ],
            deliveries: vec![
                delivery("Pyszne", 4.50),
                delivery("Glovo", 8.75),
                delivery("DHL", 12.30),
                delivery("UberEats", 9.99),
                delivery("BoltFood", 7.99),
            ],
            markets: vec![
                market(
                    "Lidl",
                    &[("bread", 3.20), ("butter", 6.50), ("cheese", 12.99), ("milk", 2.50), ("pasta", 4.25)],
                ),
                market(
                    "Carrefour",
                    &[("tea", 5.10), ("butter", 7.25), ("wine", 19.99), ("coffee", 8.99), ("rice", 3.49)],
                ),
                market(
                    "Auchan",
                    &[("bread", 2.80), ("tea", 4.95), ("cheese", 10.50), ("chocolate", 5.99), ("tomatoes", 2.75)],
                ),
                market(
                    "Biedronka",
                    &[("wine", 17.49), ("bread", 3.10), ("yogurt", 4.20), ("olive oil", 14.99), ("spices", 2.50)],
                ),
                market(
                    "Zabka",
                    &[("butter", 6.99), ("tea", 5.50), ("juice", 3.75), ("garlic", 1.99), ("fish", 15.99)],
                ),
                market(
                    "AmazonFresh",
                    &[("cheese", 11.75), ("wine", 22.50), ("onions", 1.50), ("lemons", 2.99), ("salt", 0.99)],
                ),
            ],
        }
    }

    /// One client with an expensive basket and five deliveries undercutting
    /// each other.
    pub fn luxury() -> Self {
        Self {
            clients: vec![client(
                "Client1",
                &["golden apple", "caviar", "wagyu steak", "truffle", "champagne"],
            )],
            deliveries: vec![
                delivery("Pyszne", 3.99),
                delivery("Glovo", 8.49),
                delivery("DHL", 13.37),
                delivery("UberEats", 9.95),
                delivery("BoltFood", 6.66),
            ],
            markets: vec![
                market("Lidl", &[("golden apple", 99.99), ("caviar", 250.00), ("wagyu steak", 499.95)]),
                market("Carrefour", &[("truffle", 150.50), ("champagne", 200.00), ("wagyu steak", 450.00)]),
                market("Auchan", &[("golden apple", 120.00), ("caviar", 275.00), ("truffle", 160.99)]),
                market("Biedronka", &[("champagne", 175.49), ("wagyu steak", 520.00), ("caviar", 300.00)]),
                market("Zabka", &[("golden apple", 110.10), ("champagne", 190.90), ("truffle", 175.75)]),
                market(
                    "AmazonFresh",
                    &[("golden apple", 105.99), ("caviar", 290.00), ("wagyu steak", 510.25), ("champagne", 225.00)],
                ),
            ],
        }
    }

    /// Three clients sharing a single delivery over the grocery markets.
    pub fn single_delivery() -> Self {
        Self {
            clients: vec![
                client("Client1", &["milk", "coffee", "rice"]),
                client("Client2", &["milk", "rice"]),
                client("Client3", &["coffee"]),
            ],
            deliveries: vec![delivery("DeliveryBolt", 5.00)],
            markets: Self::grocery().markets,
        }
    }

    /// Orders of 5 to 19 items and catalogs of 5 to 14 items drawn from a
    /// fixed product list; prices in [20, 520), fees in [5, 55).
    pub fn random<R: Rng + ?Sized>(rng: &mut R, clients: usize, deliveries: usize, markets: usize) -> Self {
        let clients = (1..=clients)
            .map(|i| {
                let size = rng.gen_range(5..20);
                ClientSpec {
                    name: format!("Client{}", i),
                    order: Order::new(pick(rng, size)),
                }
            })
            .collect();

        let deliveries = (1..=deliveries)
            .map(|i| DeliverySpec {
                name: format!("DeliveryAgent{}", i),
                fee: rng.gen_range(5.0..55.0),
            })
            .collect();

        let markets = (1..=markets)
            .map(|i| {
                let size = rng.gen_range(5..15);
                let catalog = pick(rng, size)
                    .into_iter()
                    .map(|item| (item.to_string(), rng.gen_range(20.0..520.0)))
                    .collect();
                MarketSpec {
                    name: format!("Market{}", i),
                    catalog,
                }
            })
            .collect();

        Self {
            clients,
            deliveries,
            markets,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        let all_names = self
            .clients
            .iter()
            .map(|c| &c.name)
            .chain(self.deliveries.iter().map(|d| &d.name))
            .chain(self.markets.iter().map(|m| &m.name));
        for name in all_names {
            if name.trim().is_empty() {
                return Err(MarketError::Validation("Agent names cannot be empty".to_string()));
            }
            if !names.insert(name.as_str()) {
                return Err(MarketError::Validation(format!("Duplicate agent name: {}", name)));
            }
        }

        for spec in &self.deliveries {
            if !spec.fee.is_finite() || spec.fee < 0.0 {
                return Err(MarketError::Validation(format!(
                    "Delivery {} has an invalid fee: {}",
                    spec.name, spec.fee
                )));
            }
        }

        for spec in &self.markets {
            spec.catalog.validate()?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationReport {
    pub clients: Vec<ClientReport>,
    pub deliveries: BTreeMap<AgentId, Vec<NegotiationRecord>>,
    pub markets: BTreeMap<AgentId, Vec<PurchaseRecord>>,
}

impl SimulationReport {
    pub fn client(&self, name: &str) -> Option<&ClientReport> {
        self.clients.iter().find(|c| c.client.as_str() == name)
    }

    pub fn fulfilled_count(&self) -> usize {
        self.clients.iter().filter(|c| c.is_fulfilled()).count()
    }

    pub fn purchase_count(&self) -> usize {
        self.markets.values().map(Vec::len).sum()
    }
}

pub struct Marketplace {
    config: AppConfig,
}

impl Marketplace {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Runs on a fresh bus and directory. Returns once every client is done
    /// and every other agent has shut down.
    pub async fn run(&self, scenario: &Scenario) -> Result<SimulationReport> {
        scenario.validate()?;

        let bus = MessageBus::new();
        let directory = Arc::new(DiscoveryService::new());
        let shared: Arc<dyn Directory> = directory.clone();

        tracing::info!(
            clients = scenario.clients.len(),
            deliveries = scenario.deliveries.len(),
            markets = scenario.markets.len(),
            "Starting marketplace"
        );

        let mut markets = Vec::with_capacity(scenario.markets.len());
        for spec in &scenario.markets {
            let agent = MarketAgent::new(AgentId::new(&spec.name), spec.catalog.clone(), &bus, directory.as_ref())?;
            markets.push(agent.spawn());
        }

        let mut deliveries = Vec::with_capacity(scenario.deliveries.len());
        for spec in &scenario.deliveries {
            let settings = DeliverySettings::from_config(spec.fee, &self.config);
            let agent = DeliveryAgent::new(AgentId::new(&spec.name), settings, &bus, Arc::clone(&shared))?;
            deliveries.push(agent.spawn());
        }

        let client_settings = ClientSettings::from_config(&self.config);
        let mut clients = Vec::with_capacity(scenario.clients.len());
        for spec in &scenario.clients {
            clients.push(ClientAgent::new(
                AgentId::new(&spec.name),
                spec.order.clone(),
                client_settings.clone(),
                &bus,
                Arc::clone(&shared),
            )?);
        }
        let running: Vec<_> = clients.into_iter().map(|c| tokio::spawn(c.run())).collect();

        let mut report = SimulationReport::default();
        for handle in running {
            report.clients.push(handle.await?);
        }

        bus.shutdown();
        for handle in deliveries {
            let id = handle.id.clone();
            report.deliveries.insert(id, handle.join().await);
        }
        for handle in markets {
            let id = handle.id.clone();
            report.markets.insert(id, handle.join().await);
        }

        tracing::info!(
            fulfilled = report.fulfilled_count(),
            purchases = report.purchase_count(),
            "Marketplace finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_builtin_scenarios_are_valid() {
        let grocery = Scenario::grocery();
        assert!(grocery.validate().is_ok());
        assert_eq!(grocery.clients.len(), 1);
        assert_eq!(grocery.deliveries.len(), 3);
        assert_eq!(grocery.markets.len(), 3);

        let crowded = Scenario::crowded();
        assert!(crowded.validate().is_ok());
        assert_eq!(crowded.clients.len(), 5);
        assert_eq!(crowded.markets.len(), 6);

        let luxury = Scenario::luxury();
        assert!(luxury.validate().is_ok());
        assert_eq!(luxury.clients.len(), 1);
        assert_eq!(luxury.deliveries.len(), 5);
        assert_eq!(luxury.markets.len(), 6);

        let single = Scenario::single_delivery();
        assert!(single.validate().is_ok());
        assert_eq!(single.clients.len(), 3);
        assert_eq!(single.deliveries.len(), 1);
        assert_eq!(single.markets.len(), 3);
    }

    #[test]
    fn test_random_scenario_is_seeded_and_bounded() {
        let a = Scenario::random(&mut StdRng::seed_from_u64(7), 4, 3, 5);
        let b = Scenario::random(&mut StdRng::seed_from_u64(7), 4, 3, 5);
        assert_eq!(a, b);
        assert!(a.validate().is_ok());

        assert!(a.deliveries.iter().all(|d| (5.0..55.0).contains(&d.fee)));
        for spec in &a.markets {
            assert!(spec.catalog.iter().all(|(_, price)| (20.0..520.0).contains(&price)));
        }
        assert!(a.clients.iter().all(|c| (5..20).contains(&c.order.len())));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut scenario = Scenario::grocery();
        scenario.markets.push(market("DeliveryBolt", &[("milk", 1.0)]));
        assert!(matches!(scenario.validate(), Err(MarketError::Validation(_))));
    }

    #[tokio::test]
    async fn test_grocery_run_fulfils_with_cheapest_delivery() {
        let report = Marketplace::new(AppConfig::default())
            .run(&Scenario::grocery())
            .await
            .unwrap();

        let client = report.client("Client1").unwrap();
        assert_eq!(client.winner(), Some(&AgentId::new("DeliveryBolt")));
        assert!(client.is_fulfilled());
        assert_eq!(report.deliveries.len(), 3);
        assert!(report.purchase_count() >= 2);
    }

    #[tokio::test]
    async fn test_single_delivery_serves_every_client() {
        let report = Marketplace::new(AppConfig::default())
            .run(&Scenario::single_delivery())
            .await
            .unwrap();

        assert_eq!(report.fulfilled_count(), 3);
        let price = |name: &str| report.client(name).and_then(|c| c.bids.first()).map(|b| b.price);
        assert_eq!(price("Client2"), Some(11.0));
        assert_eq!(price("Client3"), Some(12.5));
        assert_eq!(report.deliveries[&AgentId::new("DeliveryBolt")].len(), 3);
    }

    #[tokio::test]
    async fn test_luxury_goes_to_cheapest_courier() {
        let report = Marketplace::new(AppConfig::default())
            .run(&Scenario::luxury())
            .await
            .unwrap();

        let client = report.client("Client1").unwrap();
        assert_eq!(client.bids.len(), 5);
        assert_eq!(client.winner(), Some(&AgentId::new("Pyszne")));
        assert!(client.is_fulfilled());
    }
}
