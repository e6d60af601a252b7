use crate::{MarketError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token scoping every message of one Negotiation.
///
/// Issued by the Client once per (client, delivery) pair and reused unmodified
/// by the Delivery for its stock queries and purchases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn for_pair(client: &AgentId, delivery: &AgentId) -> Self {
        Self(format!("{}-{}-{}", client, delivery, Uuid::new_v4().simple()))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Market,
    Delivery,
}

impl Capability {
    pub fn service_type(&self) -> &'static str {
        match self {
            Capability::Market => "market",
            Capability::Delivery => "delivery",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_type())
    }
}

/// Shopping list. Duplicates are distinct demands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Order {
    items: Vec<String>,
}

impl Order {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    prices: BTreeMap<String, f64>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_prices<I, S>(prices: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut catalog = Self::new();
        for (item, price) in prices {
            catalog.insert(item, price)?;
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, item: impl Into<String>, price: f64) -> Result<()> {
        let item = item.into();
        if !price.is_finite() || price < 0.0 {
            return Err(MarketError::Validation(format!(
                "Price for {} must be a non-negative number, got {}",
                item, price
            )));
        }
        self.prices.insert(item, price);
        Ok(())
    }

    pub fn price(&self, item: &str) -> Option<f64> {
        self.prices.get(item).copied()
    }

    pub fn contains(&self, item: &str) -> bool {
        self.prices.contains_key(item)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.prices.iter().map(|(item, price)| (item.as_str(), *price))
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        match self.prices.iter().find(|(_, p)| !p.is_finite() || **p < 0.0) {
            Some((item, price)) => Err(MarketError::Validation(format!(
                "Price for {} must be a non-negative number, got {}",
                item, price
            ))),
            None => Ok(()),
        }
    }
}

/// Unchecked, like deserialization; call [`Catalog::validate`] before use.
impl<S: Into<String>> FromIterator<(S, f64)> for Catalog {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            prices: iter.into_iter().map(|(item, price)| (item.into(), price)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub delivery: AgentId,
    pub price: f64,
    pub correlation: CorrelationId,
    pub received_at: DateTime<Utc>,
}

impl Bid {
    pub fn new(delivery: AgentId, price: f64, correlation: CorrelationId) -> Self {
        Self {
            delivery,
            price,
            correlation,
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_token_format() {
        let client = AgentId::new("Client1");
        let delivery = AgentId::new("DeliveryBolt");
        let token = CorrelationId::for_pair(&client, &delivery);
        assert!(token.as_str().starts_with("Client1-DeliveryBolt-"));
        assert_ne!(token, CorrelationId::for_pair(&client, &delivery));
    }

    #[test]
    fn test_catalog_rejects_negative_prices() {
        let mut catalog = Catalog::new();
        assert!(catalog.insert("milk", 5.0).is_ok());
        assert!(catalog.insert("rice", -1.0).is_err());
        assert!(catalog.insert("tea", f64::NAN).is_err());
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.price("milk"), Some(5.0));
    }

    #[test]
    fn test_order_keeps_duplicates() {
        let order = Order::new(["milk", "milk", "rice"]);
        assert_eq!(order.len(), 3);
        assert_eq!(order.items()[1], "milk");
    }
}
