//! Greedy market allocation.
//!
//! Each covering round picks the market supplying the most remaining items,
//! the cheaper subset on equal size, the lowest market id on equal size and
//! cost. Rounds are bounded by the number of order items and visit every
//! market once. [`AllocationStrategy::GreedyCoverRefined`] then moves each
//! covered item to a strictly cheaper market that stocks it.

use crate::model::{AgentId, Catalog, Order};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAssignment {
    pub market: AgentId,
    pub items: Vec<String>,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// In selection order; a market appears at most once.
    pub assignments: Vec<MarketAssignment>,
    pub item_cost: f64,
    pub delivery_fee: f64,
    pub total_price: f64,
    pub unfulfilled: Vec<String>,
}

impl Allocation {
    pub fn is_complete(&self) -> bool {
        self.unfulfilled.is_empty()
    }

    pub fn markets(&self) -> impl Iterator<Item = &AgentId> {
        self.assignments.iter().map(|a| &a.market)
    }

    pub fn items_for(&self, market: &AgentId) -> Option<&[String]> {
        self.assignments
            .iter()
            .find(|a| &a.market == market)
            .map(|a| a.items.as_slice())
    }

    pub fn allocated_item_count(&self) -> usize {
        self.assignments.iter().map(|a| a.items.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    GreedyCover,
    #[default]
    GreedyCoverRefined,
}

impl AllocationStrategy {
    pub fn allocate(
        &self,
        order: &Order,
        catalogs: &BTreeMap<AgentId, Catalog>,
        delivery_fee: f64,
    ) -> Allocation {
        let allocation = greedy_cover(order, catalogs, delivery_fee);
        match self {
            AllocationStrategy::GreedyCover => allocation,
            AllocationStrategy::GreedyCoverRefined => refine_to_cheapest(allocation, catalogs),
        }
    }
}

pub fn greedy_cover(order: &Order, catalogs: &BTreeMap<AgentId, Catalog>, delivery_fee: f64) -> Allocation {
    let mut remaining: Vec<String> = order.items().to_vec();
    let mut assignments = Vec::new();
    let mut unfulfilled = Vec::new();
    let mut item_cost = 0.0;

    while !remaining.is_empty() {
        let mut best: Option<(&AgentId, &Catalog, Vec<String>, f64)> = None;

        for (market, catalog) in catalogs {
            let (covered, cost) = coverage(catalog, &remaining);
            if covered.is_empty() {
                continue;
            }

            let better = match &best {
                None => true,
                Some((_, _, best_items, best_cost)) => {
                    covered.len() > best_items.len()
                        || (covered.len() == best_items.len() && cost < *best_cost)
                }
            };
            if better {
                best = Some((market, catalog, covered, cost));
            }
        }

        let Some((market, catalog, items, cost)) = best else {
            tracing::warn!("Unable to source the remaining items: {:?}", remaining);
            unfulfilled = std::mem::take(&mut remaining);
            break;
        };

        remaining.retain(|item| !catalog.contains(item));
        item_cost += cost;
        tracing::debug!(%market, ?items, "Selected market with cost {:.2}", cost);
        assignments.push(MarketAssignment {
            market: market.clone(),
            items,
            cost,
        });
    }

    Allocation {
        assignments,
        item_cost,
        delivery_fee,
        total_price: item_cost + delivery_fee,
        unfulfilled,
    }
}

/// Items keep their greedy market unless another one is strictly cheaper.
fn refine_to_cheapest(allocation: Allocation, catalogs: &BTreeMap<AgentId, Catalog>) -> Allocation {
    let mut assignments: Vec<MarketAssignment> = Vec::new();

    for assignment in &allocation.assignments {
        let current_catalog = catalogs.get(&assignment.market);
        for item in &assignment.items {
            let mut target = &assignment.market;
            let mut price = current_catalog.and_then(|c| c.price(item)).unwrap_or(f64::INFINITY);
            for (market, catalog) in catalogs {
                if let Some(candidate) = catalog.price(item) {
                    if candidate < price {
                        target = market;
                        price = candidate;
                    }
                }
            }

            match assignments.iter_mut().find(|a| &a.market == target) {
                Some(existing) => {
                    existing.items.push(item.clone());
                    existing.cost += price;
                }
                None => assignments.push(MarketAssignment {
                    market: target.clone(),
                    items: vec![item.clone()],
                    cost: price,
                }),
            }
        }
    }

    let item_cost: f64 = assignments.iter().map(|a| a.cost).sum();
    if item_cost < allocation.item_cost {
        tracing::debug!(
            "Re-sourcing lowered item cost from {:.2} to {:.2}",
            allocation.item_cost,
            item_cost
        );
    }

    Allocation {
        assignments,
        item_cost,
        delivery_fee: allocation.delivery_fee,
        total_price: item_cost + allocation.delivery_fee,
        unfulfilled: allocation.unfulfilled,
    }
}

fn coverage(catalog: &Catalog, remaining: &[String]) -> (Vec<String>, f64) {
    let mut covered = Vec::new();
    let mut cost = 0.0;
    for item in remaining {
        if let Some(price) = catalog.price(item) {
            covered.push(item.clone());
            cost += price;
        }
    }
    (covered, cost)
}
