//! Allocation and bid-selection properties over generated markets and orders.

use grocery_market::{
    allocation::{greedy_cover, AllocationStrategy},
    bidding::select_best_bid,
    model::{AgentId, Bid, Catalog, CorrelationId, Order},
};
use proptest::prelude::*;
use std::collections::BTreeMap;

const PRODUCTS: &[&str] = &["milk", "rice", "coffee", "tea", "bread", "eggs", "butter"];
const BID_PRICES: &[f64] = &[4.0, 8.0, 8.5, 12.0];

fn product() -> impl Strategy<Value = String> {
    prop::sample::select(PRODUCTS).prop_map(str::to_string)
}

fn order() -> impl Strategy<Value = Order> {
    prop::collection::vec(product(), 0..10).prop_map(Order::new)
}

fn catalogs() -> impl Strategy<Value = BTreeMap<AgentId, Catalog>> {
    let catalog = prop::collection::btree_map(product(), 0.0f64..100.0, 0..6)
        .prop_map(|prices| prices.into_iter().collect::<Catalog>());
    prop::collection::btree_map((0u8..8).prop_map(|i| AgentId::new(format!("Market{}", i))), catalog, 0..6)
}

fn strategies() -> impl Strategy<Value = AllocationStrategy> {
    prop_oneof![
        Just(AllocationStrategy::GreedyCover),
        Just(AllocationStrategy::GreedyCoverRefined),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_every_item_sourced_once_or_unfulfilled(
        order in order(),
        catalogs in catalogs(),
        strategy in strategies(),
        fee in 0.0f64..60.0,
    ) {
        let allocation = strategy.allocate(&order, &catalogs, fee);
        prop_assert_eq!(allocation.allocated_item_count() + allocation.unfulfilled.len(), order.len());

        let mut accounted: Vec<String> = allocation
            .assignments
            .iter()
            .flat_map(|a| a.items.iter().cloned())
            .chain(allocation.unfulfilled.iter().cloned())
            .collect();
        let mut expected = order.items().to_vec();
        accounted.sort();
        expected.sort();
        prop_assert_eq!(accounted, expected);

        for item in &allocation.unfulfilled {
            prop_assert!(catalogs.values().all(|c| !c.contains(item)));
        }
    }

    #[test]
    fn prop_price_is_item_cost_plus_fee(
        order in order(),
        catalogs in catalogs(),
        strategy in strategies(),
        fee in 0.0f64..60.0,
    ) {
        let allocation = strategy.allocate(&order, &catalogs, fee);
        let summed: f64 = allocation.assignments.iter().map(|a| a.cost).sum();
        prop_assert!((allocation.item_cost - summed).abs() < 1e-6);
        prop_assert!((allocation.total_price - (allocation.item_cost + fee)).abs() < 1e-9);

        for assignment in &allocation.assignments {
            let catalog = &catalogs[&assignment.market];
            let priced: f64 = assignment.items.iter().filter_map(|i| catalog.price(i)).sum();
            prop_assert_eq!(
                assignment.items.iter().filter(|i| catalog.contains(i)).count(),
                assignment.items.len()
            );
            prop_assert!((assignment.cost - priced).abs() < 1e-6);
        }
    }

    #[test]
    fn prop_irrelevant_markets_never_chosen(
        order in order(),
        catalogs in catalogs(),
        strategy in strategies(),
    ) {
        let allocation = strategy.allocate(&order, &catalogs, 5.0);
        for market in allocation.markets() {
            let catalog = &catalogs[market];
            prop_assert!(order.items().iter().any(|i| catalog.contains(i)));
        }

        let mut markets: Vec<&AgentId> = allocation.markets().collect();
        let total = markets.len();
        markets.sort();
        markets.dedup();
        prop_assert_eq!(markets.len(), total);
    }

    #[test]
    fn prop_allocation_is_deterministic(
        order in order(),
        catalogs in catalogs(),
        strategy in strategies(),
    ) {
        prop_assert_eq!(
            strategy.allocate(&order, &catalogs, 5.0),
            strategy.allocate(&order, &catalogs, 5.0)
        );
    }

    #[test]
    fn prop_refinement_never_costs_more(order in order(), catalogs in catalogs()) {
        let greedy = greedy_cover(&order, &catalogs, 5.0);
        let refined = AllocationStrategy::GreedyCoverRefined.allocate(&order, &catalogs, 5.0);
        prop_assert!(refined.item_cost <= greedy.item_cost + 1e-9);
        prop_assert_eq!(refined.unfulfilled, greedy.unfulfilled);
    }

    #[test]
    fn prop_selected_bid_is_minimum_and_earliest(
        prices in prop::collection::vec(prop::sample::select(BID_PRICES), 0..8),
    ) {
        let bids: Vec<Bid> = prices
            .iter()
            .enumerate()
            .map(|(i, price)| {
                Bid::new(
                    AgentId::new(format!("Delivery{}", i)),
                    *price,
                    CorrelationId::from_raw(format!("Client1-Delivery{}-{}", i, i)),
                )
            })
            .collect();

        match select_best_bid(&bids) {
            None => prop_assert!(bids.is_empty()),
            Some(best) => {
                prop_assert!(bids.iter().all(|b| best.price <= b.price));
                let first = bids.iter().position(|b| b.price == best.price).unwrap();
                prop_assert_eq!(&bids[first].delivery, &best.delivery);
            }
        }
    }
}
