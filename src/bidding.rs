use crate::model::Bid;

/// Lowest price wins; `bids` is in arrival order so an equal price never
/// displaces an earlier bid.
pub fn select_best_bid(bids: &[Bid]) -> Option<&Bid> {
    let mut best: Option<&Bid> = None;
    for bid in bids {
        match best {
            Some(current) if bid.price >= current.price => {}
            _ => best = Some(bid),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentId, CorrelationId};

    fn bid(delivery: &str, price: f64) -> Bid {
        Bid::new(
            AgentId::new(delivery),
            price,
            CorrelationId::from_raw(format!("Client1-{}-x", delivery)),
        )
    }

    #[test]
    fn test_lowest_price_wins() {
        let bids = vec![bid("DeliveryUber", 12.0), bid("DeliveryBolt", 8.0)];
        assert_eq!(select_best_bid(&bids).unwrap().delivery.as_str(), "DeliveryBolt");
    }

    #[test]
    fn test_tie_goes_to_earliest() {
        let bids = vec![
            bid("DeliveryWolt", 9.0),
            bid("DeliveryBolt", 9.0),
            bid("DeliveryUber", 9.5),
        ];
        assert_eq!(select_best_bid(&bids).unwrap().delivery.as_str(), "DeliveryWolt");
    }

    #[test]
    fn test_no_bids() {
        assert!(select_best_bid(&[]).is_none());
    }
}
