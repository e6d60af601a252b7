//! Message content encoding.
//!
//! Item lists and catalogs travel as JSON, prices as plain decimals. Catalog
//! decoding is lenient: a bad entry is dropped, the rest of the reply is kept.

use crate::{
    error::{MarketError, Result},
    model::Catalog,
};
use serde_json::Value;

pub const FULFILLMENT_NOTE: &str = "Here is your delivery, enjoy!";

pub fn encode_items(items: &[String]) -> String {
    Value::from(items.to_vec()).to_string()
}

pub fn decode_items(content: &str) -> Result<Vec<String>> {
    serde_json::from_str(content).map_err(Into::into)
}

pub fn encode_catalog(catalog: &Catalog) -> String {
    let entries: serde_json::Map<String, Value> = catalog
        .iter()
        .map(|(item, price)| (item.to_string(), Value::from(price)))
        .collect();
    Value::Object(entries).to_string()
}

pub fn decode_catalog(content: &str) -> Catalog {
    let mut catalog = Catalog::new();
    if content.trim().is_empty() {
        return catalog;
    }

    let entries = match serde_json::from_str::<serde_json::Map<String, Value>>(content) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Unparsable stock reply, treating as empty: {}", e);
            return catalog;
        }
    };

    for (item, value) in entries {
        let price = match &value {
            Value::Number(n) => n.as_f64().filter(|p| p.is_finite() && *p >= 0.0),
            Value::String(raw) => parse_price(raw),
            _ => None,
        };

        match price {
            Some(price) => {
                if let Err(e) = catalog.insert(item, price) {
                    tracing::warn!("Skipping stock entry: {}", e);
                }
            }
            None => tracing::warn!(%item, "Skipping stock entry with unparsable price <{}>", value),
        }
    }

    catalog
}

pub fn encode_price(price: f64) -> String {
    price.to_string()
}

pub fn decode_price(content: &str) -> Result<f64> {
    parse_price(content)
        .ok_or_else(|| MarketError::InvalidInput(format!("Unparsable price <{}>", content)))
}

fn parse_price(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_survives_encoding() {
        let catalog = Catalog::from_prices([("milk", 5.0), ("rice", 3.4)]).unwrap();
        let decoded = decode_catalog(&encode_catalog(&catalog));
        assert_eq!(decoded, catalog);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let content = r#"{"milk": 5.0, "rice": "3,40", "tea": "cheap", "salt": -1, "oil": null}"#;
        let catalog = decode_catalog(content);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.price("milk"), Some(5.0));
        assert_eq!(catalog.price("rice"), Some(3.4));
        assert!(!catalog.contains("tea"));
        assert!(!catalog.contains("salt"));
    }

    #[test]
    fn test_unparsable_reply_is_empty() {
        assert!(decode_catalog("milk:5.00,rice:3.40").is_empty());
        assert!(decode_catalog("").is_empty());
    }

    #[test]
    fn test_price_decoding() {
        assert_eq!(decode_price("11").unwrap(), 11.0);
        assert_eq!(decode_price(" 8,50 ").unwrap(), 8.5);
        assert!(decode_price("free").is_err());
        assert!(decode_price("-3").is_err());
        assert!(decode_price("NaN").is_err());
    }

    #[test]
    fn test_items_keep_order_and_duplicates() {
        let items = vec!["milk".to_string(), "olive oil".to_string(), "milk".to_string()];
        assert_eq!(decode_items(&encode_items(&items)).unwrap(), items);
        assert!(decode_items("milk,rice").is_err());
    }
}
