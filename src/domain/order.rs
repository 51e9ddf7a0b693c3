use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::asset::AssetType;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order submitted for dispatch. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    /// Declared asset class. Routing always derives the class from `symbol`
    /// through the prefix table; a declaration that disagrees is rejected.
    pub asset_type: Option<AssetType>,
    pub side: OrderSide,
    pub quantity: Decimal,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            asset_type: None,
            side,
            quantity,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn buy(symbol: impl Into<String>, quantity: Decimal) -> Self {
        Self::new(symbol, OrderSide::Buy, quantity)
    }

    pub fn sell(symbol: impl Into<String>, quantity: Decimal) -> Self {
        Self::new(symbol, OrderSide::Sell, quantity)
    }

    pub fn with_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = order_id.into();
        self
    }

    pub fn with_asset_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = Some(asset_type);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Broker acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub order_id: String,
    pub broker_order_id: String,
    pub filled_quantity: Decimal,
    pub avg_price: Option<Decimal>,
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_builder() {
        let order = Order::buy("EURUSD", dec!(1.5))
            .with_id("ord-1")
            .with_metadata("strategy", "breakout");

        assert_eq!(order.order_id, "ord-1");
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.asset_type, None);
        assert_eq!(order.metadata.get("strategy").map(String::as_str), Some("breakout"));
    }

    #[test]
    fn test_side_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&OrderSide::Sell).unwrap(), "\"SELL\"");
    }
}
