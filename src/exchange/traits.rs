use async_trait::async_trait;

use crate::domain::{ExecutionReceipt, Order, SymbolMap};
use crate::error::BrokerError;

/// Broker adapter the dispatcher submits admitted orders to.
///
/// Implementations own their transport; the dispatcher bounds every call
/// with its own timeout and circuit breaker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn submit_order(&self, order: &Order) -> Result<ExecutionReceipt, BrokerError>;
}

/// Breaker name guarding submissions for one instrument. Broker suffixes
/// and case are normalised away so every spelling shares one breaker.
pub fn breaker_name(symbol: &str) -> String {
    format!("broker.{}", SymbolMap::normalize(symbol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn breaker_name_is_per_symbol() {
        assert_eq!(breaker_name("EURUSD"), "broker.EURUSD");
        assert_ne!(breaker_name("EURUSD"), breaker_name("GBPUSD"));
    }

    #[test]
    fn breaker_name_ignores_broker_spelling() {
        for spelling in ["EURUSD.pro", "eurusd", "EURUSD-ecn", " EURUSDm"] {
            assert_eq!(breaker_name(spelling), "broker.EURUSD", "{spelling}");
        }
    }

    #[tokio::test]
    async fn mock_executor_returns_scripted_receipt() {
        let mut executor = MockOrderExecutor::new();
        executor.expect_submit_order().times(1).returning(|order| {
            Ok(ExecutionReceipt {
                order_id: order.order_id.clone(),
                broker_order_id: "b-1".to_string(),
                filled_quantity: order.quantity,
                avg_price: None,
                executed_at: Utc::now(),
            })
        });

        let order = Order::buy("EURUSD", dec!(1)).with_id("o-1");
        let receipt = executor.submit_order(&order).await.unwrap();
        assert_eq!(receipt.order_id, "o-1");
        assert_eq!(receipt.filled_quantity, dec!(1));
    }
}
