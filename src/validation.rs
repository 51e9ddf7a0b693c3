/// Input validation for orders entering the dispatcher
///
/// Every check here runs before any admission slot is touched, so a
/// malformed order never consumes capacity or reaches the broker.
use crate::domain::Order;
use crate::error::{GuardError, Result};
use rust_decimal::Decimal;

/// Upper bound on a single order's quantity
pub const MAX_ORDER_QUANTITY: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

const MAX_SYMBOL_LEN: usize = 32;

/// Validate order quantity (positive, bounded)
pub fn validate_quantity(quantity: Decimal) -> Result<()> {
    if quantity <= Decimal::ZERO {
        return Err(GuardError::Validation(format!(
            "quantity must be positive: {}",
            quantity
        )));
    }

    if quantity > MAX_ORDER_QUANTITY {
        return Err(GuardError::Validation(format!(
            "quantity {} exceeds maximum {}",
            quantity, MAX_ORDER_QUANTITY
        )));
    }

    Ok(())
}

/// Validate a trading symbol
pub fn validate_symbol(symbol: &str) -> Result<()> {
    let trimmed = symbol.trim();

    if trimmed.is_empty() {
        return Err(GuardError::Validation("symbol cannot be empty".to_string()));
    }

    if trimmed.len() > MAX_SYMBOL_LEN {
        return Err(GuardError::Validation(format!(
            "symbol too long ({} > {} chars)",
            trimmed.len(),
            MAX_SYMBOL_LEN
        )));
    }

    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '#' | '-' | '_'))
    {
        return Err(GuardError::Validation(format!(
            "symbol contains invalid characters: {:?}",
            symbol
        )));
    }

    Ok(())
}

/// Validate an order identifier
pub fn validate_order_id(order_id: &str) -> Result<()> {
    if order_id.trim().is_empty() {
        return Err(GuardError::Validation("order_id cannot be empty".to_string()));
    }
    Ok(())
}

/// Validate a full order
pub fn validate_order(order: &Order) -> Result<()> {
    validate_order_id(&order.order_id)?;
    validate_symbol(&order.symbol)?;
    validate_quantity(order.quantity)?;
    Ok(())
}
