use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account metrics at one point in time.
///
/// Produced by the account feed once per tick and never mutated afterwards;
/// readers hold an `Arc<AccountState>` and the feed swaps in a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: Decimal,
    pub equity: Decimal,
    /// Margin currently locked by open positions
    pub margin_used: Decimal,
    /// Account leverage setting (e.g. 100 for 1:100)
    pub leverage: Decimal,
    pub daily_pnl: Decimal,
    /// Highest balance of the session; non-decreasing until a session reset
    pub peak_balance: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl AccountState {
    pub fn new(
        balance: Decimal,
        equity: Decimal,
        margin_used: Decimal,
        leverage: Decimal,
        daily_pnl: Decimal,
        peak_balance: Decimal,
    ) -> Self {
        Self {
            balance,
            equity,
            margin_used,
            leverage,
            daily_pnl,
            peak_balance,
            timestamp: Utc::now(),
        }
    }

    /// Notional exposure of open positions
    pub fn exposure(&self) -> Decimal {
        self.margin_used * self.leverage
    }

    /// Fractional loss from `peak` to current equity, floored at zero.
    /// `None` when there is no positive peak to measure against.
    pub fn drawdown_from(&self, peak: Decimal) -> Option<Decimal> {
        if peak <= Decimal::ZERO {
            return None;
        }
        Some(((peak - self.equity) / peak).max(Decimal::ZERO))
    }

    /// Exposure over equity. `None` when equity is not positive.
    pub fn effective_leverage(&self) -> Option<Decimal> {
        if self.equity <= Decimal::ZERO {
            return None;
        }
        Some(self.exposure() / self.equity)
    }

    /// Structural sanity checks; the feed is an external collaborator
    pub fn check(&self) -> Result<(), String> {
        if self.margin_used < Decimal::ZERO {
            return Err(format!("margin_used cannot be negative: {}", self.margin_used));
        }
        if self.leverage < Decimal::ZERO {
            return Err(format!("leverage cannot be negative: {}", self.leverage));
        }
        if self.peak_balance < Decimal::ZERO {
            return Err(format!(
                "peak_balance cannot be negative: {}",
                self.peak_balance
            ));
        }
        Ok(())
    }
}
