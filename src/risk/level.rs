use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered risk severity. `Halt` blocks every new order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Normal,
    Caution,
    Warning,
    Halt,
}

impl RiskLevel {
    /// Fraction of the nominal position size allowed at this level
    pub fn position_multiplier(&self) -> Decimal {
        match self {
            RiskLevel::Normal => Decimal::ONE,
            RiskLevel::Caution => dec!(0.75),
            RiskLevel::Warning => dec!(0.5),
            RiskLevel::Halt => Decimal::ZERO,
        }
    }

    pub fn allows_new_orders(&self) -> bool {
        *self != RiskLevel::Halt
    }

    /// Band a metric against a soft and a hard threshold.
    ///
    /// `value < warning` is NORMAL, `value >= hard` is HALT, and the range in
    /// between splits at its midpoint into CAUTION and WARNING.
    pub fn from_thresholds(value: Decimal, warning: Decimal, hard: Decimal) -> Self {
        if value >= hard {
            RiskLevel::Halt
        } else if value >= (warning + hard) / Decimal::TWO {
            RiskLevel::Warning
        } else if value >= warning {
            RiskLevel::Caution
        } else {
            RiskLevel::Normal
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RiskLevel::Normal,
            1 => RiskLevel::Caution,
            2 => RiskLevel::Warning,
            _ => RiskLevel::Halt,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Normal => "NORMAL",
            RiskLevel::Caution => "CAUTION",
            RiskLevel::Warning => "WARNING",
            RiskLevel::Halt => "HALT",
        };
        write!(f, "{}", s)
    }
}

/// How much the reported level can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Full,
    /// Not enough data yet; the level is a placeholder
    Degraded,
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    /// Level after hysteresis; this is what gates trading
    pub level: RiskLevel,
    /// Level the metrics alone would give
    pub raw_level: RiskLevel,
    pub drawdown_level: RiskLevel,
    pub leverage_level: RiskLevel,
    pub drawdown: Decimal,
    /// `None` when equity is not positive
    pub effective_leverage: Option<Decimal>,
    pub peak_balance: Decimal,
    pub position_multiplier: Decimal,
    pub confidence: Confidence,
    pub reason: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl RiskAssessment {
    pub(crate) fn degraded(reason: impl Into<String>) -> Self {
        Self {
            level: RiskLevel::Normal,
            raw_level: RiskLevel::Normal,
            drawdown_level: RiskLevel::Normal,
            leverage_level: RiskLevel::Normal,
            drawdown: Decimal::ZERO,
            effective_leverage: None,
            peak_balance: Decimal::ZERO,
            position_multiplier: RiskLevel::Normal.position_multiplier(),
            confidence: Confidence::Degraded,
            reason: Some(reason.into()),
            evaluated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(RiskLevel::Normal < RiskLevel::Caution);
        assert!(RiskLevel::Caution < RiskLevel::Warning);
        assert!(RiskLevel::Warning < RiskLevel::Halt);
        assert_eq!(RiskLevel::Caution.max(RiskLevel::Halt), RiskLevel::Halt);
    }

    #[test]
    fn test_position_multipliers() {
        assert_eq!(RiskLevel::Normal.position_multiplier(), dec!(1));
        assert_eq!(RiskLevel::Caution.position_multiplier(), dec!(0.75));
        assert_eq!(RiskLevel::Warning.position_multiplier(), dec!(0.5));
        assert_eq!(RiskLevel::Halt.position_multiplier(), dec!(0));
        assert!(!RiskLevel::Halt.allows_new_orders());
    }

    #[test]
    fn test_threshold_bands() {
        let (warn, hard) = (dec!(0.01), dec!(0.02));
        assert_eq!(RiskLevel::from_thresholds(dec!(0.005), warn, hard), RiskLevel::Normal);
        assert_eq!(RiskLevel::from_thresholds(dec!(0.01), warn, hard), RiskLevel::Caution);
        assert_eq!(RiskLevel::from_thresholds(dec!(0.0149), warn, hard), RiskLevel::Caution);
        assert_eq!(RiskLevel::from_thresholds(dec!(0.015), warn, hard), RiskLevel::Warning);
        assert_eq!(RiskLevel::from_thresholds(dec!(0.02), warn, hard), RiskLevel::Halt);
        assert_eq!(RiskLevel::from_thresholds(dec!(0.025), warn, hard), RiskLevel::Halt);
    }

    #[test]
    fn test_u8_roundtrip_and_display() {
        for level in [RiskLevel::Normal, RiskLevel::Caution, RiskLevel::Warning, RiskLevel::Halt] {
            assert_eq!(RiskLevel::from_u8(level.as_u8()), level);
        }
        assert_eq!(RiskLevel::Warning.to_string(), "WARNING");
        assert_eq!(serde_json::to_string(&RiskLevel::Halt).unwrap(), "\"HALT\"");
    }
}
