//! Asset classes and the symbol prefix table that assigns them

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Asset class an order is routed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Forex,
    Metals,
    Crypto,
    Indices,
    Energies,
    Equities,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Forex => "forex",
            AssetType::Metals => "metals",
            AssetType::Crypto => "crypto",
            AssetType::Indices => "indices",
            AssetType::Energies => "energies",
            AssetType::Equities => "equities",
        }
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "forex" | "fx" => Ok(AssetType::Forex),
            "metals" | "metal" => Ok(AssetType::Metals),
            "crypto" => Ok(AssetType::Crypto),
            "indices" | "index" => Ok(AssetType::Indices),
            "energies" | "energy" => Ok(AssetType::Energies),
            "equities" | "stocks" => Ok(AssetType::Equities),
            other => Err(format!("unknown asset type '{}'", other)),
        }
    }
}

/// One row of the prefix table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymbolRule {
    pub prefix: String,
    pub asset_type: AssetType,
}

impl SymbolRule {
    pub fn new(prefix: &str, asset_type: AssetType) -> Self {
        Self {
            prefix: prefix.to_string(),
            asset_type,
        }
    }
}

/// Resolves symbols to asset classes via an explicit prefix table.
///
/// Symbols are normalised first: broker suffixes after `.`, `#`, `-` or `_`
/// are cut (`EURUSD.pro`, `XAUUSD#`, `GBPUSD-ecn`), a trailing lowercase account suffix is dropped
/// (`EURUSDm`), and the rest is upper-cased. The longest matching prefix wins.
#[derive(Debug, Clone)]
pub struct SymbolMap {
    rules: Vec<SymbolRule>,
}

impl SymbolMap {
    pub fn new(rules: Vec<SymbolRule>) -> Self {
        let mut rules: Vec<SymbolRule> = rules
            .into_iter()
            .map(|r| SymbolRule {
                prefix: r.prefix.trim().to_ascii_uppercase(),
                asset_type: r.asset_type,
            })
            .filter(|r| !r.prefix.is_empty())
            .collect();
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { rules }
    }

    pub fn default_rules() -> Vec<SymbolRule> {
        use AssetType::*;

        let table: &[(&str, AssetType)] = &[
            // Metals before currencies: XAU/XAG are quoted against USD
            ("XAU", Metals),
            ("XAG", Metals),
            ("XPT", Metals),
            ("XPD", Metals),
            ("BTC", Crypto),
            ("ETH", Crypto),
            ("SOL", Crypto),
            ("XRP", Crypto),
            ("LTC", Crypto),
            ("US30", Indices),
            ("US500", Indices),
            ("NAS100", Indices),
            ("SPX", Indices),
            ("GER40", Indices),
            ("UK100", Indices),
            ("JP225", Indices),
            ("USOIL", Energies),
            ("UKOIL", Energies),
            ("WTI", Energies),
            ("BRENT", Energies),
            ("XNG", Energies),
            ("EUR", Forex),
            ("GBP", Forex),
            ("USD", Forex),
            ("AUD", Forex),
            ("NZD", Forex),
            ("CAD", Forex),
            ("CHF", Forex),
            ("JPY", Forex),
        ];

        table
            .iter()
            .map(|(prefix, asset)| SymbolRule::new(prefix, *asset))
            .collect()
    }

    pub fn normalize(symbol: &str) -> String {
        let trimmed = symbol.trim();
        let base = trimmed
            .split(['.', '#', '-', '_'])
            .next()
            .unwrap_or(trimmed);
        let stripped = base.trim_end_matches(|c: char| c.is_ascii_lowercase());
        let base = if stripped.chars().any(|c| c.is_ascii_uppercase()) {
            stripped
        } else {
            base
        };
        base.to_ascii_uppercase()
    }

    pub fn classify(&self, symbol: &str) -> Option<AssetType> {
        let normalized = Self::normalize(symbol);
        if normalized.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| normalized.starts_with(&rule.prefix))
            .map(|rule| rule.asset_type)
    }

    pub fn rules(&self) -> &[SymbolRule] {
        &self.rules
    }
}

impl Default for SymbolMap {
    fn default() -> Self {
        Self::new(Self::default_rules())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_broker_suffixes() {
        assert_eq!(SymbolMap::normalize("EURUSD.pro"), "EURUSD");
        assert_eq!(SymbolMap::normalize("XAUUSD#"), "XAUUSD");
        assert_eq!(SymbolMap::normalize("EURUSDm"), "EURUSD");
        assert_eq!(SymbolMap::normalize("GBPUSD-ecn"), "GBPUSD");
        assert_eq!(SymbolMap::normalize("USDCHF_i"), "USDCHF");
        assert_eq!(SymbolMap::normalize(" btcusd "), "BTCUSD");
    }

    #[test]
    fn test_classify_default_table() {
        let map = SymbolMap::default();
        assert_eq!(map.classify("EURUSD"), Some(AssetType::Forex));
        assert_eq!(map.classify("USDJPY.x"), Some(AssetType::Forex));
        assert_eq!(map.classify("XAUUSD"), Some(AssetType::Metals));
        assert_eq!(map.classify("BTCUSDm"), Some(AssetType::Crypto));
        assert_eq!(map.classify("US30"), Some(AssetType::Indices));
        assert_eq!(map.classify("USOIL"), Some(AssetType::Energies));
        assert_eq!(map.classify("ZZZ"), None);
        assert_eq!(map.classify(""), None);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let map = SymbolMap::new(vec![
            SymbolRule::new("US", AssetType::Equities),
            SymbolRule::new("usoil", AssetType::Energies),
        ]);
        assert_eq!(map.classify("USOIL"), Some(AssetType::Energies));
        assert_eq!(map.classify("USAA"), Some(AssetType::Equities));
    }

    #[test]
    fn test_asset_type_from_str() {
        assert_eq!("FX".parse::<AssetType>(), Ok(AssetType::Forex));
        assert!("bonds".parse::<AssetType>().is_err());
    }
}
