//! Symbol Allow-List
//!
//! The fixed set of instruments a deployment relays. Requests are matched
//! case-insensitively; a match resolves to the broker's canonical spelling.

use std::collections::BTreeMap;

use super::market::{Symbol, SymbolKey};

/// Instruments relayed when no explicit list is configured.
///
/// Covers forex majors and crosses, crypto, indices and metals/energy on a
/// broker that suffixes its symbols with `.a`.
pub const DEFAULT_SYMBOLS: &[&str] = &[
    // Forex
    "EURUSD.a", "GBPUSD.a", "USDJPY.a", "USDCHF.a", "AUDUSD.a", "USDCAD.a", "NZDUSD.a",
    "EURGBP.a", "EURJPY.a", "GBPJPY.a",
    // Crypto
    "BTCUSD.a", "ETHUSD.a", "LTCUSD.a", "XRPUSD.a",
    // Indices
    "US30.a", "US500.a", "NAS100.a", "GER40.a", "UK100.a", "JPN225.a",
    // Commodities
    "XAUUSD.a", "XAGUSD.a", "USOIL.a", "UKOIL.a",
];

/// Case-insensitive set of tradable symbols.
#[derive(Debug, Clone)]
pub struct SymbolAllowList {
    symbols: BTreeMap<SymbolKey, Symbol>,
}

impl SymbolAllowList {
    /// Build an allow-list from canonical symbol names.
    ///
    /// Blank names are skipped. If two names differ only in case, the first
    /// one is kept.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut symbols = BTreeMap::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            let symbol = Symbol::new(name);
            symbols.entry(symbol.key()).or_insert(symbol);
        }
        Self { symbols }
    }

    /// Resolve a requested symbol to its canonical spelling.
    ///
    /// Returns `None` if the symbol is not tradable here.
    #[must_use]
    pub fn resolve(&self, requested: &str) -> Option<&Symbol> {
        self.symbols.get(&SymbolKey::from_requested(requested))
    }

    /// Whether the requested symbol is tradable here.
    #[must_use]
    pub fn contains(&self, requested: &str) -> bool {
        self.resolve(requested).is_some()
    }

    /// All symbols, ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl Default for SymbolAllowList {
    fn default() -> Self {
        Self::new(DEFAULT_SYMBOLS.iter().copied())
    }
}

// =============================================================================
// Tests
// =============================================================================
