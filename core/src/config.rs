use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Thresholds applied when a budget is created without its own list.
    pub default_thresholds: Vec<Decimal>,
    /// Multiplier reported when no rate data exists for any active card.
    pub fallback_multiplier: Decimal,
    /// Multiplier given to cards by `ensure_default_base_rules`.
    pub default_base_multiplier: Decimal,
    /// Months returned by `budget_history` when no limit is given.
    pub history_months: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::default_test()
    }
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/engine_config.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_test() -> Self {
        Self {
            default_thresholds:      vec![Decimal::new(5, 1), Decimal::new(7, 1), Decimal::new(9, 1)],
            fallback_multiplier:     Decimal::ONE,
            default_base_multiplier: Decimal::ONE,
            history_months:          6,
            busy_timeout_ms:         5_000,
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        crate::threshold::validate_thresholds(&self.default_thresholds)
            .map_err(|e| anyhow::anyhow!("default_thresholds: {e}"))?;
        if self.fallback_multiplier.is_sign_negative() || self.default_base_multiplier.is_sign_negative() {
            anyhow::bail!("multipliers must be non-negative");
        }
        if self.history_months == 0 {
            anyhow::bail!("history_months must be at least 1");
        }
        Ok(())
    }
}

// ── Card catalog ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRule {
    pub categories: Vec<String>,
    pub multiplier: Decimal,
    #[serde(default)]
    pub cap_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogCard {
    pub issuer:     String,
    pub name:       String,
    pub annual_fee: Decimal,
    #[serde(default)]
    pub foreign_transaction_fee: bool,
    #[serde(default)]
    pub rules: Vec<CatalogRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardCatalog {
    pub cards: Vec<CatalogCard>,
}

impl CardCatalog {
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/card_catalog.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let catalog: CardCatalog = serde_json::from_str(&content)?;
        Ok(catalog)
    }
}
