//! Configuration loader: merges defaults, config.toml, and env overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use signal_domain::{ConfigError, EngineConfig, Instrument};

/// Full daemon configuration: the engine settings plus the tracked
/// instrument list and paper-adapter knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Instruments tracked at startup. The registry stays mutable at
    /// runtime; this only seeds it.
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    #[serde(default)]
    pub journal: JournalConfig,
}

/// One tracked instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Ticker symbol, unique.
    pub symbol: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Price served by the paper data provider.
    #[serde(default = "default_paper_price")]
    pub paper_price: f64,
}

impl InstrumentConfig {
    pub fn to_instrument(&self) -> Instrument {
        Instrument {
            id: self.symbol.clone(),
            display_name: self.name.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Thresholds for the paper evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default = "default_buy_below")]
    pub buy_below: f64,

    #[serde(default = "default_sell_above")]
    pub sell_above: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Report journal directory. `SIGNAL_JOURNAL_DIR` takes precedence at
    /// journal-open time; defaults to ./reports.
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_paper_price() -> f64 {
    100.0
}

fn default_buy_below() -> f64 {
    95.0
}

fn default_sell_above() -> f64 {
    105.0
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            buy_below: default_buy_below(),
            sell_above: default_sell_above(),
        }
    }
}

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, ConfigError> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(ConfigError::Invalid(format!(
            "{env_name} must be an integer > 0"
        )));
    }
    Ok(parsed)
}

fn validate(config: &DaemonConfig) -> Result<(), ConfigError> {
    let mut issues: Vec<String> = Vec::new();

    if let Err(err) = config.engine.validate() {
        issues.push(err.to_string());
    }

    for (index, instrument) in config.instruments.iter().enumerate() {
        if instrument.symbol.trim().is_empty() {
            issues.push(format!("instruments[{index}].symbol must not be empty"));
        }
        if config.instruments[..index]
            .iter()
            .any(|other| other.symbol == instrument.symbol)
        {
            issues.push(format!(
                "instruments[{index}].symbol duplicates {}",
                instrument.symbol
            ));
        }
        if !instrument.paper_price.is_finite() || instrument.paper_price <= 0.0 {
            issues.push(format!("instruments[{index}].paper_price must be > 0"));
        }
    }

    if config.evaluator.buy_below >= config.evaluator.sell_above {
        issues.push("evaluator.buy_below must be < evaluator.sell_above".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(issues.join("\n - ")))
    }
}

/// Load daemon configuration: defaults, then the config file if present,
/// then environment variables (highest priority), then validation.
pub fn load_config(path: &Path) -> Result<DaemonConfig, ConfigError> {
    if let Err(err) = dotenvy::dotenv() {
        tracing::debug!("no .env file loaded: {}", err);
    }

    let mut config = DaemonConfig::default();

    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Invalid(format!("failed to read {}: {err}", path.display())))?;
        config = toml::from_str(&contents)
            .map_err(|err| ConfigError::Invalid(format!("failed to parse {}: {err}", path.display())))?;
    }

    if let Ok(raw) = std::env::var("SIGNAL_TICK_INTERVAL_SECS") {
        config.engine.tick_interval_secs = parse_positive_u64(&raw, "SIGNAL_TICK_INTERVAL_SECS")?;
    }
    if let Ok(raw) = std::env::var("SIGNAL_WORKER_POOL_SIZE") {
        config.engine.worker_pool_size =
            parse_positive_u64(&raw, "SIGNAL_WORKER_POOL_SIZE")? as usize;
    }
    if let Ok(raw) = std::env::var("SIGNAL_PER_CALL_TIMEOUT_MS") {
        config.engine.per_call_timeout_ms =
            parse_positive_u64(&raw, "SIGNAL_PER_CALL_TIMEOUT_MS")?;
    }
    if let Ok(raw) = std::env::var("SIGNAL_RUN_DEADLINE_MS") {
        config.engine.run_deadline_ms = parse_positive_u64(&raw, "SIGNAL_RUN_DEADLINE_MS")?;
    }
    if let Ok(raw) = std::env::var("SIGNAL_RETRY_MAX_ATTEMPTS") {
        config.engine.retry.max_attempts =
            parse_positive_u64(&raw, "SIGNAL_RETRY_MAX_ATTEMPTS")? as u32;
    }
    if let Ok(raw) = std::env::var("SIGNAL_RETRY_BACKOFF_BASE_MS") {
        config.engine.retry.backoff_base_ms =
            parse_positive_u64(&raw, "SIGNAL_RETRY_BACKOFF_BASE_MS")?;
    }
    validate(&config)?;

    Ok(config)
}
