use std::path::Path;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use flow_engine::SizeTierConfig;

/// App configuration, read from `config.toml` in the data directory.
/// Everything has a default so a missing file means a usable offline setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Backend base URL; syncing is disabled without it.
    pub backend_url: Option<String>,
    pub api_key: Option<String>,
    pub reporting_currency: String,
    /// Optional self-imposed monthly spending budget, in the reporting
    /// currency.
    pub monthly_budget: Option<f64>,
    pub size_tiers: SizeTierConfig,
    /// Weekend days, lowercase English names.
    pub weekend: [String; 2],
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            api_key: None,
            reporting_currency: "QAR".to_string(),
            monthly_budget: None,
            size_tiers: SizeTierConfig::default(),
            weekend: ["friday".to_string(), "saturday".to_string()],
        }
    }
}

impl FlowConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn weekend_days(&self) -> [Weekday; 2] {
        [
            parse_weekday(&self.weekend[0]).unwrap_or(Weekday::Fri),
            parse_weekday(&self.weekend[1]).unwrap_or(Weekday::Sat),
        ]
    }
}

fn parse_weekday(name: &str) -> Option<Weekday> {
    match name.trim().to_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_offline_qatar() {
        let cfg = FlowConfig::default();
        assert_eq!(cfg.reporting_currency, "QAR");
        assert_eq!(cfg.weekend_days(), [Weekday::Fri, Weekday::Sat]);
        assert!(cfg.backend_url.is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: FlowConfig = toml::from_str(
            r#"
            backend_url = "https://backend.example.com"
            monthly_budget = 9000.0
            weekend = ["saturday", "sunday"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.backend_url.as_deref(), Some("https://backend.example.com"));
        assert_eq!(cfg.monthly_budget, Some(9000.0));
        assert_eq!(cfg.weekend_days(), [Weekday::Sat, Weekday::Sun]);
        assert_eq!(cfg.reporting_currency, "QAR");
        assert_eq!(cfg.size_tiers.large_min, 500.0);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = FlowConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(cfg.reporting_currency, "QAR");
    }
}
