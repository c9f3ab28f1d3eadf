use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::category::Category;
use super::money::Money;

/// A curated substring-match rule mapping SMS text to a merchant identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantRule {
    /// Substring matched against the lowercased raw text.
    pub pattern: String,
    pub display_name: String,
    pub consolidated_name: String,
    /// Free-text label; folded onto the canonical set at resolution time.
    pub category: String,
}

/// A user's manual correction, keyed by the exact lowercase raw text.
/// Always wins over every other resolution source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalOverride {
    pub display_name: String,
    pub consolidated_name: String,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    /// Normalized digits, country code stripped.
    pub phone: Option<String>,
    pub bank_account: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
}

/// Free-text correction/context supplied by the user. Only ever used to
/// exempt transactions from splurge tagging, never to re-categorize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContextEntry {
    pub entry_type: String,
    pub key: String,
    pub value: String,
    pub details: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub category: Category,
    pub monthly_limit: Money,
}

/// A server-detected recurring payment (subscription, standing order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringItem {
    pub name: String,
    pub monthly_cost: Money,
    pub active: bool,
}

/// Per-user FX rates into the reporting currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FxTable {
    pub reporting_currency: String,
    rates: HashMap<String, Decimal>,
}

impl FxTable {
    pub fn new(reporting_currency: impl Into<String>) -> Self {
        FxTable {
            reporting_currency: reporting_currency.into(),
            rates: HashMap::new(),
        }
    }

    pub fn insert(&mut self, currency: impl Into<String>, rate: Decimal) {
        self.rates.insert(currency.into().to_uppercase(), rate);
    }

    /// Rate into the reporting currency. The reporting currency itself and
    /// any unknown currency convert at 1.
    pub fn rate(&self, currency: &str) -> Decimal {
        let code = currency.trim().to_uppercase();
        if code == self.reporting_currency.to_uppercase() {
            return Decimal::ONE;
        }
        self.rates.get(&code).copied().unwrap_or(Decimal::ONE)
    }

    pub fn convert(&self, amount: Money, currency: &str) -> Money {
        amount.mul_rate(self.rate(currency))
    }
}
