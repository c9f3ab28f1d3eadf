//! REST client for the Flow backend.
//!
//! The backend exposes its tables PostgREST-style under `/rest/v1/<table>`;
//! every request carries the API key both as `apikey` and as a bearer token.
//! Incremental ledger fetches filter on the stored watermark.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use flow_core::{Goal, MerchantRule, Money, Recipient, RecurringItem, UserContextEntry};
use flow_engine::RawRow;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned {status} for {table}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        table: String,
    },
}

pub struct SyncClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl SyncClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn fetch_table<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, SyncError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let mut query: Vec<(&str, String)> = vec![("select", "*".to_string())];
        query.extend_from_slice(filters);

        let response = self
            .http
            .get(&url)
            .query(&query)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::UnexpectedStatus {
                status,
                table: table.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    /// Fetch ledger rows; with a watermark, only rows newer than it.
    pub async fn fetch_ledger(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawRow>, SyncError> {
        let mut filters = vec![("order", "txn_timestamp.desc".to_string())];
        if let Some(since) = since {
            filters.push(("txn_timestamp", format!("gt.{}", since.to_rfc3339())));
        }
        let rows: Vec<RawRow> = self.fetch_table("raw_ledger", &filters).await?;
        tracing::info!(count = rows.len(), incremental = since.is_some(), "fetched ledger rows");
        Ok(rows)
    }

    pub async fn fetch_merchant_rules(&self) -> Result<Vec<MerchantRule>, SyncError> {
        #[derive(Deserialize)]
        struct Row {
            pattern: String,
            display_name: Option<String>,
            consolidated_name: Option<String>,
            category: Option<String>,
        }
        let rows: Vec<Row> = self.fetch_table("merchant_map", &[]).await?;
        Ok(rows
            .into_iter()
            .map(|r| MerchantRule {
                display_name: r.display_name.unwrap_or_else(|| r.pattern.clone()),
                consolidated_name: r.consolidated_name.unwrap_or_else(|| r.pattern.clone()),
                category: r.category.unwrap_or_default(),
                pattern: r.pattern,
            })
            .collect())
    }

    pub async fn fetch_recipients(&self) -> Result<Vec<Recipient>, SyncError> {
        #[derive(Deserialize)]
        struct Row {
            id: i64,
            phone: Option<String>,
            bank_account: Option<String>,
            short_name: Option<String>,
            long_name: Option<String>,
        }
        let rows: Vec<Row> = self.fetch_table("recipients", &[]).await?;
        Ok(rows
            .into_iter()
            .map(|r| Recipient {
                id: r.id,
                phone: r.phone,
                bank_account: r.bank_account,
                short_name: r.short_name,
                long_name: r.long_name,
            })
            .collect())
    }

    /// FX rates into the reporting currency, as (currency, rate) pairs.
    pub async fn fetch_fx_rates(&self) -> Result<Vec<(String, Decimal)>, SyncError> {
        #[derive(Deserialize)]
        struct Row {
            currency: String,
            rate_to_qar: Option<Decimal>,
        }
        let rows: Vec<Row> = self.fetch_table("fx_rates", &[]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.rate_to_qar.map(|rate| (r.currency, rate)))
            .collect())
    }

    pub async fn fetch_user_context(&self) -> Result<Vec<UserContextEntry>, SyncError> {
        #[derive(Deserialize)]
        struct Row {
            #[serde(rename = "type")]
            entry_type: String,
            key: Option<String>,
            value: Option<String>,
            details: Option<String>,
            source: Option<String>,
        }
        let rows: Vec<Row> = self.fetch_table("user_context", &[]).await?;
        Ok(rows
            .into_iter()
            .map(|r| UserContextEntry {
                entry_type: r.entry_type,
                key: r.key.unwrap_or_default(),
                value: r.value.unwrap_or_default(),
                details: r.details,
                source: r.source,
            })
            .collect())
    }

    pub async fn fetch_goals(&self) -> Result<Vec<Goal>, SyncError> {
        #[derive(Deserialize)]
        struct Row {
            category: String,
            monthly_limit: Option<f64>,
        }
        let rows: Vec<Row> = self.fetch_table("goals", &[]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let category = flow_core::Category::from_label(&r.category)?;
                Some(Goal {
                    category,
                    monthly_limit: Money::from_f64(r.monthly_limit.unwrap_or(0.0)),
                })
            })
            .collect())
    }

    pub async fn fetch_recurring_items(&self) -> Result<Vec<RecurringItem>, SyncError> {
        #[derive(Deserialize)]
        struct Row {
            name: String,
            monthly_cost: Option<f64>,
            active: Option<bool>,
        }
        let rows: Vec<Row> = self.fetch_table("recurring_items", &[]).await?;
        Ok(rows
            .into_iter()
            .map(|r| RecurringItem {
                name: r.name,
                monthly_cost: Money::from_f64(r.monthly_cost.unwrap_or(0.0)),
                active: r.active.unwrap_or(true),
            })
            .collect())
    }

    /// The backend-asserted next pay date, if the user's profile carries one.
    pub async fn fetch_next_salary_date(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        #[derive(Deserialize)]
        struct Row {
            next_salary_date: Option<DateTime<Utc>>,
        }
        let rows: Vec<Row> = self.fetch_table("profile", &[]).await?;
        Ok(rows.into_iter().find_map(|r| r.next_salary_date))
    }
}

/// The backend's dedup key for a raw SMS row: SHA-256 over the
/// whitespace-stripped, lowercased first 100 characters of the text plus the
/// minute-truncated timestamp. Computed client-side so callers can reconcile
/// local rows against backend imports.
pub fn idempotency_key(raw_text: &str, timestamp: DateTime<Utc>) -> String {
    let content: String = raw_text
        .split_whitespace()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .take(100)
        .collect();
    let base = format!("{}|{}", content, timestamp.format("%Y-%m-%dT%H:%M"));
    let mut hasher = Sha256::new();
    hasher.update(base.as_bytes());
    let hash: [u8; 32] = hasher.finalize().into();
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn idempotency_key_is_stable_and_hex() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 20, 13, 10, 42).unwrap();
        let key = idempotency_key("POS TALABAT  DOHA QA", ts);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key, idempotency_key("POS TALABAT  DOHA QA", ts));
    }

    #[test]
    fn idempotency_key_ignores_whitespace_case_and_seconds() {
        let a = Utc.with_ymd_and_hms(2024, 5, 20, 13, 10, 5).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 5, 20, 13, 10, 59).unwrap();
        assert_eq!(
            idempotency_key("POS  TALABAT", a),
            idempotency_key("pos talabat", b)
        );
        // A different minute is a different row.
        let c = Utc.with_ymd_and_hms(2024, 5, 20, 13, 11, 0).unwrap();
        assert_ne!(idempotency_key("POS TALABAT", a), idempotency_key("POS TALABAT", c));
    }

    #[test]
    fn idempotency_key_truncates_long_texts() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 20, 13, 10, 0).unwrap();
        let long = "x".repeat(300);
        let longer = format!("{}{}", "x".repeat(300), "different tail");
        assert_eq!(idempotency_key(&long, ts), idempotency_key(&longer, ts));
    }

    #[test]
    fn client_normalizes_base_url() {
        let client = SyncClient::new("https://backend.example.com/", "key");
        assert_eq!(client.base_url, "https://backend.example.com");
    }
}
