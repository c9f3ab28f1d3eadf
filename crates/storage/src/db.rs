use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use thiserror::Error;

use flow_core::{
    Category, ClassificationSource, Dimensions, Direction, FxTable, Goal, LocalOverride,
    MerchantRule, Money, Recipient, RecipientMatchType, RecipientRef, RecurringItem, SizeTier,
    TimeContext, Transaction, UserContextEntry,
};

pub type DbPool = Pool<Sqlite>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub async fn create_db(path: &Path) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS local_overrides (
            raw_text TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            consolidated_name TEXT NOT NULL,
            category TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merchant_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern TEXT NOT NULL,
            display_name TEXT NOT NULL,
            consolidated_name TEXT NOT NULL,
            category TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipients (
            id INTEGER PRIMARY KEY,
            phone TEXT,
            bank_account TEXT,
            short_name TEXT,
            long_name TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fx_rates (
            currency TEXT PRIMARY KEY,
            rate TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_context (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_type TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            details TEXT,
            source TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS goals (
            category TEXT PRIMARY KEY,
            monthly_limit_minor INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recurring_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            monthly_cost_minor INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            rowid_local INTEGER PRIMARY KEY AUTOINCREMENT,
            backend_id INTEGER,
            timestamp TEXT NOT NULL,
            direction TEXT NOT NULL,
            amount_minor INTEGER NOT NULL,
            currency TEXT NOT NULL,
            amount_base_minor INTEGER NOT NULL,
            raw_text TEXT NOT NULL,
            counterparty TEXT,
            card TEXT,
            txn_type TEXT,
            display_name TEXT NOT NULL,
            consolidated_name TEXT NOT NULL,
            dimensions TEXT NOT NULL,
            is_salary INTEGER NOT NULL DEFAULT 0,
            recipient_id INTEGER,
            recipient_match TEXT,
            confidence REAL NOT NULL DEFAULT 1.0,
            source TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ── Local overrides ───────────────────────────────────────────────────────────

pub async fn save_local_override(
    pool: &DbPool,
    raw_text: &str,
    ov: &LocalOverride,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO local_overrides (raw_text, display_name, consolidated_name, category)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(raw_text) DO UPDATE SET
             display_name = excluded.display_name,
             consolidated_name = excluded.consolidated_name,
             category = excluded.category",
    )
    .bind(raw_text.trim().to_lowercase())
    .bind(&ov.display_name)
    .bind(&ov.consolidated_name)
    .bind(ov.category.label())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_local_overrides(
    pool: &DbPool,
) -> Result<std::collections::HashMap<String, LocalOverride>, StorageError> {
    let rows = sqlx::query_as::<_, (String, String, String, String)>(
        "SELECT raw_text, display_name, consolidated_name, category FROM local_overrides",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(raw_text, display_name, consolidated_name, category)| {
            (
                raw_text,
                LocalOverride {
                    display_name,
                    consolidated_name,
                    category: Category::from_label(&category).unwrap_or(Category::Uncategorized),
                },
            )
        })
        .collect())
}

pub async fn delete_local_override(pool: &DbPool, raw_text: &str) -> Result<bool, StorageError> {
    let result = sqlx::query("DELETE FROM local_overrides WHERE raw_text = ?")
        .bind(raw_text.trim().to_lowercase())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ── Wholesale-replaced lookup tables ─────────────────────────────────────────
// Each sync replaces the previous copy in a single DB transaction, matching
// the load-wholesale semantics of the backend tables.

pub async fn replace_merchant_rules(
    pool: &DbPool,
    rules: &[MerchantRule],
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM merchant_rules").execute(&mut *tx).await?;
    for rule in rules {
        sqlx::query(
            "INSERT INTO merchant_rules (pattern, display_name, consolidated_name, category) VALUES (?, ?, ?, ?)",
        )
        .bind(&rule.pattern)
        .bind(&rule.display_name)
        .bind(&rule.consolidated_name)
        .bind(&rule.category)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn get_merchant_rules(pool: &DbPool) -> Result<Vec<MerchantRule>, StorageError> {
    let rows = sqlx::query_as::<_, (String, String, String, String)>(
        "SELECT pattern, display_name, consolidated_name, category FROM merchant_rules ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(pattern, display_name, consolidated_name, category)| MerchantRule {
            pattern,
            display_name,
            consolidated_name,
            category,
        })
        .collect())
}

pub async fn replace_recipients(pool: &DbPool, recipients: &[Recipient]) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM recipients").execute(&mut *tx).await?;
    for r in recipients {
        sqlx::query(
            "INSERT INTO recipients (id, phone, bank_account, short_name, long_name) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(r.id)
        .bind(&r.phone)
        .bind(&r.bank_account)
        .bind(&r.short_name)
        .bind(&r.long_name)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn get_recipients(pool: &DbPool) -> Result<Vec<Recipient>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, Option<String>, Option<String>, Option<String>, Option<String>)>(
        "SELECT id, phone, bank_account, short_name, long_name FROM recipients ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, phone, bank_account, short_name, long_name)| Recipient {
            id,
            phone,
            bank_account,
            short_name,
            long_name,
        })
        .collect())
}

pub async fn replace_fx_rates(
    pool: &DbPool,
    rates: &[(String, Decimal)],
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM fx_rates").execute(&mut *tx).await?;
    for (currency, rate) in rates {
        sqlx::query("INSERT INTO fx_rates (currency, rate) VALUES (?, ?)")
            .bind(currency)
            .bind(rate.to_string())
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn get_fx_table(pool: &DbPool, reporting_currency: &str) -> Result<FxTable, StorageError> {
    let rows = sqlx::query_as::<_, (String, String)>("SELECT currency, rate FROM fx_rates")
        .fetch_all(pool)
        .await?;
    let mut fx = FxTable::new(reporting_currency);
    for (currency, rate) in rows {
        match Decimal::from_str(&rate) {
            Ok(rate) => fx.insert(currency, rate),
            Err(e) => tracing::warn!(currency, error = %e, "skipping unparseable FX rate"),
        }
    }
    Ok(fx)
}

pub async fn replace_user_context(
    pool: &DbPool,
    entries: &[UserContextEntry],
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM user_context").execute(&mut *tx).await?;
    for e in entries {
        sqlx::query(
            "INSERT INTO user_context (entry_type, key, value, details, source) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&e.entry_type)
        .bind(&e.key)
        .bind(&e.value)
        .bind(&e.details)
        .bind(&e.source)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn get_user_context(pool: &DbPool) -> Result<Vec<UserContextEntry>, StorageError> {
    let rows = sqlx::query_as::<_, (String, String, String, Option<String>, Option<String>)>(
        "SELECT entry_type, key, value, details, source FROM user_context ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(entry_type, key, value, details, source)| UserContextEntry {
            entry_type,
            key,
            value,
            details,
            source,
        })
        .collect())
}

pub async fn replace_goals(pool: &DbPool, goals: &[Goal]) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM goals").execute(&mut *tx).await?;
    for g in goals {
        sqlx::query("INSERT OR REPLACE INTO goals (category, monthly_limit_minor) VALUES (?, ?)")
            .bind(g.category.label())
            .bind(g.monthly_limit.to_minor())
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn get_goals(pool: &DbPool) -> Result<Vec<Goal>, StorageError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT category, monthly_limit_minor FROM goals ORDER BY category",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(category, limit)| Goal {
            category: Category::from_label(&category).unwrap_or(Category::Uncategorized),
            monthly_limit: Money::from_minor(limit),
        })
        .collect())
}

pub async fn replace_recurring_items(
    pool: &DbPool,
    items: &[RecurringItem],
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM recurring_items").execute(&mut *tx).await?;
    for item in items {
        sqlx::query(
            "INSERT INTO recurring_items (name, monthly_cost_minor, active) VALUES (?, ?, ?)",
        )
        .bind(&item.name)
        .bind(item.monthly_cost.to_minor())
        .bind(item.active)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn get_recurring_items(pool: &DbPool) -> Result<Vec<RecurringItem>, StorageError> {
    let rows = sqlx::query_as::<_, (String, i64, i64)>(
        "SELECT name, monthly_cost_minor, active FROM recurring_items ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(name, cost, active)| RecurringItem {
            name,
            monthly_cost: Money::from_minor(cost),
            active: active != 0,
        })
        .collect())
}

// ── Transaction cache ─────────────────────────────────────────────────────────

pub async fn replace_transactions(
    pool: &DbPool,
    transactions: &[Transaction],
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM transactions").execute(&mut *tx).await?;
    for t in transactions {
        let dimensions = serde_json::to_string(&t.dimensions)?;
        sqlx::query(
            r#"
            INSERT INTO transactions (
                backend_id, timestamp, direction, amount_minor, currency,
                amount_base_minor, raw_text, counterparty, card, txn_type,
                display_name, consolidated_name, dimensions, is_salary,
                recipient_id, recipient_match, confidence, source
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(t.id)
        .bind(t.timestamp.to_rfc3339())
        .bind(t.direction.to_string())
        .bind(t.amount.to_minor())
        .bind(&t.currency)
        .bind(t.amount_base.to_minor())
        .bind(&t.raw_text)
        .bind(&t.counterparty)
        .bind(&t.card)
        .bind(&t.txn_type)
        .bind(&t.display_name)
        .bind(&t.consolidated_name)
        .bind(dimensions)
        .bind(t.is_salary)
        .bind(t.recipient.map(|r| r.id))
        .bind(t.recipient.map(|r| match_type_label(r.match_type)))
        .bind(t.confidence)
        .bind(source_label(t.source))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    backend_id: Option<i64>,
    timestamp: String,
    direction: String,
    amount_minor: i64,
    currency: String,
    amount_base_minor: i64,
    raw_text: String,
    counterparty: Option<String>,
    card: Option<String>,
    txn_type: Option<String>,
    display_name: String,
    consolidated_name: String,
    dimensions: String,
    is_salary: i64,
    recipient_id: Option<i64>,
    recipient_match: Option<String>,
    confidence: f64,
    source: String,
}

pub async fn get_transactions(pool: &DbPool) -> Result<Vec<Transaction>, StorageError> {
    let rows = sqlx::query_as::<_, TransactionRow>(
        r#"
        SELECT backend_id, timestamp, direction, amount_minor, currency,
               amount_base_minor, raw_text, counterparty, card, txn_type,
               display_name, consolidated_name, dimensions, is_salary,
               recipient_id, recipient_match, confidence, source
        FROM transactions ORDER BY timestamp DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let dimensions: Dimensions = serde_json::from_str(&row.dimensions)?;
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let recipient = match (row.recipient_id, row.recipient_match.as_deref()) {
            (Some(id), Some(label)) => Some(RecipientRef {
                id,
                match_type: parse_match_type(label),
            }),
            _ => None,
        };
        out.push(Transaction {
            id: row.backend_id,
            timestamp,
            direction: Direction::from_label(&row.direction),
            amount: Money::from_minor(row.amount_minor),
            currency: row.currency,
            amount_base: Money::from_minor(row.amount_base_minor),
            raw_text: row.raw_text,
            counterparty: row.counterparty,
            card: row.card,
            txn_type: row.txn_type,
            display_name: row.display_name,
            consolidated_name: row.consolidated_name,
            is_large: dimensions.size == SizeTier::Large,
            is_late_night: dimensions.has(TimeContext::LateNight),
            is_work_hours: dimensions.has(TimeContext::WorkHours),
            is_weekend: dimensions.has(TimeContext::Weekend),
            dimensions,
            is_salary: row.is_salary != 0,
            recipient,
            confidence: row.confidence,
            source: parse_source(&row.source),
        });
    }
    Ok(out)
}

// ── Sync watermark ────────────────────────────────────────────────────────────

const WATERMARK_KEY: &str = "last_sync_timestamp";
const NEXT_SALARY_KEY: &str = "next_salary_date";

pub async fn get_sync_watermark(pool: &DbPool) -> Result<Option<DateTime<Utc>>, StorageError> {
    let row = sqlx::query_as::<_, (String,)>("SELECT value FROM sync_state WHERE key = ?")
        .bind(WATERMARK_KEY)
        .fetch_optional(pool)
        .await?;
    Ok(row.and_then(|(value,)| {
        DateTime::parse_from_rfc3339(&value)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }))
}

pub async fn set_sync_watermark(pool: &DbPool, at: DateTime<Utc>) -> Result<(), StorageError> {
    set_state(pool, WATERMARK_KEY, &at.to_rfc3339()).await
}

/// Backend-asserted next pay date, cached so reports defer to it offline.
pub async fn get_server_next_salary(pool: &DbPool) -> Result<Option<DateTime<Utc>>, StorageError> {
    let row = sqlx::query_as::<_, (String,)>("SELECT value FROM sync_state WHERE key = ?")
        .bind(NEXT_SALARY_KEY)
        .fetch_optional(pool)
        .await?;
    Ok(row.and_then(|(value,)| {
        DateTime::parse_from_rfc3339(&value)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }))
}

pub async fn set_server_next_salary(
    pool: &DbPool,
    at: Option<DateTime<Utc>>,
) -> Result<(), StorageError> {
    match at {
        Some(at) => set_state(pool, NEXT_SALARY_KEY, &at.to_rfc3339()).await,
        None => {
            sqlx::query("DELETE FROM sync_state WHERE key = ?")
                .bind(NEXT_SALARY_KEY)
                .execute(pool)
                .await?;
            Ok(())
        }
    }
}

async fn set_state(pool: &DbPool, key: &str, value: &str) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO sync_state (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

fn source_label(source: ClassificationSource) -> &'static str {
    match source {
        ClassificationSource::Rule => "rule",
        ClassificationSource::Ai => "ai",
        ClassificationSource::Manual => "manual",
        ClassificationSource::Server => "server",
    }
}

fn parse_source(label: &str) -> ClassificationSource {
    match label {
        "ai" => ClassificationSource::Ai,
        "manual" => ClassificationSource::Manual,
        "server" => ClassificationSource::Server,
        _ => ClassificationSource::Rule,
    }
}

fn match_type_label(mt: RecipientMatchType) -> &'static str {
    match mt {
        RecipientMatchType::Phone => "phone",
        RecipientMatchType::Account => "account",
        RecipientMatchType::Name => "name",
        RecipientMatchType::ShortName => "shortName",
        RecipientMatchType::Manual => "manual",
        RecipientMatchType::Server => "server",
    }
}

fn parse_match_type(label: &str) -> RecipientMatchType {
    match label {
        "phone" => RecipientMatchType::Phone,
        "account" => RecipientMatchType::Account,
        "name" => RecipientMatchType::Name,
        "shortName" => RecipientMatchType::ShortName,
        "server" => RecipientMatchType::Server,
        _ => RecipientMatchType::Manual,
    }
}
