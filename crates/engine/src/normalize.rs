use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::OnceLock;

use flow_core::{
    Category, ClassificationSource, Dimensions, Direction, FxTable, Money, PatternTag, Recipient,
    RecipientMatchType, RecipientRef, SizeTier, TimeContext, Transaction,
};

use crate::recipient::RecipientMatcher;
use crate::resolve::CategoryResolver;

/// Epoch of spreadsheet serial day counts.
const SERIAL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// Transaction-type/text markers that identify a transfer row.
const TRANSFER_KEYWORDS: &[&str] = &["transfer", "fawran", "internal transfer"];

/// One ingestion row as the backend serves it. Every field is optional;
/// the normalizer degrades field-by-field rather than rejecting rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRow {
    pub id: Option<i64>,
    pub txn_timestamp: Option<TimestampField>,
    #[serde(deserialize_with = "lenient_number")]
    pub amount: Option<f64>,
    pub currency: Option<String>,
    /// Backend-converted amount in the reporting currency.
    #[serde(deserialize_with = "lenient_number")]
    pub amount_base: Option<f64>,
    /// Backend's approximate conversion, used when the exact one is absent.
    #[serde(deserialize_with = "lenient_number")]
    pub amount_base_approx: Option<f64>,
    pub direction: Option<String>,
    pub raw_text: Option<String>,
    pub counterparty: Option<String>,
    pub card: Option<String>,
    pub txn_type: Option<String>,
    pub category: Option<String>,
    pub ai_category: Option<String>,
    pub is_salary: Option<bool>,
    /// JSON-encoded dimension block computed by the backend; a parse failure
    /// nulls this field only, never the row.
    pub dimensions: Option<String>,
    pub pattern: Option<String>,
    pub recipient_id: Option<i64>,
    pub source: Option<String>,
    pub confidence: Option<f64>,
}

/// Timestamps arrive either as ISO-like strings or as spreadsheet serial
/// day counts (days since 1899-12-30, fraction = time of day).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampField {
    Serial(f64),
    Text(String),
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(json_number))
}

fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Backend-computed dimension block, as embedded JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawDimensions {
    when: Vec<String>,
    size: Option<String>,
    pattern: Option<String>,
}

/// Thresholds (in the reporting currency) for the size-tier dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeTierConfig {
    pub medium_min: f64,
    pub large_min: f64,
}

impl Default for SizeTierConfig {
    fn default() -> Self {
        Self {
            medium_min: 100.0,
            large_min: 500.0,
        }
    }
}

impl SizeTierConfig {
    pub fn tier(&self, amount_base: Money) -> SizeTier {
        let value = amount_base.abs().to_f64();
        if value >= self.large_min {
            SizeTier::Large
        } else if value >= self.medium_min {
            SizeTier::Medium
        } else {
            SizeTier::Small
        }
    }
}

/// Everything the normalizer needs besides the rows themselves. `now` is
/// injected so unparseable timestamps degrade deterministically under test.
pub struct NormalizeContext<'a> {
    pub now: DateTime<Utc>,
    pub fx: &'a FxTable,
    pub resolver: &'a CategoryResolver,
    pub matcher: &'a RecipientMatcher,
    pub recipients_by_id: &'a HashMap<i64, Recipient>,
    pub size_tiers: SizeTierConfig,
    /// Days counted as the weekend (Friday/Saturday in the source domain).
    pub weekend: [Weekday; 2],
}

impl<'a> NormalizeContext<'a> {
    pub fn new(
        now: DateTime<Utc>,
        fx: &'a FxTable,
        resolver: &'a CategoryResolver,
        matcher: &'a RecipientMatcher,
        recipients_by_id: &'a HashMap<i64, Recipient>,
    ) -> Self {
        Self {
            now,
            fx,
            resolver,
            matcher,
            recipients_by_id,
            size_tiers: SizeTierConfig::default(),
            weekend: [Weekday::Fri, Weekday::Sat],
        }
    }
}

/// Normalize a batch of ingestion rows into canonical transactions, sorted
/// timestamp-descending. Rows without a numeric amount are dropped; every
/// other malformed field degrades in place.
pub fn normalize(rows: Vec<RawRow>, ctx: &NormalizeContext) -> Vec<Transaction> {
    let mut out: Vec<Transaction> = rows
        .into_iter()
        .filter_map(|row| normalize_row(row, ctx))
        .collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out
}

/// Merge an incremental batch into an existing collection: prepend and
/// re-sort descending. An empty batch leaves the collection untouched.
/// There is deliberately no dedup by row id; the backend owns idempotency.
pub fn merge_incremental(existing: &mut Vec<Transaction>, new_batch: Vec<Transaction>) {
    if new_batch.is_empty() {
        return;
    }
    let mut merged = new_batch;
    merged.append(existing);
    merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    *existing = merged;
}

fn normalize_row(row: RawRow, ctx: &NormalizeContext) -> Option<Transaction> {
    // Malformed ingestion rows are expected; only a missing amount kills one.
    let amount = match row.amount {
        Some(a) if a.is_finite() => Money::from_f64(a),
        _ => {
            tracing::debug!(id = ?row.id, "dropping row without a numeric amount");
            return None;
        }
    };

    let timestamp = row
        .txn_timestamp
        .as_ref()
        .and_then(parse_timestamp)
        .unwrap_or(ctx.now);

    let direction = row
        .direction
        .as_deref()
        .map(Direction::from_label)
        .unwrap_or(Direction::Out);

    let currency = row
        .currency
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(&ctx.fx.reporting_currency)
        .to_uppercase();

    // Conversion chain: backend exact, backend approximate, local FX rate.
    let amount_base = row
        .amount_base
        .or(row.amount_base_approx)
        .filter(|a| a.is_finite())
        .map(Money::from_f64)
        .unwrap_or_else(|| ctx.fx.convert(amount, &currency));

    let raw_text = row.raw_text.clone().unwrap_or_default();
    let counterparty = row
        .counterparty
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let is_salary = row.is_salary.unwrap_or_else(|| {
        [
            Some(raw_text.as_str()),
            counterparty.as_deref(),
            row.card.as_deref(),
            row.txn_type.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|s| s.to_lowercase().contains("salary"))
    });

    let resolved = ctx.resolver.resolve(
        &raw_text,
        row.ai_category.as_deref(),
        counterparty.as_deref(),
        row.category.as_deref(),
    );

    // Backend dimensions win when present and parseable.
    let backend_dims: Option<RawDimensions> = row.dimensions.as_deref().and_then(|json| {
        serde_json::from_str(json)
            .map_err(|e| tracing::debug!(id = ?row.id, error = %e, "unparseable dimension block"))
            .ok()
    });

    let when = backend_dims
        .as_ref()
        .map(|d| {
            d.when
                .iter()
                .filter_map(|l| TimeContext::from_label(l))
                .collect::<Vec<_>>()
        })
        .filter(|tags| !tags.is_empty())
        .unwrap_or_else(|| time_contexts(timestamp, &ctx.weekend));

    let size = backend_dims
        .as_ref()
        .and_then(|d| d.size.as_deref())
        .and_then(SizeTier::from_label)
        .unwrap_or_else(|| ctx.size_tiers.tier(amount_base));

    // The normalizer never computes patterns; it only carries a
    // backend-asserted tag through, else starts at Normal.
    let pattern = backend_dims
        .as_ref()
        .and_then(|d| d.pattern.as_deref())
        .or(row.pattern.as_deref())
        .and_then(PatternTag::from_label)
        .unwrap_or(PatternTag::Normal);

    let recipient = resolve_recipient(&row, direction, &raw_text, counterparty.as_deref(), ctx);

    let source = row
        .source
        .as_deref()
        .and_then(parse_source)
        .unwrap_or(resolved.source);

    let dimensions = Dimensions {
        what: resolved.category,
        when,
        size,
        pattern,
    };

    Some(Transaction {
        id: row.id,
        timestamp,
        direction,
        amount,
        currency,
        amount_base,
        is_large: size == SizeTier::Large,
        is_late_night: dimensions.has(TimeContext::LateNight),
        is_work_hours: dimensions.has(TimeContext::WorkHours),
        is_weekend: dimensions.has(TimeContext::Weekend),
        raw_text,
        counterparty,
        card: row.card,
        txn_type: row.txn_type,
        display_name: resolved.display_name,
        consolidated_name: resolved.consolidated_name,
        dimensions,
        is_salary,
        recipient,
        confidence: row.confidence.unwrap_or(1.0),
        source,
    })
}

fn parse_source(label: &str) -> Option<ClassificationSource> {
    match label.trim().to_lowercase().as_str() {
        "rule" => Some(ClassificationSource::Rule),
        "ai" => Some(ClassificationSource::Ai),
        "manual" => Some(ClassificationSource::Manual),
        "server" | "import" => Some(ClassificationSource::Server),
        _ => None,
    }
}

fn resolve_recipient(
    row: &RawRow,
    direction: Direction,
    raw_text: &str,
    counterparty: Option<&str>,
    ctx: &NormalizeContext,
) -> Option<RecipientRef> {
    // A backend-asserted recipient id is authoritative when it resolves.
    if let Some(id) = row.recipient_id {
        if ctx.recipients_by_id.contains_key(&id) {
            return Some(RecipientRef {
                id,
                match_type: RecipientMatchType::Server,
            });
        }
        tracing::debug!(recipient_id = id, "backend recipient id not in local table");
    }

    // Only transfer-shaped rows are worth matching: known transfer keywords,
    // or an OUT row whose counterparty carries a long digit run.
    let transfer_like = [row.txn_type.as_deref(), Some(raw_text)]
        .into_iter()
        .flatten()
        .map(str::to_lowercase)
        .any(|s| TRANSFER_KEYWORDS.iter().any(|kw| s.contains(kw)));
    let digit_run = direction == Direction::Out
        && counterparty.is_some_and(|c| long_digit_run().is_match(c));
    if !transfer_like && !digit_run {
        return None;
    }

    counterparty
        .and_then(|c| ctx.matcher.match_text(c))
        .or_else(|| ctx.matcher.match_text(raw_text))
        .map(|m| RecipientRef {
            id: m.recipient.id,
            match_type: m.match_type,
        })
}

fn long_digit_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{8,}").unwrap())
}

fn parse_timestamp(field: &TimestampField) -> Option<DateTime<Utc>> {
    match field {
        TimestampField::Serial(serial) => parse_serial(*serial),
        TimestampField::Text(text) => parse_text_timestamp(text),
    }
}

/// Spreadsheet serial day count: whole days since 1899-12-30, fractional
/// part is the time of day.
fn parse_serial(serial: f64) -> Option<DateTime<Utc>> {
    if !serial.is_finite() || serial <= 0.0 || serial > 200_000.0 {
        return None;
    }
    let days = serial.trunc() as i64;
    let frac = serial.fract();
    let (y, m, d) = SERIAL_EPOCH;
    let date = NaiveDate::from_ymd_opt(y, m, d)? + Duration::days(days);
    let seconds = (frac * 86_400.0).round() as u32;
    let time = date.and_hms_opt(0, 0, 0)? + Duration::seconds(seconds as i64);
    Some(Utc.from_utc_datetime(&time))
}

fn parse_text_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }
    // Numeric strings are serial day counts in disguise.
    if let Ok(serial) = s.parse::<f64>() {
        return parse_serial(serial);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%d/%m/%Y %H:%M",
    ] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    for fmt in &["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
        }
    }
    None
}

fn time_contexts(timestamp: DateTime<Utc>, weekend: &[Weekday; 2]) -> Vec<TimeContext> {
    let hour = timestamp.hour();
    let weekday = timestamp.weekday();
    let mut tags = Vec::with_capacity(3);

    tags.push(match hour {
        5..=11 => TimeContext::Morning,
        12..=16 => TimeContext::Afternoon,
        17..=21 => TimeContext::Evening,
        _ => TimeContext::LateNight,
    });

    let is_weekend = weekend.contains(&weekday);
    if is_weekend {
        tags.push(TimeContext::Weekend);
    }
    if !is_weekend && (8..=17).contains(&hour) {
        tags.push(TimeContext::WorkHours);
    }

    tags
}
