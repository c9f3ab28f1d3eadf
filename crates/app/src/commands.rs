use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;

use flow_core::{Category, LocalOverride, Money, Recipient, Transaction};
use flow_engine::{
    category_trends, daily_budget, detect_salary, forecast_goals, forecast_period_end,
    merge_incremental, next_salary_date, normalize, parse_ledger_csv, recurring_load,
    salary_period, CategoryResolver, CategoryTrend, GoalForecast, NormalizeContext,
    PatternDetector, PeriodForecast, RawRow, RecipientMatcher,
};
use flow_storage::DbPool;
use flow_sync::SyncClient;

use crate::config::FlowConfig;

#[derive(Debug, Serialize)]
pub struct SyncSummary {
    pub fetched_rows: usize,
    pub total_transactions: usize,
    pub incremental: bool,
}

/// Fetch from the backend, normalize, merge, re-tag patterns, persist.
pub async fn run_sync(pool: &DbPool, config: &FlowConfig, full: bool) -> anyhow::Result<SyncSummary> {
    let Some(backend_url) = config.backend_url.as_deref() else {
        bail!("no backend_url configured; use `flow import` for local files");
    };
    let api_key = config.api_key.as_deref().unwrap_or_default();
    let client = SyncClient::new(backend_url, api_key);

    let since = if full {
        None
    } else {
        flow_storage::get_sync_watermark(pool).await?
    };
    let started_at = Utc::now();

    // Lookup tables are replaced wholesale on every sync; only local
    // overrides persist across syncs.
    let rules = client.fetch_merchant_rules().await?;
    let recipients = client.fetch_recipients().await?;
    let fx_rates = client.fetch_fx_rates().await?;
    let user_context = client.fetch_user_context().await?;
    let goals = client.fetch_goals().await?;
    let recurring = client.fetch_recurring_items().await?;

    flow_storage::replace_merchant_rules(pool, &rules).await?;
    flow_storage::replace_recipients(pool, &recipients).await?;
    flow_storage::replace_fx_rates(pool, &fx_rates).await?;
    flow_storage::replace_user_context(pool, &user_context).await?;
    flow_storage::replace_goals(pool, &goals).await?;
    flow_storage::replace_recurring_items(pool, &recurring).await?;

    // The backend may know the next pay date; a missing profile table is a
    // degraded field, not a failed sync.
    match client.fetch_next_salary_date().await {
        Ok(date) => flow_storage::set_server_next_salary(pool, date).await?,
        Err(e) => tracing::warn!(error = %e, "could not fetch next salary date"),
    }

    let rows = client.fetch_ledger(since).await?;
    let fetched = rows.len();
    let incremental = since.is_some();

    let total = if incremental && rows.is_empty() {
        // Nothing new: leave the cached collection untouched.
        flow_storage::get_transactions(pool).await?.len()
    } else {
        let transactions = ingest_rows(pool, config, rows, incremental, started_at).await?;
        flow_storage::replace_transactions(pool, &transactions).await?;
        transactions.len()
    };

    flow_storage::set_sync_watermark(pool, started_at).await?;
    tracing::info!(fetched, total, incremental, "sync complete");

    Ok(SyncSummary {
        fetched_rows: fetched,
        total_transactions: total,
        incremental,
    })
}

/// Ingest a ledger CSV export in place of a backend fetch, using whatever
/// lookup tables the last sync cached.
pub async fn run_import(
    pool: &DbPool,
    config: &FlowConfig,
    file: &Path,
) -> anyhow::Result<SyncSummary> {
    let data = std::fs::File::open(file)
        .with_context(|| format!("cannot open {}", file.display()))?;
    let rows = parse_ledger_csv(data)?;
    let fetched = rows.len();

    let transactions = ingest_rows(pool, config, rows, false, Utc::now()).await?;
    flow_storage::replace_transactions(pool, &transactions).await?;

    Ok(SyncSummary {
        fetched_rows: fetched,
        total_transactions: transactions.len(),
        incremental: false,
    })
}

/// Normalize a row batch against the cached lookup tables, merge it into the
/// existing collection when incremental, and refresh pattern tags.
async fn ingest_rows(
    pool: &DbPool,
    config: &FlowConfig,
    rows: Vec<RawRow>,
    incremental: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<Transaction>> {
    let rules = flow_storage::get_merchant_rules(pool).await?;
    let overrides = flow_storage::get_local_overrides(pool).await?;
    let recipients = flow_storage::get_recipients(pool).await?;
    let fx = flow_storage::get_fx_table(pool, &config.reporting_currency).await?;
    let user_context = flow_storage::get_user_context(pool).await?;

    let resolver = CategoryResolver::new(rules, overrides);
    let recipients_by_id: HashMap<i64, Recipient> =
        recipients.iter().map(|r| (r.id, r.clone())).collect();
    let matcher = RecipientMatcher::new(recipients);

    let mut ctx = NormalizeContext::new(now, &fx, &resolver, &matcher, &recipients_by_id);
    ctx.size_tiers = config.size_tiers;
    ctx.weekend = config.weekend_days();

    let batch = normalize(rows, &ctx);

    let mut transactions = if incremental {
        let mut existing = flow_storage::get_transactions(pool).await?;
        merge_incremental(&mut existing, batch);
        existing
    } else {
        batch
    };

    PatternDetector::new().detect(&mut transactions, &user_context);
    Ok(transactions)
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub as_of: DateTime<Utc>,
    pub salary_count: usize,
    pub avg_salary_interval_days: f64,
    pub next_salary_date: DateTime<Utc>,
    pub period_forecast: PeriodForecast,
    pub trends: Vec<CategoryTrend>,
    pub recurring_load: Money,
    pub goals: Vec<GoalForecast>,
    pub daily_budget: Money,
}

pub async fn build_report(pool: &DbPool, config: &FlowConfig) -> anyhow::Result<Report> {
    let as_of = Utc::now();
    let transactions = flow_storage::get_transactions(pool).await?;
    let goals = flow_storage::get_goals(pool).await?;
    let recurring = flow_storage::get_recurring_items(pool).await?;
    let user_context = flow_storage::get_user_context(pool).await?;

    let cycle = detect_salary(&transactions);
    let server_next = flow_storage::get_server_next_salary(pool).await?;
    let next_salary = next_salary_date(&cycle, server_next, &user_context, as_of);
    let period = salary_period(&cycle, as_of);

    let monthly_budget = config.monthly_budget.map(Money::from_f64);

    Ok(Report {
        as_of,
        salary_count: cycle.salaries.len(),
        avg_salary_interval_days: cycle.avg_interval_days,
        next_salary_date: next_salary,
        period_forecast: forecast_period_end(&transactions, &period, as_of),
        trends: category_trends(&transactions, as_of),
        recurring_load: recurring_load(&recurring),
        goals: forecast_goals(&transactions, &goals, as_of),
        daily_budget: daily_budget(&transactions, monthly_budget, &period, next_salary, as_of),
    })
}

pub fn print_report(report: &Report, currency: &str) {
    let f = &report.period_forecast;
    println!("Flow report - {}", report.as_of.format("%Y-%m-%d %H:%M"));
    println!();
    println!(
        "Salary cycle: {} deposits, every {:.1} days, next expected {}",
        report.salary_count,
        report.avg_salary_interval_days,
        report.next_salary_date.format("%Y-%m-%d"),
    );
    println!(
        "Period: spent {} {currency} over {} days ({} {currency}/day)",
        f.spent, f.days_elapsed, f.daily_burn,
    );
    println!(
        "Projected: {} {currency} spend, {} {currency} balance at period end ({:?} confidence)",
        f.projected_spend, f.projected_balance, f.confidence,
    );
    println!("Daily budget: {} {currency}", report.daily_budget);
    println!("Recurring load: {} {currency}/month", report.recurring_load);

    if !report.trends.is_empty() {
        println!();
        println!("Category trends (this month vs prior two):");
        for t in &report.trends {
            println!(
                "  {:<18} {:>10} {currency}  {:>+7.1}%  {:?}",
                t.category.label(),
                t.current.to_string(),
                t.change_pct,
                t.direction,
            );
        }
    }

    if !report.goals.is_empty() {
        println!();
        println!("Goals:");
        for g in &report.goals {
            let days = g
                .days_to_exceed
                .map(|d| format!("{d}d to limit"))
                .unwrap_or_else(|| "no spend".to_string());
            println!(
                "  {:<18} {} / {} {currency}  [{:?}] {}",
                g.category.label(),
                g.spent,
                g.monthly_limit,
                g.status,
                days,
            );
        }
    }
}

pub async fn override_add(
    pool: &DbPool,
    raw_text: &str,
    display_name: &str,
    category: &str,
    consolidated: Option<&str>,
) -> anyhow::Result<()> {
    let Some(category) = Category::from_label(category) else {
        bail!("unknown category: {category}");
    };
    let ov = LocalOverride {
        display_name: display_name.to_string(),
        consolidated_name: consolidated.unwrap_or(display_name).to_string(),
        category,
    };
    flow_storage::save_local_override(pool, raw_text, &ov).await?;
    println!("override saved for \"{}\"", raw_text.trim().to_lowercase());
    Ok(())
}

pub async fn override_list(pool: &DbPool) -> anyhow::Result<()> {
    let overrides = flow_storage::get_local_overrides(pool).await?;
    if overrides.is_empty() {
        println!("no local overrides");
        return Ok(());
    }
    let mut entries: Vec<_> = overrides.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for (raw_text, ov) in entries {
        println!("  \"{}\" -> {} [{}]", raw_text, ov.display_name, ov.category);
    }
    Ok(())
}

pub async fn override_remove(pool: &DbPool, raw_text: &str) -> anyhow::Result<()> {
    if flow_storage::delete_local_override(pool, raw_text).await? {
        println!("override removed");
    } else {
        println!("no override for \"{}\"", raw_text.trim().to_lowercase());
    }
    Ok(())
}
