use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;

use flow_core::{Category, Goal, Money, RecurringItem, ReportingPeriod, Transaction};

/// How much trust to put in a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodForecast {
    pub income: Money,
    pub spent: Money,
    pub daily_burn: Money,
    pub projected_spend: Money,
    pub projected_balance: Money,
    pub days_elapsed: i64,
    pub days_remaining: i64,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryTrend {
    pub category: Category,
    pub current: Money,
    pub prior_avg: Money,
    pub change_pct: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Safe,
    Warning,
    Over,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalForecast {
    pub category: Category,
    pub monthly_limit: Money,
    pub spent: Money,
    pub projected: Money,
    pub status: GoalStatus,
    /// Days until the limit is crossed at the current rate; `None` when the
    /// daily rate is zero (never, at this pace).
    pub days_to_exceed: Option<i64>,
}

/// Change bands (percent) outside which a category trend counts as moving.
const TREND_BAND_PCT: f64 = 10.0;

/// Projected spend and end-of-period balance for the reporting window.
///
/// Burn is period-to-date OUT spend over elapsed days (floored at one); the
/// projection extends it over the remaining days, never below what is
/// already spent.
pub fn forecast_period_end(
    transactions: &[Transaction],
    period: &ReportingPeriod,
    as_of: DateTime<Utc>,
) -> PeriodForecast {
    let in_period = |t: &&Transaction| period.contains(t.timestamp);
    let spent: Money = transactions
        .iter()
        .filter(in_period)
        .filter(|t| t.is_out())
        .map(|t| t.amount_base)
        .sum();
    let income: Money = transactions
        .iter()
        .filter(in_period)
        .filter(|t| t.is_in())
        .map(|t| t.amount_base)
        .sum();

    let days_elapsed = period.days_elapsed(as_of);
    let days_remaining = period.days_remaining(as_of);
    let burn = spent.to_f64() / days_elapsed as f64;
    let projected_spend = Money::from_f64(spent.to_f64() + burn * days_remaining as f64);

    PeriodForecast {
        income,
        spent,
        daily_burn: Money::from_f64(burn),
        projected_spend,
        projected_balance: income - projected_spend,
        days_elapsed,
        days_remaining,
        confidence: confidence(transactions, as_of),
    }
}

/// High when three months of history exist and daily spending is steady;
/// low when both are missing.
fn confidence(transactions: &[Transaction], as_of: DateTime<Utc>) -> Confidence {
    let months = distinct_months(transactions);
    let cv = daily_spend_cv(transactions, as_of);

    if months >= 3 && cv < 0.5 {
        Confidence::High
    } else if months >= 2 || cv < 0.8 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

fn distinct_months(transactions: &[Transaction]) -> usize {
    let months: std::collections::HashSet<(i32, u32)> = transactions
        .iter()
        .map(|t| (t.timestamp.year(), t.timestamp.month()))
        .collect();
    months.len()
}

/// Coefficient of variation of daily OUT totals over the trailing 30 days.
/// No spending at all reads as maximal volatility.
fn daily_spend_cv(transactions: &[Transaction], as_of: DateTime<Utc>) -> f64 {
    let window_start = as_of - Duration::days(30);
    let mut daily: HashMap<NaiveDate, f64> = HashMap::new();
    for t in transactions {
        if t.is_out() && t.timestamp > window_start && t.timestamp <= as_of {
            *daily.entry(t.timestamp.date_naive()).or_default() += t.amount_base.to_f64();
        }
    }
    let totals: Vec<f64> = (0..30i64)
        .map(|back| {
            let day = (as_of - Duration::days(back)).date_naive();
            daily.get(&day).copied().unwrap_or(0.0)
        })
        .collect();

    let mean = totals.iter().sum::<f64>() / totals.len() as f64;
    if mean <= 0.0 {
        return f64::INFINITY;
    }
    let variance = totals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / totals.len() as f64;
    variance.sqrt() / mean
}

/// Per-category movement of this calendar month against the mean of the two
/// prior months, sorted by absolute change. Categories quiet in both windows
/// are dropped.
pub fn category_trends(transactions: &[Transaction], as_of: DateTime<Utc>) -> Vec<CategoryTrend> {
    let this_month = (as_of.year(), as_of.month());
    let prior_1 = previous_month(this_month);
    let prior_2 = previous_month(prior_1);

    let mut current: HashMap<Category, f64> = HashMap::new();
    let mut prior: HashMap<Category, f64> = HashMap::new();
    for t in transactions.iter().filter(|t| t.is_out()) {
        let month = (t.timestamp.year(), t.timestamp.month());
        if month == this_month {
            *current.entry(t.category()).or_default() += t.amount_base.to_f64();
        } else if month == prior_1 || month == prior_2 {
            *prior.entry(t.category()).or_default() += t.amount_base.to_f64();
        }
    }

    let categories: std::collections::HashSet<Category> =
        current.keys().chain(prior.keys()).copied().collect();

    let mut trends: Vec<CategoryTrend> = categories
        .into_iter()
        .filter_map(|category| {
            let now = current.get(&category).copied().unwrap_or(0.0);
            let prior_avg = prior.get(&category).copied().unwrap_or(0.0) / 2.0;
            if now == 0.0 && prior_avg == 0.0 {
                return None;
            }
            let change_pct = if prior_avg > 0.0 {
                (now - prior_avg) / prior_avg * 100.0
            } else {
                100.0
            };
            let direction = if change_pct > TREND_BAND_PCT {
                TrendDirection::Rising
            } else if change_pct < -TREND_BAND_PCT {
                TrendDirection::Falling
            } else {
                TrendDirection::Stable
            };
            Some(CategoryTrend {
                category,
                current: Money::from_f64(now),
                prior_avg: Money::from_f64(prior_avg),
                change_pct,
                direction,
            })
        })
        .collect();

    trends.sort_by(|a, b| {
        b.change_pct
            .abs()
            .partial_cmp(&a.change_pct.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    trends
}

/// Monthly cost of the active server-detected recurring payments.
pub fn recurring_load(items: &[RecurringItem]) -> Money {
    items
        .iter()
        .filter(|i| i.active)
        .map(|i| i.monthly_cost)
        .sum()
}

/// Trajectory of each positive-limit goal for the current calendar month.
pub fn forecast_goals(
    transactions: &[Transaction],
    goals: &[Goal],
    as_of: DateTime<Utc>,
) -> Vec<GoalForecast> {
    let elapsed = as_of.day() as i64;
    let remaining = days_in_month(as_of.year(), as_of.month()) as i64 - elapsed;

    goals
        .iter()
        .filter(|g| g.monthly_limit.is_positive())
        .map(|goal| {
            let spent: Money = transactions
                .iter()
                .filter(|t| {
                    t.is_out()
                        && t.category() == goal.category
                        && t.timestamp.year() == as_of.year()
                        && t.timestamp.month() == as_of.month()
                })
                .map(|t| t.amount_base)
                .sum();

            let rate = spent.to_f64() / elapsed.max(1) as f64;
            let projected = Money::from_f64(spent.to_f64() + rate * remaining.max(0) as f64);

            let status = if spent > goal.monthly_limit {
                GoalStatus::Over
            } else if projected > goal.monthly_limit {
                GoalStatus::Warning
            } else {
                GoalStatus::Safe
            };

            let days_to_exceed = (rate > 0.0).then(|| {
                let headroom = (goal.monthly_limit - spent).to_f64();
                (headroom / rate).ceil().max(0.0) as i64
            });

            GoalForecast {
                category: goal.category,
                monthly_limit: goal.monthly_limit,
                spent,
                projected,
                status,
                days_to_exceed,
            }
        })
        .collect()
}

/// What can safely be spent today: the configured monthly budget's remainder
/// spread over the rest of the month, or, with no budget, the period's net
/// income spread over the days until the next salary.
pub fn daily_budget(
    transactions: &[Transaction],
    monthly_budget: Option<Money>,
    period: &ReportingPeriod,
    next_salary: DateTime<Utc>,
    as_of: DateTime<Utc>,
) -> Money {
    if let Some(budget) = monthly_budget {
        let month_spent: Money = transactions
            .iter()
            .filter(|t| {
                t.is_out()
                    && t.timestamp.year() == as_of.year()
                    && t.timestamp.month() == as_of.month()
            })
            .map(|t| t.amount_base)
            .sum();
        let remaining =
            (days_in_month(as_of.year(), as_of.month()) as i64 - as_of.day() as i64).max(1);
        return Money::from_f64((budget - month_spent).to_f64() / remaining as f64);
    }

    let in_period = |t: &&Transaction| period.contains(t.timestamp);
    let income: Money = transactions
        .iter()
        .filter(in_period)
        .filter(|t| t.is_in())
        .map(|t| t.amount_base)
        .sum();
    let spent: Money = transactions
        .iter()
        .filter(in_period)
        .filter(|t| t.is_out())
        .map(|t| t.amount_base)
        .sum();
    let days_to_salary = (next_salary - as_of).num_days().max(1);
    Money::from_f64((income - spent).to_f64() / days_to_salary as f64)
}

fn previous_month((year, month): (i32, u32)) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flow_core::{
        ClassificationSource, Dimensions, Direction, PatternTag, SizeTier,
    };

    fn tx(direction: Direction, category: Category, amount: f64, y: i32, m: u32, d: u32) -> Transaction {
        Transaction {
            id: None,
            timestamp: Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
            direction,
            amount: Money::from_f64(amount),
            currency: "QAR".to_string(),
            amount_base: Money::from_f64(amount),
            raw_text: String::new(),
            counterparty: None,
            card: None,
            txn_type: None,
            display_name: String::new(),
            consolidated_name: String::new(),
            dimensions: Dimensions {
                what: category,
                when: Vec::new(),
                size: SizeTier::Small,
                pattern: PatternTag::Normal,
            },
            is_salary: false,
            is_large: false,
            is_late_night: false,
            is_work_hours: false,
            is_weekend: false,
            recipient: None,
            confidence: 1.0,
            source: ClassificationSource::Rule,
        }
    }

    fn out(category: Category, amount: f64, y: i32, m: u32, d: u32) -> Transaction {
        tx(Direction::Out, category, amount, y, m, d)
    }

    #[test]
    fn period_forecast_projects_burn_over_remaining_days() {
        let period = ReportingPeriod::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
        );
        let as_of = Utc.with_ymd_and_hms(2024, 6, 11, 0, 0, 0).unwrap();
        let txs = vec![
            tx(Direction::In, Category::Income, 9000.0, 2024, 6, 1),
            out(Category::Dining, 500.0, 2024, 6, 4),
            out(Category::Groceries, 500.0, 2024, 6, 8),
        ];
        let f = forecast_period_end(&txs, &period, as_of);
        assert_eq!(f.days_elapsed, 10);
        assert_eq!(f.days_remaining, 20);
        assert_eq!(f.daily_burn.to_minor(), 10_000); // 100/day
        assert_eq!(f.projected_spend.to_minor(), 300_000); // 1000 + 100×20
        assert_eq!(f.projected_balance.to_minor(), 600_000);
    }

    #[test]
    fn confidence_tiers() {
        let as_of = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap();
        // Three months of perfectly steady daily spend: high.
        let mut steady = Vec::new();
        for m in 4..=6u32 {
            for d in 1..=days_in_month(2024, m) {
                steady.push(out(Category::Dining, 50.0, 2024, m, d));
            }
        }
        let f = forecast_period_end(
            &steady,
            &ReportingPeriod::new(as_of - Duration::days(30), as_of + Duration::days(1)),
            as_of,
        );
        assert_eq!(f.confidence, Confidence::High);

        // A single sparse month: low.
        let sparse = vec![out(Category::Dining, 500.0, 2024, 6, 2)];
        let f = forecast_period_end(
            &sparse,
            &ReportingPeriod::new(as_of - Duration::days(30), as_of + Duration::days(1)),
            as_of,
        );
        assert_eq!(f.confidence, Confidence::Low);
    }

    #[test]
    fn trends_flag_rising_and_falling() {
        let as_of = Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap();
        let txs = vec![
            // Dining: prior avg (400+600)/2 = 500, current 900 → +80% rising.
            out(Category::Dining, 400.0, 2024, 4, 10),
            out(Category::Dining, 600.0, 2024, 5, 10),
            out(Category::Dining, 900.0, 2024, 6, 10),
            // Transport: prior avg 300, current 290 → stable.
            out(Category::Transport, 300.0, 2024, 4, 12),
            out(Category::Transport, 300.0, 2024, 5, 12),
            out(Category::Transport, 290.0, 2024, 6, 12),
            // Coffee: prior avg 200, current 0 → −100% falling.
            out(Category::Coffee, 200.0, 2024, 4, 5),
            out(Category::Coffee, 200.0, 2024, 5, 5),
        ];
        let trends = category_trends(&txs, as_of);
        assert_eq!(trends.len(), 3);
        // Sorted by |change|: Coffee (−100) and Dining (+80) ahead of Transport.
        assert_eq!(trends[0].category, Category::Coffee);
        assert_eq!(trends[0].direction, TrendDirection::Falling);
        assert_eq!(trends[1].category, Category::Dining);
        assert_eq!(trends[1].direction, TrendDirection::Rising);
        assert_eq!(trends[2].direction, TrendDirection::Stable);
    }

    #[test]
    fn trends_drop_quiet_categories_and_handle_no_prior() {
        let as_of = Utc.with_ymd_and_hms(2024, 6, 20, 0, 0, 0).unwrap();
        let txs = vec![
            // New category this month: +100% rising by convention.
            out(Category::Travel, 2000.0, 2024, 6, 2),
            // Spending far outside the window: dropped.
            out(Category::Health, 100.0, 2024, 1, 2),
        ];
        let trends = category_trends(&txs, as_of);
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].category, Category::Travel);
        assert_eq!(trends[0].change_pct, 100.0);
        assert_eq!(trends[0].direction, TrendDirection::Rising);
    }

    #[test]
    fn recurring_load_sums_active_items() {
        let items = vec![
            RecurringItem {
                name: "Netflix".to_string(),
                monthly_cost: Money::from_f64(39.0),
                active: true,
            },
            RecurringItem {
                name: "Gym".to_string(),
                monthly_cost: Money::from_f64(250.0),
                active: false,
            },
            RecurringItem {
                name: "Ooredoo".to_string(),
                monthly_cost: Money::from_f64(100.0),
                active: true,
            },
        ];
        assert_eq!(recurring_load(&items).to_minor(), 13_900);
    }

    // June 15 of a 30-day month: 15 days elapsed, 15 remaining.
    fn mid_june() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 9, 0, 0).unwrap()
    }

    fn dining_goal(limit: f64) -> Vec<Goal> {
        vec![Goal {
            category: Category::Dining,
            monthly_limit: Money::from_f64(limit),
        }]
    }

    #[test]
    fn goal_already_over_limit() {
        let txs = vec![out(Category::Dining, 1100.0, 2024, 6, 10)];
        let f = forecast_goals(&txs, &dining_goal(1000.0), mid_june());
        assert_eq!(f[0].status, GoalStatus::Over);
    }

    #[test]
    fn goal_projected_over_is_warning() {
        let txs = vec![out(Category::Dining, 600.0, 2024, 6, 10)];
        let f = forecast_goals(&txs, &dining_goal(1000.0), mid_june());
        // rate 40/day → projected 1200.
        assert_eq!(f[0].projected.to_minor(), 120_000);
        assert_eq!(f[0].status, GoalStatus::Warning);
        assert_eq!(f[0].days_to_exceed, Some(10));
    }

    #[test]
    fn goal_on_track_is_safe() {
        let txs = vec![out(Category::Dining, 300.0, 2024, 6, 10)];
        let f = forecast_goals(&txs, &dining_goal(1000.0), mid_june());
        // rate 20/day → projected 600.
        assert_eq!(f[0].status, GoalStatus::Safe);
    }

    #[test]
    fn goal_with_no_spend_never_exceeds() {
        let f = forecast_goals(&[], &dining_goal(1000.0), mid_june());
        assert_eq!(f[0].status, GoalStatus::Safe);
        assert_eq!(f[0].days_to_exceed, None);
    }

    #[test]
    fn zero_limit_goals_are_skipped() {
        let goals = vec![Goal {
            category: Category::Dining,
            monthly_limit: Money::zero(),
        }];
        assert!(forecast_goals(&[], &goals, mid_june()).is_empty());
    }

    #[test]
    fn daily_budget_from_configured_monthly_budget() {
        let txs = vec![out(Category::Dining, 1500.0, 2024, 6, 5)];
        let period = ReportingPeriod::new(
            Utc.with_ymd_and_hms(2024, 5, 25, 0, 0, 0).unwrap(),
            mid_june(),
        );
        let next = Utc.with_ymd_and_hms(2024, 6, 25, 0, 0, 0).unwrap();
        let allowance = daily_budget(&txs, Some(Money::from_f64(3000.0)), &period, next, mid_june());
        // (3000 − 1500) / 15 remaining days.
        assert_eq!(allowance.to_minor(), 10_000);
    }

    #[test]
    fn daily_budget_falls_back_to_net_income_per_day() {
        let txs = vec![
            tx(Direction::In, Category::Income, 9000.0, 2024, 5, 25),
            out(Category::Dining, 1000.0, 2024, 6, 5),
        ];
        let period = ReportingPeriod::new(
            Utc.with_ymd_and_hms(2024, 5, 25, 0, 0, 0).unwrap(),
            mid_june(),
        );
        let as_of = mid_june();
        let next = Utc.with_ymd_and_hms(2024, 6, 25, 9, 0, 0).unwrap();
        let allowance = daily_budget(&txs, None, &period, next, as_of);
        // (9000 − 1000) / 10 days to salary.
        assert_eq!(allowance.to_minor(), 80_000);
    }
}
