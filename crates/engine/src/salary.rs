use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};

use flow_core::{Money, ReportingPeriod, Transaction, UserContextEntry};

/// How far an income amount may stray from the modal amount and still count
/// as regular pay.
const MODAL_BAND: f64 = 0.10;
/// Bucket width for the modal amount.
const MODAL_STEP: i64 = 100;
/// Gaps averaged for the pay interval.
const MAX_GAPS: usize = 6;
/// Salary dates examined for day-of-month clustering.
const CLUSTER_WINDOW: usize = 6;
/// Maximum spread (days) for a usable day-of-month cluster.
const CLUSTER_TOLERANCE: f64 = 3.0;

const DEFAULT_INTERVAL_DAYS: f64 = 30.0;

/// The inferred pay schedule.
#[derive(Debug, Clone)]
pub struct SalaryCycle {
    /// Regular salary deposits, newest first. Bonuses and advances are
    /// excluded by the modal-amount filter.
    pub salaries: Vec<Transaction>,
    pub avg_interval_days: f64,
    pub modal_amount: Money,
}

impl SalaryCycle {
    pub fn last_salary_date(&self) -> Option<DateTime<Utc>> {
        self.salaries.first().map(|t| t.timestamp)
    }
}

/// Infer the pay cycle from income transactions flagged as salary.
///
/// The modal deposit amount (rounded to the nearest 100) separates the
/// regular paycheck from one-off bonuses; the interval is averaged over the
/// most recent gaps.
pub fn detect_salary(transactions: &[Transaction]) -> SalaryCycle {
    let mut incomes: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.is_in() && t.is_salary)
        .collect();
    incomes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    if incomes.is_empty() {
        return SalaryCycle {
            salaries: Vec::new(),
            avg_interval_days: DEFAULT_INTERVAL_DAYS,
            modal_amount: Money::zero(),
        };
    }

    // Modal amount, ties broken toward the larger amount.
    let mut counts: std::collections::HashMap<i64, usize> = std::collections::HashMap::new();
    for t in &incomes {
        *counts
            .entry(t.amount_base.round_to(MODAL_STEP).to_minor())
            .or_default() += 1;
    }
    let modal_minor = counts
        .iter()
        .max_by_key(|&(amount, count)| (*count, *amount))
        .map(|(amount, _)| *amount)
        .unwrap_or(0);
    let modal_amount = Money::from_minor(modal_minor);

    let modal = modal_amount.to_f64();
    let salaries: Vec<Transaction> = incomes
        .into_iter()
        .filter(|t| {
            let a = t.amount_base.to_f64();
            modal > 0.0 && (a - modal).abs() <= MODAL_BAND * modal
        })
        .cloned()
        .collect();

    let avg_interval_days = if salaries.len() < 2 {
        DEFAULT_INTERVAL_DAYS
    } else {
        let gaps: Vec<f64> = salaries
            .windows(2)
            .take(MAX_GAPS)
            .map(|w| (w[0].timestamp - w[1].timestamp).num_seconds() as f64 / 86_400.0)
            .collect();
        gaps.iter().sum::<f64>() / gaps.len() as f64
    };

    SalaryCycle {
        salaries,
        avg_interval_days,
        modal_amount,
    }
}

/// Predict the next pay date.
///
/// Fallback chain: a backend-asserted date, then an explicit income-day
/// preference from the user's context entries, then the clustered
/// day-of-month of recent salaries, then last salary + average interval.
pub fn next_salary_date(
    cycle: &SalaryCycle,
    server_date: Option<DateTime<Utc>>,
    context: &[UserContextEntry],
    as_of: DateTime<Utc>,
) -> DateTime<Utc> {
    if let Some(date) = server_date {
        return date;
    }

    let anchor = cycle.last_salary_date().unwrap_or(as_of);

    if let Some(day) = income_day_preference(context) {
        return project_payday(anchor.date_naive(), day);
    }

    if let Some(day) = clustered_payday(cycle) {
        return project_payday(anchor.date_naive(), day);
    }

    anchor + Duration::seconds((cycle.avg_interval_days * 86_400.0).round() as i64)
}

/// The reporting window anchored on salary deposits: from the second-most-
/// recent salary when two exist (a full cycle plus the current partial one),
/// from the only salary when one exists, else a trailing 90 days.
pub fn salary_period(cycle: &SalaryCycle, as_of: DateTime<Utc>) -> ReportingPeriod {
    let start = match (cycle.salaries.first(), cycle.salaries.get(1)) {
        (Some(_), Some(second)) => second.timestamp,
        (Some(only), None) => only.timestamp,
        _ => as_of - Duration::days(90),
    };
    ReportingPeriod::new(start, as_of)
}

/// An explicit "my salary lands on day N" preference.
fn income_day_preference(context: &[UserContextEntry]) -> Option<u32> {
    context
        .iter()
        .filter(|e| {
            let key = e.key.to_lowercase();
            e.entry_type.eq_ignore_ascii_case("preference")
                && (key.contains("income day") || key.contains("salary day"))
        })
        .find_map(|e| e.value.trim().parse::<u32>().ok())
        .filter(|d| (1..=31).contains(d))
}

/// Day-of-month of recent salaries when they cluster within tolerance.
fn clustered_payday(cycle: &SalaryCycle) -> Option<u32> {
    let days: Vec<f64> = cycle
        .salaries
        .iter()
        .take(CLUSTER_WINDOW)
        .map(|t| t.timestamp.day() as f64)
        .collect();
    if days.len() < 2 {
        return None;
    }
    let mean = days.iter().sum::<f64>() / days.len() as f64;
    if days.iter().all(|d| (d - mean).abs() <= CLUSTER_TOLERANCE) {
        Some(mean.round() as u32)
    } else {
        None
    }
}

/// First occurrence of `day` strictly after `after`, clamped to the length
/// of the target month and shifted off a Friday/Saturday weekend to the
/// preceding Thursday (payrolls in the source domain run early, not late).
fn project_payday(after: NaiveDate, day: u32) -> DateTime<Utc> {
    let mut year = after.year();
    let mut month = after.month();

    let mut candidate = clamped_date(year, month, day);
    if candidate <= after {
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
        candidate = clamped_date(year, month, day);
    }

    let adjusted = match candidate.weekday() {
        Weekday::Fri => candidate - Duration::days(1),
        Weekday::Sat => candidate - Duration::days(2),
        _ => candidate,
    };

    Utc.from_utc_datetime(&adjusted.and_hms_opt(0, 0, 0).expect("midnight is valid"))
}

fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    (0..4)
        .filter_map(|back| day.checked_sub(back))
        .find_map(|d| NaiveDate::from_ymd_opt(year, month, d))
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, 1).expect("first of month"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::{Category, ClassificationSource, Dimensions, Direction, PatternTag, SizeTier};

    fn income(amount: f64, y: i32, m: u32, d: u32) -> Transaction {
        Transaction {
            id: None,
            timestamp: Utc.with_ymd_and_hms(y, m, d, 6, 0, 0).unwrap(),
            direction: Direction::In,
            amount: Money::from_f64(amount),
            currency: "QAR".to_string(),
            amount_base: Money::from_f64(amount),
            raw_text: "SALARY CREDIT".to_string(),
            counterparty: Some("ACME LLC".to_string()),
            card: None,
            txn_type: Some("Credit".to_string()),
            display_name: "ACME LLC".to_string(),
            consolidated_name: "ACME LLC".to_string(),
            dimensions: Dimensions {
                what: Category::Income,
                when: Vec::new(),
                size: SizeTier::Large,
                pattern: PatternTag::Normal,
            },
            is_salary: true,
            is_large: true,
            is_late_night: false,
            is_work_hours: false,
            is_weekend: false,
            recipient: None,
            confidence: 1.0,
            source: ClassificationSource::Server,
        }
    }

    #[test]
    fn modal_filter_excludes_bonus() {
        let txs = vec![
            income(5000.0, 2024, 1, 25),
            income(5000.0, 2024, 2, 25),
            income(5000.0, 2024, 3, 25),
            income(15000.0, 2024, 3, 28), // bonus
        ];
        let cycle = detect_salary(&txs);
        assert_eq!(cycle.salaries.len(), 3);
        assert_eq!(cycle.modal_amount.to_minor(), 500_000);
        assert!(cycle.salaries.iter().all(|t| t.amount_base.to_f64() == 5000.0));
    }

    #[test]
    fn modal_band_allows_small_drift() {
        let txs = vec![
            income(5000.0, 2024, 1, 25),
            income(5100.0, 2024, 2, 25), // rounds to 5100 but within 10% of 5000
            income(4950.0, 2024, 3, 25),
        ];
        let cycle = detect_salary(&txs);
        assert_eq!(cycle.salaries.len(), 3);
    }

    #[test]
    fn interval_averages_recent_gaps() {
        let txs = vec![
            income(5000.0, 2024, 1, 25),
            income(5000.0, 2024, 2, 24),
            income(5000.0, 2024, 3, 25),
        ];
        let cycle = detect_salary(&txs);
        assert!((cycle.avg_interval_days - 30.0).abs() < 0.5);
    }

    #[test]
    fn interval_defaults_with_fewer_than_two() {
        let cycle = detect_salary(&[income(5000.0, 2024, 3, 25)]);
        assert_eq!(cycle.avg_interval_days, DEFAULT_INTERVAL_DAYS);
        let empty = detect_salary(&[]);
        assert!(empty.salaries.is_empty());
        assert_eq!(empty.avg_interval_days, DEFAULT_INTERVAL_DAYS);
    }

    #[test]
    fn server_date_wins() {
        let cycle = detect_salary(&[income(5000.0, 2024, 3, 25)]);
        let server = Utc.with_ymd_and_hms(2024, 4, 28, 0, 0, 0).unwrap();
        let as_of = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        assert_eq!(next_salary_date(&cycle, Some(server), &[], as_of), server);
    }

    #[test]
    fn income_day_preference_projects_forward() {
        let cycle = detect_salary(&[income(5000.0, 2024, 3, 25)]);
        let context = vec![UserContextEntry {
            entry_type: "preference".to_string(),
            key: "income day".to_string(),
            value: "28".to_string(),
            details: None,
            source: None,
        }];
        let as_of = Utc.with_ymd_and_hms(2024, 3, 26, 0, 0, 0).unwrap();
        let next = next_salary_date(&cycle, None, &context, as_of);
        // 2024-03-28 is a Thursday; no weekend shift.
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 28).unwrap());
    }

    #[test]
    fn payday_clamps_to_month_length() {
        // Day 31 in April clamps to the 30th, a Tuesday.
        let next = project_payday(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(), 31);
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2024, 4, 30).unwrap());
    }

    #[test]
    fn payday_shifts_off_the_weekend() {
        // 2024-05-31 is a Friday: shift back to Thursday the 30th.
        let next = project_payday(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), 31);
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2024, 5, 30).unwrap());
        // 2024-06-01 is a Saturday: shift back two days.
        let next = project_payday(NaiveDate::from_ymd_opt(2024, 5, 20).unwrap(), 1);
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2024, 5, 30).unwrap());
    }

    #[test]
    fn clustered_days_project_the_average() {
        let txs = vec![
            income(5000.0, 2024, 1, 24),
            income(5000.0, 2024, 2, 26),
            income(5000.0, 2024, 3, 25),
        ];
        let cycle = detect_salary(&txs);
        let as_of = Utc.with_ymd_and_hms(2024, 3, 27, 0, 0, 0).unwrap();
        let next = next_salary_date(&cycle, None, &[], as_of);
        // Average day 25; 2024-04-25 is a Thursday.
        assert_eq!(next.date_naive(), NaiveDate::from_ymd_opt(2024, 4, 25).unwrap());
    }

    #[test]
    fn scattered_days_fall_back_to_interval() {
        let txs = vec![
            income(5000.0, 2024, 1, 5),
            income(5000.0, 2024, 2, 20),
            income(5000.0, 2024, 3, 25),
        ];
        let cycle = detect_salary(&txs);
        let as_of = Utc.with_ymd_and_hms(2024, 3, 27, 0, 0, 0).unwrap();
        let next = next_salary_date(&cycle, None, &[], as_of);
        let expected = cycle.last_salary_date().unwrap()
            + Duration::seconds((cycle.avg_interval_days * 86_400.0).round() as i64);
        assert_eq!(next, expected);
    }

    #[test]
    fn salary_period_prefers_second_most_recent() {
        let txs = vec![
            income(5000.0, 2024, 1, 25),
            income(5000.0, 2024, 2, 25),
            income(5000.0, 2024, 3, 25),
        ];
        let cycle = detect_salary(&txs);
        let as_of = Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap();
        let period = salary_period(&cycle, as_of);
        assert_eq!(period.start.date_naive(), NaiveDate::from_ymd_opt(2024, 2, 25).unwrap());
        assert_eq!(period.end, as_of);
    }

    #[test]
    fn salary_period_with_one_or_zero_salaries() {
        let as_of = Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap();

        let cycle = detect_salary(&[income(5000.0, 2024, 3, 25)]);
        let period = salary_period(&cycle, as_of);
        assert_eq!(period.start.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 25).unwrap());

        let empty = detect_salary(&[]);
        let period = salary_period(&empty, as_of);
        assert_eq!((period.end - period.start).num_days(), 90);
    }
}
