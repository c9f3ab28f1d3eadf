use std::collections::HashMap;

use chrono::NaiveDate;

use flow_core::{Category, PatternTag, Transaction, UserContextEntry};

use crate::util::text_similarity;

/// Categories whose late-night clusters read as a night out.
const NIGHT_OUT_CATEGORIES: &[Category] =
    &[Category::BarsNightlife, Category::Dining, Category::Coffee];

/// Categories eligible for the work-expense tag.
const WORK_CATEGORIES: &[Category] = &[Category::Dining, Category::Coffee];

/// Phrases in a user-context entry that exempt a transaction from splurge
/// tagging ("that's my rent, not a splurge").
const EXEMPT_PHRASES: &[&str] = &[
    "not a splurge",
    "bill",
    "rent",
    "subscription",
    "regular",
    "recurring",
    "standing order",
];

/// Tags behavioral clusters on OUT transactions, in place.
///
/// If any transaction already carries a non-`Normal` tag the detector is a
/// no-op: the backend's computed patterns must never be clobbered by these
/// weaker local heuristics, and the guard makes repeated sync cycles
/// idempotent.
pub struct PatternDetector {
    pub night_out_min_cluster: usize,
    pub splurge_multiplier: f64,
    pub subscription_min_interval_days: f64,
    pub subscription_max_interval_days: f64,
    pub subscription_amount_tolerance: f64,
    pub exemption_similarity: f32,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self {
            night_out_min_cluster: 2,
            splurge_multiplier: 3.0,
            subscription_min_interval_days: 25.0,
            subscription_max_interval_days: 35.0,
            subscription_amount_tolerance: 0.10,
            exemption_similarity: 0.8,
        }
    }
}

impl PatternDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-tag the whole collection. Depends only on the transaction set at
    /// call time, so it is safe to re-run after any mutation.
    pub fn detect(&self, transactions: &mut [Transaction], context: &[UserContextEntry]) {
        if transactions.iter().any(|t| t.pattern() != PatternTag::Normal) {
            tracing::debug!("pattern tags already present; detector deferring");
            return;
        }

        self.tag_night_outs(transactions);
        self.tag_work_expenses(transactions);
        self.tag_splurges(transactions, context);
        self.tag_subscriptions(transactions);
    }

    /// ≥ N late-night dining/bar/coffee transactions on one calendar day tag
    /// each other as a night out.
    fn tag_night_outs(&self, transactions: &mut [Transaction]) {
        let mut by_day: HashMap<NaiveDate, Vec<usize>> = HashMap::new();
        for (idx, tx) in transactions.iter().enumerate() {
            if tx.is_out()
                && tx.is_late_night
                && NIGHT_OUT_CATEGORIES.contains(&tx.category())
            {
                by_day.entry(tx.timestamp.date_naive()).or_default().push(idx);
            }
        }
        for indices in by_day.values() {
            if indices.len() >= self.night_out_min_cluster {
                for &idx in indices {
                    transactions[idx].dimensions.pattern = PatternTag::NightOut;
                }
            }
        }
    }

    fn tag_work_expenses(&self, transactions: &mut [Transaction]) {
        for tx in transactions.iter_mut() {
            if tx.is_out()
                && tx.is_work_hours
                && WORK_CATEGORIES.contains(&tx.category())
                && tx.pattern() == PatternTag::Normal
            {
                tx.dimensions.pattern = PatternTag::WorkExpense;
            }
        }
    }

    /// Anything over `multiplier` × its category mean is a splurge, unless a
    /// user-context entry says otherwise.
    fn tag_splurges(&self, transactions: &mut [Transaction], context: &[UserContextEntry]) {
        let mut sums: HashMap<Category, (f64, usize)> = HashMap::new();
        for tx in transactions.iter().filter(|t| t.is_out()) {
            let entry = sums.entry(tx.category()).or_insert((0.0, 0));
            entry.0 += tx.amount_base.to_f64();
            entry.1 += 1;
        }
        let means: HashMap<Category, f64> = sums
            .into_iter()
            .map(|(cat, (sum, n))| (cat, sum / n as f64))
            .collect();

        for tx in transactions.iter_mut() {
            if !tx.is_out() || tx.pattern() != PatternTag::Normal {
                continue;
            }
            let Some(&mean) = means.get(&tx.category()) else {
                continue;
            };
            if mean > 0.0
                && tx.amount_base.to_f64() > self.splurge_multiplier * mean
                && !self.is_exempt(tx, context)
            {
                tx.dimensions.pattern = PatternTag::Splurge;
            }
        }
    }

    /// An exempting entry mentions a bill/rent/subscription-style phrase and
    /// points at this transaction, by fuzzy text match against its raw,
    /// counterparty, or display text, or by naming its rounded amount.
    fn is_exempt(&self, tx: &Transaction, context: &[UserContextEntry]) -> bool {
        context.iter().any(|entry| {
            let entry_text = format!(
                "{} {}",
                entry.value,
                entry.details.as_deref().unwrap_or_default()
            )
            .to_lowercase();
            if !EXEMPT_PHRASES.iter().any(|p| entry_text.contains(p)) {
                return false;
            }

            let subject = if entry.key.trim().is_empty() {
                entry.value.as_str()
            } else {
                entry.key.as_str()
            };
            let subject_lower = subject.trim().to_lowercase();
            if subject_lower.is_empty() {
                return false;
            }

            let texts = [
                Some(tx.raw_text.as_str()),
                tx.counterparty.as_deref(),
                Some(tx.display_name.as_str()),
            ];
            let text_hit = texts.into_iter().flatten().any(|t| {
                let t_lower = t.to_lowercase();
                t_lower.contains(&subject_lower)
                    || subject_lower.contains(&t_lower)
                    || text_similarity(subject, t) >= self.exemption_similarity
            });

            let rounded = format!("{}", tx.amount_base.to_f64().round() as i64);
            text_hit || entry_text.contains(&rounded)
        })
    }

    /// Merchants with ≥ 2 charges, a mean gap of roughly a month, and
    /// near-constant amounts are subscriptions. The tag overwrites anything
    /// the earlier passes assigned for that merchant.
    fn tag_subscriptions(&self, transactions: &mut [Transaction]) {
        let mut by_merchant: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, tx) in transactions.iter().enumerate() {
            if tx.is_out() && !tx.consolidated_name.trim().is_empty() {
                by_merchant
                    .entry(tx.consolidated_name.trim().to_lowercase())
                    .or_default()
                    .push(idx);
            }
        }

        for indices in by_merchant.values() {
            if indices.len() < 2 {
                continue;
            }
            let mut ordered: Vec<usize> = indices.clone();
            ordered.sort_by_key(|&i| transactions[i].timestamp);

            let gaps: Vec<f64> = ordered
                .windows(2)
                .map(|w| {
                    (transactions[w[1]].timestamp - transactions[w[0]].timestamp).num_seconds()
                        as f64
                        / 86_400.0
                })
                .collect();
            let mean_gap = gaps.iter().sum::<f64>() / gaps.len() as f64;
            if mean_gap < self.subscription_min_interval_days
                || mean_gap > self.subscription_max_interval_days
            {
                continue;
            }

            let amounts: Vec<f64> = ordered
                .iter()
                .map(|&i| transactions[i].amount_base.to_f64())
                .collect();
            let mean_amount = amounts.iter().sum::<f64>() / amounts.len() as f64;
            if mean_amount <= 0.0 {
                continue;
            }
            let steady = amounts
                .iter()
                .all(|a| (a - mean_amount).abs() <= self.subscription_amount_tolerance * mean_amount);
            if !steady {
                continue;
            }

            for &idx in &ordered {
                transactions[idx].dimensions.pattern = PatternTag::Subscription;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use flow_core::{
        ClassificationSource, Dimensions, Direction, Money, SizeTier, TimeContext,
    };

    fn tx(
        direction: Direction,
        category: Category,
        amount: f64,
        ts: DateTime<Utc>,
        merchant: &str,
    ) -> Transaction {
        let when = Vec::new();
        Transaction {
            id: None,
            timestamp: ts,
            direction,
            amount: Money::from_f64(amount),
            currency: "QAR".to_string(),
            amount_base: Money::from_f64(amount),
            raw_text: format!("POS {merchant}"),
            counterparty: Some(merchant.to_string()),
            card: None,
            txn_type: None,
            display_name: merchant.to_string(),
            consolidated_name: merchant.to_string(),
            dimensions: Dimensions {
                what: category,
                when,
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

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, h, 0, 0).unwrap()
    }

    fn late(mut t: Transaction) -> Transaction {
        t.is_late_night = true;
        t.dimensions.when.push(TimeContext::LateNight);
        t
    }

    fn work(mut t: Transaction) -> Transaction {
        t.is_work_hours = true;
        t.dimensions.when.push(TimeContext::WorkHours);
        t
    }

    #[test]
    fn night_out_needs_a_cluster_on_one_day() {
        let mut txs = vec![
            late(tx(Direction::Out, Category::BarsNightlife, 120.0, at(10, 23), "Sky Bar")),
            late(tx(Direction::Out, Category::Dining, 90.0, at(10, 23), "Shawarma House")),
            // Lone late-night coffee two days later: stays Normal.
            late(tx(Direction::Out, Category::Coffee, 20.0, at(12, 23), "Karak Spot")),
        ];
        PatternDetector::new().detect(&mut txs, &[]);
        assert_eq!(txs[0].pattern(), PatternTag::NightOut);
        assert_eq!(txs[1].pattern(), PatternTag::NightOut);
        assert_eq!(txs[2].pattern(), PatternTag::Normal);
    }

    #[test]
    fn work_expense_tags_work_hour_dining() {
        let mut txs = vec![
            work(tx(Direction::Out, Category::Coffee, 18.0, at(13, 10), "Flat White Co")),
            work(tx(Direction::Out, Category::Groceries, 80.0, at(13, 10), "Mega Mart")),
        ];
        PatternDetector::new().detect(&mut txs, &[]);
        assert_eq!(txs[0].pattern(), PatternTag::WorkExpense);
        assert_eq!(txs[1].pattern(), PatternTag::Normal);
    }

    #[test]
    fn splurge_over_three_times_category_mean() {
        let mut txs = vec![
            tx(Direction::Out, Category::Shopping, 100.0, at(2, 12), "Mall Shop"),
            tx(Direction::Out, Category::Shopping, 100.0, at(3, 12), "Mall Shop"),
            tx(Direction::Out, Category::Shopping, 1000.0, at(4, 12), "Luxury Shop"),
        ];
        PatternDetector::new().detect(&mut txs, &[]);
        // mean = 400, threshold 1200: nothing qualifies.
        assert!(txs.iter().all(|t| t.pattern() == PatternTag::Normal));

        let mut txs = vec![
            tx(Direction::Out, Category::Shopping, 100.0, at(2, 12), "Mall Shop"),
            tx(Direction::Out, Category::Shopping, 100.0, at(3, 12), "Mall Shop"),
            tx(Direction::Out, Category::Shopping, 100.0, at(4, 12), "Mall Shop"),
            tx(Direction::Out, Category::Shopping, 2000.0, at(5, 12), "Luxury Shop"),
        ];
        PatternDetector::new().detect(&mut txs, &[]);
        // mean = 575, threshold 1725 < 2000.
        assert_eq!(txs[3].pattern(), PatternTag::Splurge);
        assert_eq!(txs[0].pattern(), PatternTag::Normal);
    }

    #[test]
    fn splurge_exemption_via_user_context() {
        let mut txs = vec![
            tx(Direction::Out, Category::Utilities, 50.0, at(2, 12), "Kahramaa"),
            tx(Direction::Out, Category::Utilities, 50.0, at(3, 12), "Kahramaa"),
            tx(Direction::Out, Category::Utilities, 50.0, at(4, 12), "Kahramaa"),
            tx(Direction::Out, Category::Utilities, 900.0, at(5, 12), "School Fees Co"),
        ];
        let context = vec![UserContextEntry {
            entry_type: "correction".to_string(),
            key: "School Fees Co".to_string(),
            value: "regular bill, not a splurge".to_string(),
            details: None,
            source: Some("user".to_string()),
        }];
        PatternDetector::new().detect(&mut txs, &context);
        assert_eq!(txs[3].pattern(), PatternTag::Normal);
    }

    #[test]
    fn splurge_exemption_by_rounded_amount() {
        let mut txs = vec![
            tx(Direction::Out, Category::Rent, 100.0, at(2, 12), "A"),
            tx(Direction::Out, Category::Rent, 100.0, at(3, 12), "B"),
            tx(Direction::Out, Category::Rent, 100.0, at(4, 12), "C"),
            tx(Direction::Out, Category::Rent, 5500.0, at(5, 12), "Landlord Transfer"),
        ];
        let context = vec![UserContextEntry {
            entry_type: "note".to_string(),
            key: "monthly".to_string(),
            value: "the 5500 every month is rent".to_string(),
            details: None,
            source: None,
        }];
        PatternDetector::new().detect(&mut txs, &context);
        assert_eq!(txs[3].pattern(), PatternTag::Normal);
    }

    #[test]
    fn subscription_on_monthly_cadence_with_steady_amounts() {
        let mut txs = vec![
            tx(Direction::Out, Category::Entertainment, 39.0, at(1, 9), "Netflix"),
            tx(Direction::Out, Category::Entertainment, 39.0, at(31, 9), "Netflix"),
            tx(Direction::Out, Category::Entertainment, 150.0, at(15, 9), "Cinema"),
        ];
        PatternDetector::new().detect(&mut txs, &[]);
        assert_eq!(txs[0].pattern(), PatternTag::Subscription);
        assert_eq!(txs[1].pattern(), PatternTag::Subscription);
        assert_eq!(txs[2].pattern(), PatternTag::Normal);
    }

    #[test]
    fn subscription_rejects_wobbly_amounts_and_cadence() {
        // Amount varies by 20%: not a subscription.
        let mut txs = vec![
            tx(Direction::Out, Category::Entertainment, 39.0, at(1, 9), "Gamepass"),
            tx(Direction::Out, Category::Entertainment, 47.0, at(31, 9), "Gamepass"),
        ];
        PatternDetector::new().detect(&mut txs, &[]);
        assert_eq!(txs[0].pattern(), PatternTag::Normal);

        // Weekly cadence: not a subscription.
        let mut txs = vec![
            tx(Direction::Out, Category::Groceries, 200.0, at(1, 9), "Mega Mart"),
            tx(Direction::Out, Category::Groceries, 200.0, at(8, 9), "Mega Mart"),
        ];
        PatternDetector::new().detect(&mut txs, &[]);
        assert_eq!(txs[0].pattern(), PatternTag::Normal);
    }

    #[test]
    fn subscription_overwrites_earlier_tags() {
        // A late-night pair that the night-out pass tags first, but the
        // merchant bills monthly at a steady amount: subscription wins.
        let mut txs = vec![
            late(tx(Direction::Out, Category::Dining, 49.0, at(1, 23), "Club Diner")),
            late(tx(Direction::Out, Category::Dining, 49.0, at(1, 23), "Late Grill")),
            late(tx(Direction::Out, Category::Dining, 49.0, at(31, 23), "Club Diner")),
        ];
        PatternDetector::new().detect(&mut txs, &[]);
        assert_eq!(txs[0].pattern(), PatternTag::Subscription);
        assert_eq!(txs[2].pattern(), PatternTag::Subscription);
        // The partner row keeps its night-out tag.
        assert_eq!(txs[1].pattern(), PatternTag::NightOut);
    }

    #[test]
    fn detector_defers_to_existing_tags() {
        let mut pre_tagged = vec![
            late(tx(Direction::Out, Category::Dining, 49.0, at(1, 23), "A")),
            late(tx(Direction::Out, Category::Dining, 49.0, at(1, 23), "B")),
        ];
        pre_tagged[0].dimensions.pattern = PatternTag::Splurge;
        let before = pre_tagged.clone();
        PatternDetector::new().detect(&mut pre_tagged, &[]);
        assert_eq!(pre_tagged, before);
    }

    #[test]
    fn detection_is_idempotent() {
        let mut txs = vec![
            late(tx(Direction::Out, Category::Dining, 60.0, at(4, 23), "Grill")),
            late(tx(Direction::Out, Category::BarsNightlife, 90.0, at(4, 23), "Bar")),
            work(tx(Direction::Out, Category::Coffee, 15.0, at(6, 10), "Cafe")),
        ];
        let detector = PatternDetector::new();
        detector.detect(&mut txs, &[]);
        let first = txs.clone();
        detector.detect(&mut txs, &[]);
        assert_eq!(txs, first);
    }

    #[test]
    fn in_transactions_are_never_tagged() {
        let mut txs = vec![
            late(tx(Direction::In, Category::Income, 500.0, at(4, 23), "Refund")),
            late(tx(Direction::Out, Category::Dining, 60.0, at(4, 23), "Grill")),
            late(tx(Direction::Out, Category::Dining, 70.0, at(4, 23), "Bar")),
        ];
        PatternDetector::new().detect(&mut txs, &[]);
        assert_eq!(txs[0].pattern(), PatternTag::Normal);
        assert_eq!(txs[1].pattern(), PatternTag::NightOut);
    }
}
