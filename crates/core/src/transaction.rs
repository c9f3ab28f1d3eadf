use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::category::Category;
use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Bank exports write `IN`/`OUT`; anything unrecognized is treated as an
    /// outflow, which matches how the SMS feed behaves for card payments.
    pub fn from_label(label: &str) -> Direction {
        if label.trim().eq_ignore_ascii_case("in") {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => write!(f, "IN"),
            Direction::Out => write!(f, "OUT"),
        }
    }
}

/// Time-context tags derived from the transaction timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeContext {
    Morning,
    Afternoon,
    Evening,
    LateNight,
    WorkHours,
    Weekend,
}

impl TimeContext {
    pub fn from_label(label: &str) -> Option<TimeContext> {
        match label.trim().to_lowercase().as_str() {
            "morning" => Some(TimeContext::Morning),
            "afternoon" => Some(TimeContext::Afternoon),
            "evening" => Some(TimeContext::Evening),
            "late night" | "latenight" => Some(TimeContext::LateNight),
            "work hours" | "workhours" => Some(TimeContext::WorkHours),
            "weekend" => Some(TimeContext::Weekend),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SizeTier {
    Small,
    Medium,
    Large,
}

impl SizeTier {
    pub fn from_label(label: &str) -> Option<SizeTier> {
        match label.trim().to_lowercase().as_str() {
            "small" => Some(SizeTier::Small),
            "medium" => Some(SizeTier::Medium),
            "large" => Some(SizeTier::Large),
            _ => None,
        }
    }
}

/// Behavioral pattern assigned post-hoc by the pattern detector (or supplied
/// by the backend). Serde strings are the display labels the UI shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternTag {
    Normal,
    #[serde(rename = "Night Out")]
    NightOut,
    #[serde(rename = "Work Expense")]
    WorkExpense,
    Splurge,
    Subscription,
}

impl PatternTag {
    pub fn from_label(label: &str) -> Option<PatternTag> {
        match label.trim().to_lowercase().as_str() {
            "normal" => Some(PatternTag::Normal),
            "night out" => Some(PatternTag::NightOut),
            "work expense" => Some(PatternTag::WorkExpense),
            "splurge" => Some(PatternTag::Splurge),
            "subscription" => Some(PatternTag::Subscription),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PatternTag::Normal => "Normal",
            PatternTag::NightOut => "Night Out",
            PatternTag::WorkExpense => "Work Expense",
            PatternTag::Splurge => "Splurge",
            PatternTag::Subscription => "Subscription",
        }
    }
}

/// Where a transaction's classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    Rule,
    Ai,
    Manual,
    Server,
}

/// How a recipient was linked to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecipientMatchType {
    Phone,
    Account,
    Name,
    ShortName,
    Manual,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRef {
    pub id: i64,
    pub match_type: RecipientMatchType,
}

/// The four independent classification dimensions of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Category ("what").
    pub what: Category,
    /// Time-context tags ("when"); order is not significant.
    pub when: Vec<TimeContext>,
    pub size: SizeTier,
    pub pattern: PatternTag,
}

impl Dimensions {
    pub fn has(&self, tag: TimeContext) -> bool {
        self.when.contains(&tag)
    }
}

/// A canonical, classified transaction.
///
/// Identity fields are immutable once normalized; the classification fields
/// (`dimensions`, names, recipient) may be rewritten by the pattern detector
/// or an explicit user/server correction. The normalizer itself always
/// writes `PatternTag::Normal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Backend row id; `None` for rows not yet synced upstream.
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// Amount in the native currency of the SMS.
    pub amount: Money,
    pub currency: String,
    /// Amount converted to the reporting currency.
    pub amount_base: Money,
    pub raw_text: String,
    pub counterparty: Option<String>,
    pub card: Option<String>,
    pub txn_type: Option<String>,
    pub display_name: String,
    /// Group key for merchant-level aggregation.
    pub consolidated_name: String,
    pub dimensions: Dimensions,
    pub is_salary: bool,
    // Cached from `dimensions` for fast filtering.
    pub is_large: bool,
    pub is_late_night: bool,
    pub is_work_hours: bool,
    pub is_weekend: bool,
    pub recipient: Option<RecipientRef>,
    pub confidence: f64,
    pub source: ClassificationSource,
}

impl Transaction {
    pub fn category(&self) -> Category {
        self.dimensions.what
    }

    pub fn pattern(&self) -> PatternTag {
        self.dimensions.pattern
    }

    pub fn is_out(&self) -> bool {
        self.direction == Direction::Out
    }

    pub fn is_in(&self) -> bool {
        self.direction == Direction::In
    }
}
