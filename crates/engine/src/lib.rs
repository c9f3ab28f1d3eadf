pub mod budget;
pub mod ingest;
pub mod normalize;
pub mod pattern;
pub mod recipient;
pub mod resolve;
pub mod salary;
pub(crate) mod util;

pub use budget::{
    category_trends, daily_budget, forecast_goals, forecast_period_end, recurring_load,
    CategoryTrend, Confidence, GoalForecast, GoalStatus, PeriodForecast, TrendDirection,
};
pub use ingest::{parse_ledger_csv, CsvError};
pub use normalize::{
    merge_incremental, normalize, NormalizeContext, RawRow, SizeTierConfig, TimestampField,
};
pub use pattern::PatternDetector;
pub use recipient::{normalize_phone, RecipientMatch, RecipientMatcher};
pub use resolve::{CategoryResolver, ResolvedMerchant};
pub use salary::{detect_salary, next_salary_date, salary_period, SalaryCycle};
