pub mod category;
pub mod lookup;
pub mod money;
pub mod period;
pub mod transaction;

pub use category::Category;
pub use lookup::{FxTable, Goal, LocalOverride, MerchantRule, Recipient, RecurringItem, UserContextEntry};
pub use money::Money;
pub use period::ReportingPeriod;
pub use transaction::{
    ClassificationSource, Dimensions, Direction, PatternTag, RecipientMatchType, RecipientRef,
    SizeTier, TimeContext, Transaction,
};
