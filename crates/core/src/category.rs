use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical spending categories.
///
/// The set is closed: backend rows and merchant rules carry free-text labels,
/// and [`Category::from_label`] folds the known legacy/alternate spellings
/// onto this set. A label that maps to nothing is treated as absent so the
/// resolution chain can fall through to the next source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Dining,
    Coffee,
    Groceries,
    BarsNightlife,
    Shopping,
    Transport,
    Travel,
    Entertainment,
    Health,
    Utilities,
    Rent,
    Education,
    Charity,
    Transfer,
    Income,
    Fees,
    Uncategorized,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::Dining => "Dining",
            Category::Coffee => "Coffee",
            Category::Groceries => "Groceries",
            Category::BarsNightlife => "Bars & Nightlife",
            Category::Shopping => "Shopping",
            Category::Transport => "Transport",
            Category::Travel => "Travel",
            Category::Entertainment => "Entertainment",
            Category::Health => "Health",
            Category::Utilities => "Utilities",
            Category::Rent => "Rent",
            Category::Education => "Education",
            Category::Charity => "Charity",
            Category::Transfer => "Transfer",
            Category::Income => "Income",
            Category::Fees => "Fees",
            Category::Uncategorized => "Uncategorized",
        }
    }

    /// Parse a canonical or legacy label. Comparison is case-insensitive and
    /// ignores surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Category> {
        let key = label.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }
        let category = match key.as_str() {
            "dining" | "restaurants" | "restaurant" | "food & dining" | "food" => Category::Dining,
            "coffee" | "cafe" | "cafes" | "café" => Category::Coffee,
            "groceries" | "grocery" | "supermarket" => Category::Groceries,
            "bars & nightlife" | "bars & hotels" | "nightlife" | "bars" => Category::BarsNightlife,
            "shopping" | "retail" => Category::Shopping,
            "transport" | "transportation" | "taxi" | "ride hailing" => Category::Transport,
            "travel" => Category::Travel,
            "entertainment" => Category::Entertainment,
            "health" | "pharmacy" | "medical" => Category::Health,
            "utilities" | "bills & utilities" => Category::Utilities,
            "rent" | "housing" => Category::Rent,
            "education" => Category::Education,
            "charity" | "donations" => Category::Charity,
            "transfer" | "transfers" => Category::Transfer,
            "income" | "salary" => Category::Income,
            "fees" | "bank fees" => Category::Fees,
            "uncategorized" => Category::Uncategorized,
            _ => return None,
        };
        Some(category)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
