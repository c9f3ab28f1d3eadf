use std::collections::HashMap;

use flow_core::{Category, ClassificationSource, LocalOverride, MerchantRule};

/// The resolved merchant identity for one raw transaction text.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMerchant {
    pub display_name: String,
    pub consolidated_name: String,
    pub category: Category,
    pub source: ClassificationSource,
}

/// Internal pairing of a rule with its precomputed lowercase pattern.
struct CompiledRule {
    rule: MerchantRule,
    pattern_lower: String,
    category: Option<Category>,
}

/// Assigns a category and display identity to raw SMS text via an ordered
/// chain, first match wins:
///
/// 1. local override (exact match on lowercased raw text), which is how a manual
///    correction sticks before the server round-trips;
/// 2. backend-asserted category, preferring the AI-suggested subcategory
///    when it folds onto the canonical set;
/// 3. first merchant rule whose pattern is a substring of the raw text;
/// 4. `Uncategorized` fallback.
///
/// Pure and deterministic; resolution never fails.
pub struct CategoryResolver {
    overrides: HashMap<String, LocalOverride>,
    rules: Vec<CompiledRule>,
}

impl CategoryResolver {
    pub fn new(rules: Vec<MerchantRule>, overrides: HashMap<String, LocalOverride>) -> Self {
        let rules = rules
            .into_iter()
            .filter(|r| !r.pattern.trim().is_empty())
            .map(|rule| CompiledRule {
                pattern_lower: rule.pattern.trim().to_lowercase(),
                category: Category::from_label(&rule.category),
                rule,
            })
            .collect();
        Self { overrides, rules }
    }

    pub fn resolve(
        &self,
        raw_text: &str,
        ai_category: Option<&str>,
        counterparty: Option<&str>,
        db_category: Option<&str>,
    ) -> ResolvedMerchant {
        let key = raw_text.trim().to_lowercase();

        // 1. Local override: always authoritative for this exact raw text.
        if let Some(ov) = self.overrides.get(&key) {
            return ResolvedMerchant {
                display_name: ov.display_name.clone(),
                consolidated_name: ov.consolidated_name.clone(),
                category: ov.category,
                source: ClassificationSource::Manual,
            };
        }

        // Display identity for every later step prefers the cleaned
        // counterparty over the raw SMS text.
        let fallback_name = counterparty
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(raw_text.trim())
            .to_string();

        // 2. Backend-asserted category. The AI subcategory wins over the
        //    coarser backend label when it folds onto the canonical set.
        let ai = ai_category.and_then(Category::from_label);
        let db = db_category.and_then(Category::from_label);
        if let Some(category) = ai.or(db) {
            let source = if ai.is_some() {
                ClassificationSource::Ai
            } else {
                ClassificationSource::Server
            };
            return ResolvedMerchant {
                display_name: fallback_name.clone(),
                consolidated_name: fallback_name,
                category,
                source,
            };
        }

        // 3. First merchant rule whose pattern is a substring of the text.
        if let Some(cr) = self.rules.iter().find(|cr| key.contains(&cr.pattern_lower)) {
            return ResolvedMerchant {
                display_name: cr.rule.display_name.clone(),
                consolidated_name: cr.rule.consolidated_name.clone(),
                category: cr.category.unwrap_or(Category::Uncategorized),
                source: ClassificationSource::Rule,
            };
        }

        // 4. Fallback.
        ResolvedMerchant {
            display_name: fallback_name.clone(),
            consolidated_name: fallback_name,
            category: Category::Uncategorized,
            source: ClassificationSource::Rule,
        }
    }
}
