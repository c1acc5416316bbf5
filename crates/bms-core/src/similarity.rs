//! Overlap-based similarity between search results.
//!
//! Scores live in `[0, 1]`: identical text scores 1.0, results sharing no
//! vocabulary, category or location score 0.0, and the score grows with
//! overlap in between.

use std::collections::BTreeSet;

use crate::search::SearchResult;

const TEXT_WEIGHT: f64 = 0.7;
const CATEGORY_WEIGHT: f64 = 0.15;
const LOCATION_WEIGHT: f64 = 0.15;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Features {
    pub text: BTreeSet<String>,
    pub category: Option<String>,
    pub location: BTreeSet<String>,
}

impl Features {
    pub fn of(result: &SearchResult) -> Self {
        Self {
            text: tokenize(&format!("{} {}", result.title, result.description)),
            category: result
                .category
                .as_deref()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty()),
            location: result.location.as_deref().map(tokenize).unwrap_or_default(),
        }
    }
}

pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Weighted overlap over the features both sides carry; weights are
/// renormalised so a missing category or location neither helps nor hurts.
pub fn similarity(a: &Features, b: &Features) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    if !a.text.is_empty() && !b.text.is_empty() {
        weighted += TEXT_WEIGHT * jaccard(&a.text, &b.text);
        total += TEXT_WEIGHT;
    }
    if let (Some(ca), Some(cb)) = (&a.category, &b.category) {
        weighted += CATEGORY_WEIGHT * if ca == cb { 1.0 } else { 0.0 };
        total += CATEGORY_WEIGHT;
    }
    if !a.location.is_empty() && !b.location.is_empty() {
        weighted += LOCATION_WEIGHT * jaccard(&a.location, &b.location);
        total += LOCATION_WEIGHT;
    }
    if total == 0.0 {
        0.0
    } else {
        (weighted / total).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, description: &str, category: Option<&str>, location: Option<&str>) -> SearchResult {
        SearchResult {
            id: title.to_string(),
            source: "test".into(),
            title: title.into(),
            description: description.into(),
            url: String::new(),
            published_at: None,
            score: None,
            estimated_value: None,
            deadline: None,
            location: location.map(Into::into),
            category: category.map(Into::into),
            validation_count: 0,
        }
    }

    #[test]
    fn identical_scores_one_and_disjoint_scores_zero() {
        let a = result("Solar mini-grid feasibility", "Senegal rural sites", Some("energy"), Some("Senegal"));
        assert!((similarity(&Features::of(&a), &Features::of(&a)) - 1.0).abs() < f64::EPSILON);

        let b = result("Hospital laundry tender", "linen supply", Some("health"), Some("Peru"));
        assert_eq!(similarity(&Features::of(&a), &Features::of(&b)), 0.0);
    }

    #[test]
    fn more_overlap_never_scores_lower() {
        let profile = Features::of(&result("water sanitation audit programme", "", None, None));
        let one = Features::of(&result("water tender", "", None, None));
        let two = Features::of(&result("water sanitation tender", "", None, None));
        let three = Features::of(&result("water sanitation audit tender", "", None, None));
        let s1 = similarity(&profile, &one);
        let s2 = similarity(&profile, &two);
        let s3 = similarity(&profile, &three);
        assert!(0.0 < s1 && s1 < s2 && s2 < s3 && s3 < 1.0);
    }

    #[test]
    fn missing_features_are_ignored() {
        let with_category = result("road maintenance", "", Some("transport"), None);
        let without = result("road maintenance", "", None, None);
        let score = similarity(&Features::of(&with_category), &Features::of(&without));
        assert!((score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tokenizer_handles_accents_and_punctuation() {
        let tokens = tokenize("Étude d'impact, Côte-d'Ivoire");
        assert!(tokens.contains("étude"));
        assert!(tokens.contains("côte"));
        assert!(tokens.contains("ivoire"));
    }
}
