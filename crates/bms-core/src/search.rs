//! Search results returned by executors and the validations users record
//! against them.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub estimated_value: Option<f64>,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub validation_count: u32,
}

impl SearchResult {
    pub fn key(&self) -> ResultKey {
        ResultKey {
            source: self.source.clone(),
            id: self.id.clone(),
        }
    }
}

/// Results are identified by the id their source gave them plus the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultKey {
    pub source: String,
    pub id: String,
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationOutcome {
    InProgress,
    Submitted,
    Won,
    Lost,
}

impl ValidationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationOutcome::InProgress => "in-progress",
            ValidationOutcome::Submitted => "submitted",
            ValidationOutcome::Won => "won",
            ValidationOutcome::Lost => "lost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultValidation {
    pub user_id: String,
    pub result: SearchResult,
    pub outcome: ValidationOutcome,
    pub validated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PeriodBounds {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl PeriodBounds {
    /// Undated results are never filtered out.
    pub fn contains(&self, at: Option<DateTime<Utc>>) -> bool {
        let Some(at) = at else {
            return true;
        };
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bounds_are_inclusive_and_skip_undated() {
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap();
        let to = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).single().unwrap();
        let bounds = PeriodBounds {
            from: Some(from),
            to: Some(to),
        };
        assert!(bounds.contains(Some(from)));
        assert!(bounds.contains(Some(to)));
        assert!(bounds.contains(None));
        assert!(!bounds.contains(Some(to + chrono::Duration::seconds(1))));
        assert!(PeriodBounds::default().contains(Some(from)));
    }

    #[test]
    fn result_defaults_fill_optional_fields() {
        let result: SearchResult = serde_json::from_str(
            r#"{"id":"42","source":"ungm","title":"Water audit","url":"https://example.org/42"}"#,
        )
        .unwrap();
        assert_eq!(result.validation_count, 0);
        assert_eq!(result.key().to_string(), "ungm:42");
    }
}
