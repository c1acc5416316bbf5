use bms_core::SearchResult;
use strsim::jaro_winkler;

#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub title_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            title_threshold: 0.95,
        }
    }
}

/// Merges the same tender reported by several sources. Two results are the
/// same when they share a URL or their normalized titles are near-identical;
/// the first one seen wins.
#[derive(Debug, Clone, Default)]
pub struct ResultDedup {
    config: DedupConfig,
}

impl ResultDedup {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn normalize_title(input: &str) -> String {
        input
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_duplicate(&self, a: &SearchResult, b: &SearchResult) -> bool {
        if a.key() == b.key() {
            return true;
        }
        let url_a = a.url.trim().trim_end_matches('/');
        if !url_a.is_empty() && url_a == b.url.trim().trim_end_matches('/') {
            return true;
        }
        let title_a = Self::normalize_title(&a.title);
        let title_b = Self::normalize_title(&b.title);
        !title_a.is_empty() && jaro_winkler(&title_a, &title_b) >= self.config.title_threshold
    }

    pub fn apply(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let mut kept: Vec<SearchResult> = Vec::with_capacity(results.len());
        for result in results {
            if !kept.iter().any(|existing| self.is_duplicate(existing, &result)) {
                kept.push(result);
            }
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::result;

    #[test]
    fn same_tender_from_two_sources_is_merged() {
        let dedup = ResultDedup::default();
        let kept = dedup.apply(vec![
            result("ungm", "1", "Feasibility study: solar mini-grids (Senegal)", "https://a/1"),
            result("dgmarket", "x9", "Feasibility Study - Solar Mini-Grids, Senegal", "https://b/x9"),
            result("afdb", "7", "Road rehabilitation works", "https://a/1/"),
            result("afdb", "8", "Hospital laundry services", "https://c/8"),
        ]);
        let ids = kept.iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["1", "8"]);
    }

    #[test]
    fn threshold_controls_title_matching() {
        let a = result("s", "1", "Water supply audit phase one", "");
        let b = result("s", "2", "Water supply audit phase two", "");
        assert!(!ResultDedup::new(DedupConfig { title_threshold: 0.99 }).is_duplicate(&a, &b));
        assert!(ResultDedup::new(DedupConfig { title_threshold: 0.80 }).is_duplicate(&a, &b));
    }
}
