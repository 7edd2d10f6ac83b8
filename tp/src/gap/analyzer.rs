//! Plan-versus-content set comparison

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::{GapAnalysisResult, GapError, TopicClassifier};
use crate::domain::ChapterPlan;

/// Lowercase, strip punctuation and collapse whitespace
pub fn normalize_topic(topic: &str) -> String {
    topic
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalized_set<'a>(topics: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    topics
        .into_iter()
        .map(|t| normalize_topic(t))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Compares chapter plans against transcripts
#[derive(Clone)]
pub struct GapAnalyzer {
    classifier: Arc<dyn TopicClassifier>,
}

impl GapAnalyzer {
    pub fn new(classifier: Arc<dyn TopicClassifier>) -> Self {
        Self { classifier }
    }

    /// Compute missing and novel topics for `content` against a chapter plan
    ///
    /// `plan` is the JSON chapter plan artifact. Given the same
    /// classification, the result is always the same.
    pub async fn analyze(&self, plan: &str, content: &str) -> Result<GapAnalysisResult, GapError> {
        let plan = ChapterPlan::parse(plan).map_err(GapError::InvalidPlan)?;
        debug!(chapter = plan.chapter_number, topics = plan.key_topics.len(), "GapAnalyzer::analyze: called");

        // First spelling in the plan wins for each normalized topic
        let mut planned: BTreeMap<String, &String> = BTreeMap::new();
        for topic in &plan.key_topics {
            let key = normalize_topic(topic);
            if !key.is_empty() {
                planned.entry(key).or_insert(topic);
            }
        }
        let plan_topics: Vec<String> = planned.values().map(|t| t.to_string()).collect();

        let classification = self.classifier.classify(&plan_topics, content).await?;
        let covered = normalized_set(&classification.covered);
        let discussed = normalized_set(&classification.content_topics);

        let missing_topics: BTreeSet<String> = planned
            .iter()
            .filter(|(key, _)| !covered.contains(*key))
            .map(|(_, spelling)| spelling.to_string())
            .collect();
        let novel_topics: BTreeSet<String> = discussed.into_iter().filter(|t| !planned.contains_key(t)).collect();

        info!(
            chapter = plan.chapter_number,
            missing = missing_topics.len(),
            novel = novel_topics.len(),
            "gap analysis complete"
        );
        Ok(GapAnalysisResult {
            missing_topics,
            novel_topics,
        })
    }

    /// Subset of `topics` that `text` covers, in normalized form
    pub async fn check_coverage(&self, topics: &[String], text: &str) -> Result<BTreeSet<String>, GapError> {
        debug!(topics = topics.len(), "GapAnalyzer::check_coverage: called");
        if topics.is_empty() {
            return Ok(BTreeSet::new());
        }
        let wanted = normalized_set(topics);
        let classification = self.classifier.classify(topics, text).await?;
        Ok(normalized_set(&classification.covered)
            .into_iter()
            .filter(|t| wanted.contains(t))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::{Classification, KeywordClassifier};
    use async_trait::async_trait;

    struct Fixed(Classification);

    #[async_trait]
    impl TopicClassifier for Fixed {
        async fn classify(&self, _plan_topics: &[String], _content: &str) -> Result<Classification, GapError> {
            Ok(self.0.clone())
        }
    }

    struct Down;

    #[async_trait]
    impl TopicClassifier for Down {
        async fn classify(&self, _plan_topics: &[String], _content: &str) -> Result<Classification, GapError> {
            Err(GapError::AnalysisUnavailable("503".into()))
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn plan(topics: &[&str]) -> String {
        ChapterPlan {
            chapter_number: 1,
            title: "Growth".into(),
            key_topics: strings(topics),
            learning_outcomes: vec![],
        }
        .to_json()
    }

    #[test]
    fn test_normalize_topic() {
        assert_eq!(normalize_topic("  Customer   Support! "), "customer support");
        assert_eq!(normalize_topic("On-boarding"), "on boarding");
        assert_eq!(normalize_topic("..."), "");
    }

    #[tokio::test]
    async fn test_pricing_onboarding_support_scenario() {
        let analyzer = GapAnalyzer::new(Arc::new(Fixed(Classification {
            covered: strings(&["pricing", "onboarding"]),
            content_topics: strings(&["pricing", "onboarding", "refunds"]),
        })));
        let result = analyzer
            .analyze(&plan(&["pricing", "onboarding", "support"]), "transcript")
            .await
            .unwrap();
        assert_eq!(result.missing_topics, set(&["support"]));
        assert_eq!(result.novel_topics, set(&["refunds"]));
    }

    #[tokio::test]
    async fn test_matching_ignores_case_and_punctuation() {
        let analyzer = GapAnalyzer::new(Arc::new(Fixed(Classification {
            covered: strings(&["PRICING.", "Customer support"]),
            content_topics: strings(&["pricing", "customer-support", "Refunds!"]),
        })));
        let result = analyzer
            .analyze(&plan(&["Pricing", "customer  support"]), "t")
            .await
            .unwrap();
        assert!(result.missing_topics.is_empty());
        assert_eq!(result.novel_topics, set(&["refunds"]));
    }

    #[tokio::test]
    async fn test_missing_topics_keep_plan_spelling() {
        let analyzer = GapAnalyzer::new(Arc::new(Fixed(Classification {
            covered: strings(&["pricing"]),
            content_topics: strings(&["pricing"]),
        })));
        let result = analyzer
            .analyze(&plan(&["Pricing", "Customer Support", "customer support!"]), "t")
            .await
            .unwrap();
        assert_eq!(result.missing_topics, set(&["Customer Support"]));
    }

    #[tokio::test]
    async fn test_analyze_is_idempotent() {
        let analyzer = GapAnalyzer::new(Arc::new(KeywordClassifier));
        let p = plan(&["pricing", "support", "Pricing"]);
        let first = analyzer.analyze(&p, "all about pricing").await.unwrap();
        let second = analyzer.analyze(&p, "all about pricing").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.missing_topics, set(&["support"]));
    }

    #[tokio::test]
    async fn test_full_coverage_is_clear() {
        let analyzer = GapAnalyzer::new(Arc::new(KeywordClassifier));
        let result = analyzer
            .analyze(&plan(&["pricing", "support"]), "pricing and support")
            .await
            .unwrap();
        assert!(result.is_clear());
    }

    #[tokio::test]
    async fn test_outage_is_never_empty_result() {
        let analyzer = GapAnalyzer::new(Arc::new(Down));
        let err = analyzer.analyze(&plan(&["pricing"]), "t").await.unwrap_err();
        assert!(matches!(err, GapError::AnalysisUnavailable(_)));
    }

    #[tokio::test]
    async fn test_invalid_plan() {
        let analyzer = GapAnalyzer::new(Arc::new(KeywordClassifier));
        let err = analyzer.analyze("pricing, support", "t").await.unwrap_err();
        assert!(matches!(err, GapError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn test_check_coverage_filters_to_requested() {
        let analyzer = GapAnalyzer::new(Arc::new(Fixed(Classification {
            covered: strings(&["Support", "pricing"]),
            content_topics: vec![],
        })));
        let covered = analyzer.check_coverage(&strings(&["support"]), "answer").await.unwrap();
        assert_eq!(covered, set(&["support"]));
    }
}
