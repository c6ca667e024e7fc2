//! Past issues similar to the one being triaged.
//!
//! History is evidence about the fix, not the location, so it is reported
//! next to the ranked code and never folded into code scores.
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedder::hashing::words;
use crate::retry::ExternalError;

const MAX_LABELS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarIssue {
    pub issue_id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default)]
    pub similarity_score: f64,
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("issue history unavailable: {0}")]
    Unavailable(String),

    #[error("issue history timed out after {0:?}")]
    Timeout(Duration),
}

impl ExternalError for HistoryError {
    fn is_transient(&self) -> bool {
        true
    }

    fn timed_out(after: Duration) -> Self {
        HistoryError::Timeout(after)
    }

    fn interrupted(message: String) -> Self {
        HistoryError::Unavailable(message)
    }
}

/// Source of past issues with known resolutions. Blocking, like the other
/// collaborators.
pub trait IssueHistory: Send + Sync {
    fn similar_issues(
        &self,
        query: &str,
        repo_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SimilarIssue>, HistoryError>;
}

/// In-memory history scored by word overlap (Jaccard) with the query.
#[derive(Debug, Clone, Default)]
pub struct StaticIssueHistory {
    issues: Vec<SimilarIssue>,
}

impl StaticIssueHistory {
    pub fn new(issues: Vec<SimilarIssue>) -> Self {
        Self { issues }
    }

    /// Load a JSON array of issues.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(data)?))
    }
}

fn word_set(text: &str) -> HashSet<String> {
    words(text).into_iter().filter(|w| w.len() > 2).collect()
}

impl IssueHistory for StaticIssueHistory {
    fn similar_issues(
        &self,
        query: &str,
        repo_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SimilarIssue>, HistoryError> {
        let query_words = word_set(query);
        if query_words.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<SimilarIssue> = self
            .issues
            .iter()
            .filter(|issue| match (repo_id, issue.repo_id.as_deref()) {
                (Some(wanted), Some(repo)) => wanted == repo,
                _ => true,
            })
            .filter_map(|issue| {
                let issue_words = word_set(&format!("{} {}", issue.title, issue.body));
                let shared = query_words.intersection(&issue_words).count();
                if shared == 0 {
                    return None;
                }
                let union = query_words.union(&issue_words).count();
                let mut hit = issue.clone();
                hit.similarity_score = shared as f64 / union as f64;
                Some(hit)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity_score
                .total_cmp(&a.similarity_score)
                .then_with(|| a.issue_id.cmp(&b.issue_id))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Frequencies across the similar issues, most common first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IssuePatterns {
    pub common_labels: Vec<(String, usize)>,
    pub resolution_states: Vec<(String, usize)>,
    pub common_assignees: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalContext {
    pub similar_issues: Vec<SimilarIssue>,
    pub patterns: IssuePatterns,
}

fn ranked(counts: HashMap<String, usize>) -> Vec<(String, usize)> {
    let mut items: Vec<(String, usize)> = counts.into_iter().collect();
    items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    items
}

/// `None` when there are no similar issues.
pub fn summarize(issues: Vec<SimilarIssue>) -> Option<HistoricalContext> {
    if issues.is_empty() {
        return None;
    }

    let mut labels = HashMap::new();
    let mut states = HashMap::new();
    let mut assignees = HashMap::new();
    for issue in &issues {
        for label in &issue.labels {
            *labels.entry(label.clone()).or_insert(0) += 1;
        }
        let state = issue.state.clone().unwrap_or_else(|| "unknown".to_string());
        *states.entry(state).or_insert(0) += 1;
        if let Some(assignee) = &issue.assignee {
            *assignees.entry(assignee.clone()).or_insert(0) += 1;
        }
    }

    let mut common_labels = ranked(labels);
    common_labels.truncate(MAX_LABELS);
    Some(HistoricalContext {
        similar_issues: issues,
        patterns: IssuePatterns {
            common_labels,
            resolution_states: ranked(states),
            common_assignees: ranked(assignees),
        },
    })
}

fn names(items: &[(String, usize)]) -> String {
    items
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Markdown section listing the issues and their shared patterns.
pub fn format_history(context: &HistoricalContext, limit: usize) -> String {
    let mut lines = vec![
        "## Historical Context from Similar Issues".to_string(),
        String::new(),
    ];

    for (i, issue) in context.similar_issues.iter().take(limit).enumerate() {
        lines.push(format!(
            "{}. **{}** (Score: {:.2})",
            i + 1,
            issue.issue_id,
            issue.similarity_score
        ));
        lines.push(format!("   Title: {}", issue.title));
        if let Some(state) = &issue.state {
            lines.push(format!("   State: {state}"));
        }
        lines.push(String::new());
    }

    if !context.patterns.common_labels.is_empty() {
        lines.push(format!("**Common Labels:** {}", names(&context.patterns.common_labels)));
    }
    if !context.patterns.common_assignees.is_empty() {
        lines.push(format!(
            "**Typical Assignees:** {}",
            names(&context.patterns.common_assignees)
        ));
    }

    lines.join("\n")
}
