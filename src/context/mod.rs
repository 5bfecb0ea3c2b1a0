
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Configuration for assembling transcript context under a token budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum estimated tokens of transcript context per chat turn.
    pub token_budget: usize,
    /// Characters per token used by the estimator.
    pub chars_per_token: usize,
    /// Fraction of the budget the greedy selector may fill. The slack
    /// absorbs estimation error when not everything fits anyway.
    pub greedy_headroom: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: 900_000,
            chars_per_token: 4,
            greedy_headroom: 0.9,
        }
    }
}

impl ContextConfig {
    pub fn estimate_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(self.chars_per_token)
    }

    fn greedy_budget(&self) -> usize {
        (self.token_budget as f64 * self.greedy_headroom) as usize
    }
}

/// One candidate document for the context window, typically a full lecture
/// transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextDocument {
    pub identifier: String,
    pub title: String,
    pub text: String,
    /// Recency signal used for greedy selection; for lectures this is the
    /// last transcript-update time.
    pub recency: DateTime<Utc>,
}

/// The context block handed to the generation model.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    /// Identifiers of the documents that made it in, in presentation order.
    pub included: Vec<String>,
    pub estimated_tokens: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }
}

/// Select documents for the context window.
///
/// When everything fits inside the budget, everything is included. When it
/// does not, documents are considered in recency order (newest first) and
/// each is included whole if it fits under the headroom-reduced budget;
/// documents that do not fit are skipped, never truncated, and scanning
/// continues so smaller older documents can still make it in.
pub fn assemble_context(
    documents: &[ContextDocument],
    config: &ContextConfig,
) -> AssembledContext {
    let sizes: Vec<usize> = documents
        .iter()
        .map(|d| config.estimate_tokens(&d.text))
        .collect();
    let total: usize = sizes.iter().sum();

    let selected: Vec<usize> = if total <= config.token_budget {
        (0..documents.len()).collect()
    } else {
        let budget = config.greedy_budget();
        let mut by_recency: Vec<usize> = (0..documents.len()).collect();
        by_recency.sort_by(|&a, &b| documents[b].recency.cmp(&documents[a].recency));

        let mut used = 0;
        let mut picked = Vec::new();
        for index in by_recency {
            if used + sizes[index] <= budget {
                used += sizes[index];
                picked.push(index);
            } else {
                debug!(
                    identifier = %documents[index].identifier,
                    tokens = sizes[index],
                    remaining = budget - used,
                    "document does not fit in context budget, skipping"
                );
            }
        }
        // Present in the caller's original order regardless of pick order.
        picked.sort_unstable();
        picked
    };

    let mut text = String::new();
    let mut included = Vec::with_capacity(selected.len());
    let mut estimated_tokens = 0;
    for &index in &selected {
        let document = &documents[index];
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str("## ");
        text.push_str(&document.title);
        text.push_str("\n\n");
        text.push_str(&document.text);
        included.push(document.identifier.clone());
        estimated_tokens += sizes[index];
    }

    info!(
        candidates = documents.len(),
        included = included.len(),
        estimated_tokens,
        budget = config.token_budget,
        "assembled chat context"
    );

    AssembledContext {
        text,
        included,
        estimated_tokens,
    }
}
