//! Token counting, pre-flight cost estimates and post-hoc usage tracking.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

use super::synthesizer::{entity_header, PROMPT_TEMPLATE};
use crate::analyzers::Dossier;
use crate::config::ModelConfig;
use crate::graph::Entity;
use crate::llm::Completion;

/// Conservative per-entity estimate of synthesized output tokens.
pub const ESTIMATED_OUTPUT_TOKENS_PER_ENTITY: u64 = 120;

/// Counts tokens with `cl100k_base`, or with a chars/4 heuristic when the
/// encoding cannot be loaded.
pub struct TokenCounter {
    bpe: Option<CoreBPE>,
}

impl TokenCounter {
    pub fn new() -> Self {
        match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Self { bpe: Some(bpe) },
            Err(e) => {
                log::warn!("Tokenizer unavailable ({}); estimating tokens from characters", e);
                Self::heuristic()
            }
        }
    }

    /// Character-count heuristic only.
    pub fn heuristic() -> Self {
        Self { bpe: None }
    }

    pub fn count(&self, text: &str) -> u64 {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
            None => (text.chars().count() as u64).div_ceil(4),
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// USD prices per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Pricing {
    pub fn from_model(config: &ModelConfig) -> Self {
        Self {
            input_per_mtok: config.price_input_usd_per_mtok,
            output_per_mtok: config.price_output_usd_per_mtok,
        }
    }

    pub fn input_cost(&self, tokens: u64) -> f64 {
        tokens as f64 * self.input_per_mtok / 1_000_000.0
    }

    pub fn output_cost(&self, tokens: u64) -> f64 {
        tokens as f64 * self.output_per_mtok / 1_000_000.0
    }
}

/// Pre-flight estimate for an enrichment run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentCostReport {
    pub model: String,
    pub entity_count: usize,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
    pub estimated_total_tokens: u64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
}

impl fmt::Display for EnrichmentCostReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Enrichment Cost Estimate ---")?;
        writeln!(f, "Model:             {}", self.model)?;
        writeln!(f, "Entities:          {}", self.entity_count)?;
        writeln!(f, "Input tokens:      {}", self.estimated_input_tokens)?;
        writeln!(f, "Output tokens:     {}", self.estimated_output_tokens)?;
        writeln!(f, "Total tokens:      {}", self.estimated_total_tokens)?;
        writeln!(f, "Input cost:        ${:.4}", self.input_cost_usd)?;
        writeln!(f, "Output cost:       ${:.4}", self.output_cost_usd)?;
        write!(f, "ESTIMATED TOTAL:   ${:.2}", self.total_cost_usd)
    }
}

/// Estimates synthesis cost from the prompt template plus each entity's evidence.
pub struct CostEstimator {
    model: String,
    pricing: Pricing,
    counter: Arc<TokenCounter>,
    template_tokens: u64,
}

impl CostEstimator {
    pub fn new(model: &str, pricing: Pricing, counter: Arc<TokenCounter>) -> Self {
        let template_tokens = counter.count(PROMPT_TEMPLATE);
        Self {
            model: model.to_string(),
            pricing,
            counter,
            template_tokens,
        }
    }

    /// Input tokens for one entity's synthesis prompt.
    pub fn input_tokens(&self, entity: &Entity, dossier: &Dossier) -> u64 {
        self.template_tokens + self.counter.count(&entity_header(entity)) + self.counter.count(&dossier.render())
    }

    pub fn estimate<'a, I>(&self, items: I) -> EnrichmentCostReport
    where
        I: IntoIterator<Item = (&'a Entity, &'a Dossier)>,
    {
        let mut entity_count = 0;
        let mut input_tokens = 0;
        for (entity, dossier) in items {
            entity_count += 1;
            input_tokens += self.input_tokens(entity, dossier);
        }
        let output_tokens = entity_count as u64 * ESTIMATED_OUTPUT_TOKENS_PER_ENTITY;

        let input_cost_usd = self.pricing.input_cost(input_tokens);
        let output_cost_usd = self.pricing.output_cost(output_tokens);
        EnrichmentCostReport {
            model: self.model.clone(),
            entity_count,
            estimated_input_tokens: input_tokens,
            estimated_output_tokens: output_tokens,
            estimated_total_tokens: input_tokens + output_tokens,
            input_cost_usd,
            output_cost_usd,
            total_cost_usd: input_cost_usd + output_cost_usd,
        }
    }
}

/// Actual cost of the relation-verification phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationCostReport {
    pub model: String,
    pub verification_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
}

impl fmt::Display for RelationCostReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.verification_calls == 0 {
            return write!(f, "Relation Cost Report: no verification calls were made.");
        }
        writeln!(f, "--- Implicit Relation Cost Report ---")?;
        writeln!(f, "Model:              {}", self.model)?;
        writeln!(f, "Verification calls: {}", self.verification_calls)?;
        writeln!(f, "Input tokens:       {}", self.input_tokens)?;
        writeln!(f, "Output tokens:      {}", self.output_tokens)?;
        write!(f, "TOTAL COST:         ${:.4}", self.total_cost_usd)
    }
}

/// Accumulates verification usage; safe to share across concurrent tasks.
pub struct RelationCostTracker {
    model: String,
    pricing: Pricing,
    counter: Arc<TokenCounter>,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    calls: AtomicU64,
}

impl RelationCostTracker {
    pub fn new(model: &str, pricing: Pricing, counter: Arc<TokenCounter>) -> Self {
        Self {
            model: model.to_string(),
            pricing,
            counter,
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        }
    }

    pub fn track_call(&self, prompt_tokens: u64, completion_tokens: u64) {
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion_tokens, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one call, counting tokens locally when the provider reported no usage.
    pub fn track_completion(&self, prompt: &str, completion: &Completion) {
        match completion.usage {
            Some(usage) => self.track_call(usage.prompt_tokens, usage.completion_tokens),
            None => self.track_call(self.counter.count(prompt), self.counter.count(&completion.text)),
        }
    }

    /// Zero all counters before a new discovery run.
    pub fn reset(&self) {
        self.prompt_tokens.store(0, Ordering::Relaxed);
        self.completion_tokens.store(0, Ordering::Relaxed);
        self.calls.store(0, Ordering::Relaxed);
    }

    pub fn total_cost(&self) -> f64 {
        self.pricing.input_cost(self.prompt_tokens.load(Ordering::Relaxed))
            + self.pricing.output_cost(self.completion_tokens.load(Ordering::Relaxed))
    }

    pub fn report(&self) -> RelationCostReport {
        RelationCostReport {
            model: self.model.clone(),
            verification_calls: self.calls.load(Ordering::Relaxed),
            input_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            output_tokens: self.completion_tokens.load(Ordering::Relaxed),
            total_cost_usd: self.total_cost(),
        }
    }
}
