//! Tiered token pricing.
//!
//! A [`TierRate`] is a two-rate schedule in USD per million tokens.  Which rate
//! applies is decided by the size of the whole retained context, not by the
//! number of tokens being priced; [`cost`] is the one function that encodes
//! that rule.

use serde::{Deserialize, Serialize};

/// Context size (in tokens) at or below which the low rate applies.
pub const DEFAULT_THRESHOLD_TOKENS: u64 = 128_000;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// A two-tier rate schedule for one flow (input or output).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierRate {
    /// USD per million tokens while the context is at or below the threshold.
    pub low_rate: f64,
    /// USD per million tokens once the context exceeds the threshold.
    pub high_rate: f64,
    /// Context size that separates the two tiers.
    #[serde(default = "default_threshold")]
    pub threshold_tokens: u64,
}

fn default_threshold() -> u64 {
    DEFAULT_THRESHOLD_TOKENS
}

impl TierRate {
    /// Creates a schedule with the default 128k threshold.
    pub const fn new(low_rate: f64, high_rate: f64) -> Self {
        Self {
            low_rate,
            high_rate,
            threshold_tokens: DEFAULT_THRESHOLD_TOKENS,
        }
    }

    /// Overrides the tier threshold.
    pub const fn with_threshold(mut self, threshold_tokens: u64) -> Self {
        self.threshold_tokens = threshold_tokens;
        self
    }

    /// Returns the rate that applies to a context of the given size.
    pub fn rate_for(&self, context_total_tokens: u64) -> f64 {
        if context_total_tokens <= self.threshold_tokens {
            self.low_rate
        } else {
            self.high_rate
        }
    }
}

/// Input and output schedules for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    /// Model the schedule was published for.
    pub model: String,
    /// Date the schedule was published, as `YYYY-MM-DD`.
    #[serde(default)]
    pub date: Option<String>,
    /// Rates for prompt tokens.
    pub input: TierRate,
    /// Rates for generated tokens.
    pub output: TierRate,
}

const PRICING_DATE: &str = "2024-07-15";

const PRO_INPUT: TierRate = TierRate::new(3.50, 7.00);
const PRO_OUTPUT: TierRate = TierRate::new(10.50, 21.00);
const FLASH_INPUT: TierRate = TierRate::new(0.35, 0.70);
const FLASH_OUTPUT: TierRate = TierRate::new(1.05, 2.10);

impl PricingTable {
    /// Creates a table from explicit schedules.
    pub fn new(model: impl Into<String>, input: TierRate, output: TierRate) -> Self {
        Self {
            model: model.into(),
            date: None,
            input,
            output,
        }
    }

    /// Gemini 1.5 Pro pricing.
    pub fn gemini_15_pro() -> Self {
        Self {
            model: "gemini-1.5-pro-latest".to_string(),
            date: Some(PRICING_DATE.to_string()),
            input: PRO_INPUT,
            output: PRO_OUTPUT,
        }
    }

    /// Gemini 1.5 Flash pricing.
    pub fn gemini_15_flash() -> Self {
        Self {
            model: "gemini-1.5-flash-latest".to_string(),
            date: Some(PRICING_DATE.to_string()),
            input: FLASH_INPUT,
            output: FLASH_OUTPUT,
        }
    }

    /// Returns the built-in schedule for a model, if one is known.
    pub fn preset(model: &str) -> Option<Self> {
        match model {
            "gemini-1.5-pro-latest" | "gemini-1.5-pro-exp-0801" => {
                let mut table = Self::gemini_15_pro();
                table.model = model.to_string();
                Some(table)
            }
            "gemini-1.5-flash-latest" => Some(Self::gemini_15_flash()),
            _ => None,
        }
    }

    /// Returns the built-in schedule for a model, or the Pro schedule relabeled
    /// for the model when none is known.
    pub fn for_model(model: &str) -> Self {
        Self::preset(model).unwrap_or_else(|| {
            let mut table = Self::gemini_15_pro();
            table.model = model.to_string();
            table
        })
    }

    /// Cost of `tokens` prompt tokens under a context of the given size.
    pub fn input_cost(&self, tokens: u64, context_total_tokens: u64) -> f64 {
        cost(tokens, &self.input, context_total_tokens)
    }

    /// Cost of `tokens` generated tokens under a context of the given size.
    pub fn output_cost(&self, tokens: u64, context_total_tokens: u64) -> f64 {
        cost(tokens, &self.output, context_total_tokens)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::gemini_15_pro()
    }
}

/// Computes the monetary cost of `tokens` under `pricing`.
///
/// The tier is chosen by `context_total_tokens`; `tokens` is only the
/// multiplicand.  For a session total the two coincide.  For the cost of
/// retaining a single message, `tokens` is that message's count while the tier
/// follows the whole ledger.
pub fn cost(tokens: u64, pricing: &TierRate, context_total_tokens: u64) -> f64 {
    tokens as f64 / TOKENS_PER_MILLION * pricing.rate_for(context_total_tokens)
}
