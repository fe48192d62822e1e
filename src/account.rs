//! Session-level token and cost totals.

use serde::Serialize;

use crate::ledger::{Ledger, Role, Speaker};
use crate::pricing::PricingTable;

/// Aggregated counters for a session.
///
/// A `SessionAccount` is always the result of [`SessionAccount::compute`] over
/// the current ledger.  It is never patched incrementally, so it cannot drift
/// from the ledger contents after deletions, clears, or imports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SessionAccount {
    /// Tokens across every user turn in the ledger.
    pub total_input_tokens: u64,
    /// Tokens across every model turn in the ledger.
    pub total_output_tokens: u64,
    /// Tokens of the most recent user turn.
    pub last_input_tokens: u64,
    /// Tokens of the most recent model turn.
    pub last_output_tokens: u64,
    /// Cumulative size of the retained context, system instruction included.
    pub context_total_tokens: u64,
    /// Cost of the most recent user turn under the input schedule.
    pub last_input_cost: f64,
    /// Cost of the most recent model turn under the output schedule.
    pub last_output_cost: f64,
    /// Estimated cost of the session.
    pub session_cost: f64,
}

impl SessionAccount {
    /// Derives the account from the ledger.
    pub fn compute(ledger: &Ledger, pricing: &PricingTable) -> Self {
        let mut total_input_tokens = 0;
        let mut total_output_tokens = 0;
        for message in ledger.turns() {
            match message.role() {
                Role::User => total_input_tokens += message.token_count(),
                Role::Model => total_output_tokens += message.token_count(),
                Role::System => {}
            }
        }
        let context_total_tokens = ledger.context_total_tokens();
        let last_input_tokens = ledger
            .last_of(Speaker::User)
            .map(|m| m.token_count())
            .unwrap_or(0);
        let last_output_tokens = ledger
            .last_of(Speaker::Model)
            .map(|m| m.token_count())
            .unwrap_or(0);
        let session_cost = pricing.input_cost(total_input_tokens, context_total_tokens)
            + pricing.output_cost(total_output_tokens, context_total_tokens);
        Self {
            total_input_tokens,
            total_output_tokens,
            last_input_tokens,
            last_output_tokens,
            context_total_tokens,
            last_input_cost: pricing.input_cost(last_input_tokens, context_total_tokens),
            last_output_cost: pricing.output_cost(last_output_tokens, context_total_tokens),
            session_cost,
        }
    }
}
