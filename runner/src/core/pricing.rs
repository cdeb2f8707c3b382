//! Per-model token prices used for cost ceilings.

use crate::core::types::TokenUsage;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub input: f64,
    pub output: f64,
}

const OPUS: Rates = Rates {
    input: 15.0,
    output: 75.0,
};
const SONNET: Rates = Rates {
    input: 3.0,
    output: 15.0,
};
const HAIKU: Rates = Rates {
    input: 0.25,
    output: 1.25,
};

const PRICE_TABLE: &[(&str, Rates)] = &[
    ("claude-opus-4-5-20251101", OPUS),
    ("claude-sonnet-4-5-20250929", SONNET),
    ("claude-haiku-4-5-20251001", HAIKU),
    ("claude-opus-4-6", OPUS),
    ("claude-sonnet-4-6", SONNET),
];

/// Rates for unrecognized model ids. Always the most expensive tier.
pub const FALLBACK_RATES: Rates = OPUS;

/// Look up rates for `model_id`, falling back to [`FALLBACK_RATES`].
pub fn rates_for(model_id: &str) -> Rates {
    PRICE_TABLE
        .iter()
        .find(|(id, _)| *id == model_id)
        .map(|(_, rates)| *rates)
        .unwrap_or(FALLBACK_RATES)
}

/// Estimated cost of one turn.
pub fn turn_cost_usd(rates: Rates, usage: TokenUsage) -> f64 {
    usage.input_tokens as f64 * rates.input / 1_000_000.0
        + usage.output_tokens as f64 * rates.output / 1_000_000.0
}
