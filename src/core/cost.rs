// src/core/cost.rs — Pricing table and cost estimation

use crate::provider::TokenUsage;

/// Estimate the token count of a piece of text (≈ 4 chars per token).
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as f32 / 4.0).ceil() as u32
}

/// Calculate cost in USD for a given model and token usage.
pub fn calculate_cost(model: &str, usage: &TokenUsage) -> f64 {
    let (input_price, output_price) = model_pricing(model);
    let input_cost = (usage.input_tokens as f64 / 1_000_000.0) * input_price;
    let output_cost = (usage.output_tokens as f64 / 1_000_000.0) * output_price;

    // Cached tokens are cheaper (Anthropic)
    let cache_read_cost = (usage.cache_read_tokens as f64 / 1_000_000.0) * (input_price * 0.1);
    let cache_write_cost = (usage.cache_write_tokens as f64 / 1_000_000.0) * (input_price * 1.25);

    input_cost + output_cost + cache_read_cost + cache_write_cost
}

/// Cost of a call that has not happened yet, from token estimates.
pub fn estimate_cost(model: &str, est_input_tokens: u32, est_output_tokens: u32) -> f64 {
    calculate_cost(model, &TokenUsage::new(est_input_tokens, est_output_tokens))
}

/// Returns (input_price_per_mtok, output_price_per_mtok).
pub fn model_pricing(model: &str) -> (f64, f64) {
    match model {
        // Anthropic
        m if m.contains("claude-opus") => (15.0, 75.0),
        m if m.contains("claude-sonnet") => (3.0, 15.0),
        m if m.contains("claude-haiku") || m.contains("haiku") => (0.8, 4.0),

        // OpenAI
        m if m.contains("gpt-4.1-mini") => (0.4, 1.6),
        m if m.contains("gpt-4.1") => (2.0, 8.0),
        m if m.contains("gpt-4o-mini") => (0.15, 0.6),
        m if m.contains("gpt-4o") => (2.5, 10.0),
        m if m.contains("o3-mini") => (1.1, 4.4),
        m if m.contains("o3") && !m.contains("o3-mini") => (10.0, 40.0),
        m if m.contains("o4-mini") => (1.1, 4.4),

        // Google Gemini
        m if m.contains("gemini-2.5-pro") => (1.25, 10.0),
        m if m.contains("gemini-2.5-flash") => (0.15, 0.6),
        m if m.contains("gemini-2.0-flash") => (0.1, 0.4),

        // Local models (free)
        m if m.contains("llama")
            || m.contains("mistral")
            || m.contains("gemma")
            || m.contains("qwen")
            || m.contains("deepseek") =>
        {
            (0.0, 0.0)
        }

        // Default: assume moderate pricing
        _ => (1.0, 3.0),
    }
}
