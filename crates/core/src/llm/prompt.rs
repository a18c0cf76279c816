use crate::domain::market::{Category, StockSnapshot};
use crate::llm::AnalysisRequest;

pub fn system_prompt() -> String {
    [
        "You are an equity analyst producing one structured judgment per stock.",
        "Return ONLY valid JSON. Do not wrap in markdown. Do not include any extra keys.",
        "No trailing commas. No comments. Use double quotes for all JSON strings.",
        "Output schema:",
        "{",
        "  \"trend_direction\": \"BULLISH\" | \"BEARISH\" | \"SIDEWAYS\",",
        "  \"trend_strength\": 0.0,",
        "  \"risk_score\": 0.0,",
        "  \"recommendation\": \"BUY\" | \"HOLD\" | \"SELL\",",
        "  \"confidence\": 0.0,",
        "  \"price_target_7d\": null,",
        "  \"price_target_30d\": null,",
        "  \"key_factors\": [\"factor\"],",
        "  \"reasoning\": \"2-3 sentences\"",
        "}",
        "Rules:",
        "- trend_strength, risk_score and confidence must be in [0, 1]",
        "- price targets must be positive numbers or null",
        "- key_factors: at most 5 short phrases",
        "- Base the judgment only on the data provided; missing blocks are unknown, not neutral",
    ]
    .join("\n")
}

pub fn user_prompt(req: &AnalysisRequest) -> String {
    let snapshot = &req.snapshot;
    let data = serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Task: Analyze {symbol} as of {date} for a {horizon}.\n\
{guidance}\n\n\
Market data JSON (null blocks were unavailable):\n{data}",
        symbol = snapshot.symbol,
        date = snapshot.date,
        horizon = horizon(snapshot),
        guidance = category_guidance(snapshot.category),
    )
}

pub fn repair_prompt(req: &AnalysisRequest, previous_output: &str) -> String {
    format!(
        "Your previous answer for {symbol} was NOT valid for the schema.\n\n\
TASK: Output ONLY a single JSON object that exactly matches the schema and rules.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- recommendation MUST be one of BUY, HOLD, SELL; trend_direction one of BULLISH, BEARISH, SIDEWAYS.\n\
- trend_strength, risk_score and confidence MUST be numbers in [0, 1].\n\
- reasoning MUST be a non-empty string.\n\n\
{original}\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}",
        symbol = req.snapshot.symbol,
        original = user_prompt(req),
    )
}

fn horizon(snapshot: &StockSnapshot) -> &'static str {
    match snapshot.category {
        Category::Stable => "long-term position of about $200",
        Category::Risky => "short-term speculative position of about $50",
    }
}

fn category_guidance(category: Category) -> &'static str {
    match category {
        Category::Stable => {
            "Weigh valuation, balance-sheet quality and trend persistence; penalize drawdown risk."
        }
        Category::Risky => {
            "Weigh momentum, catalysts and volatility; a BUY needs a clear near-term edge."
        }
    }
}
