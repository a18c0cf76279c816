use crate::domain::analysis::AnalysisResult;
use crate::domain::contract::LlmAnalysis;
use crate::domain::market::StockSnapshot;
use anyhow::Context;

/// Parses a provider's free-text reply into a validated analysis. The reply may
/// wrap the object in a Markdown fence or surround it with prose.
pub fn parse_analysis(
    text: &str,
    snapshot: &StockSnapshot,
    provider: &str,
) -> anyhow::Result<AnalysisResult> {
    let parsed = serde_json::from_str::<LlmAnalysis>(analysis_payload(text))
        .context("LLM output does not match the analysis schema")?;
    parsed.validate_and_into_result(snapshot, provider)
}

/// The object most likely to be the analysis: inside the first fence if there is
/// one, preferring an object with a `recommendation` key. Falls back to the
/// trimmed text so the parse error shows what came back.
fn analysis_payload(text: &str) -> &str {
    let region = fenced_block(text).unwrap_or(text);
    let objects = top_level_objects(region);
    objects
        .iter()
        .find(|o| o.contains("\"recommendation\""))
        .or(objects.first())
        .copied()
        .unwrap_or_else(|| region.trim())
}

/// Body of the first ``` fence, without its language tag line. An unclosed
/// fence runs to the end of the text.
fn fenced_block(text: &str) -> Option<&str> {
    let (_, after) = text.split_once("```")?;
    let body = after.split_once('\n').map_or(after, |(_, rest)| rest);
    let body = body.split_once("```").map_or(body, |(inner, _)| inner);
    Some(body.trim())
}

/// Balanced `{...}` spans at nesting depth zero. Braces inside JSON strings do
/// not count; an unbalanced tail is dropped.
fn top_level_objects(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    out.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analysis::Recommendation;
    use crate::fixtures::snapshot;
    use crate::domain::market::Category;
    use serde_json::json;

    fn valid_analysis_json() -> String {
        json!({
            "trend_direction": "BULLISH",
            "trend_strength": 0.7,
            "risk_score": 0.3,
            "recommendation": "BUY",
            "confidence": 0.82,
            "price_target_7d": 215.0,
            "price_target_30d": 225.0,
            "key_factors": ["Services growth", "Buybacks"],
            "reasoning": "Uptrend above all moving averages."
        })
        .to_string()
    }

    #[test]
    fn payload_is_taken_from_a_fence_after_prose() {
        let text = "Sure, here is the analysis:\n```json\n{\"recommendation\":\"BUY\"}\n```\nLet me know.";
        assert_eq!(analysis_payload(text), "{\"recommendation\":\"BUY\"}");
    }

    #[test]
    fn payload_prefers_the_object_with_a_recommendation() {
        let text = "Input was {\"symbol\":\"AAPL\"}. Result: {\"recommendation\":\"HOLD\",\"key_factors\":[{\"a\":1}]}";
        assert_eq!(
            analysis_payload(text),
            "{\"recommendation\":\"HOLD\",\"key_factors\":[{\"a\":1}]}"
        );
    }

    #[test]
    fn payload_ignores_braces_inside_strings() {
        let text = "{\"reasoning\":\"range } then {\\\"breakout\\\"\",\"recommendation\":\"SELL\"} trailing";
        assert_eq!(
            analysis_payload(text),
            "{\"reasoning\":\"range } then {\\\"breakout\\\"\",\"recommendation\":\"SELL\"}"
        );
    }

    #[test]
    fn payload_without_an_object_is_the_trimmed_text() {
        assert_eq!(analysis_payload("  no json here \n"), "no json here");
    }

    #[test]
    fn parse_analysis_accepts_prose_wrapped_json() {
        let snap = snapshot("AAPL", Category::Stable, 210.0);
        let text = format!("My view on AAPL {{short}}: {} Thanks.", valid_analysis_json());
        let r = parse_analysis(&text, &snap, "openai").unwrap();
        assert_eq!(r.confidence, 0.82);
    }

    #[test]
    fn parse_analysis_accepts_valid_json() {
        let snap = snapshot("AAPL", Category::Stable, 210.0);
        let r = parse_analysis(&format!("```json\n{}\n```", valid_analysis_json()), &snap, "anthropic")
            .unwrap();
        assert_eq!(r.recommendation, Recommendation::Buy);
        assert_eq!(r.symbol, "AAPL");
        assert_eq!(r.category, Category::Stable);
        assert_eq!(r.provider, "anthropic");
    }

    #[test]
    fn parse_analysis_rejects_missing_required_keys() {
        let snap = snapshot("AAPL", Category::Stable, 210.0);
        let json = json!({"recommendation": "BUY", "confidence": 0.9}).to_string();
        assert!(parse_analysis(&json, &snap, "anthropic").is_err());
    }

    #[test]
    fn parse_analysis_rejects_truncated_output() {
        let snap = snapshot("AAPL", Category::Stable, 210.0);
        let full = valid_analysis_json();
        assert!(parse_analysis(&full[..full.len() / 2], &snap, "openai").is_err());
    }
}
