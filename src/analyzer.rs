use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::HarnessError;
use crate::extract::json_candidates;
use crate::history::ChatHistory;
use crate::port::ChatCompletionPort;
use crate::prompts::{self, ANALYZER_PROMPT};
use crate::types::ChatMessage;

pub const MAX_SCORE: u8 = 9;

/// The judge's structured verdict on a finished conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictReport {
    pub score: u8,
    pub feedback: String,
}

static VERDICT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["score", "feedback"],
        "properties": {
            "score": { "type": "integer", "minimum": 0, "maximum": MAX_SCORE },
            "feedback": { "type": "string" }
        }
    })
});

// Compiled once; a schema error is reported on every parse
static VERDICT_VALIDATOR: Lazy<Result<JSONSchema, String>> = Lazy::new(|| {
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&VERDICT_SCHEMA)
        .map_err(|error| error.to_string())
});

pub struct ConversationAnalyzer {
    port: Arc<dyn ChatCompletionPort>,
}

impl ConversationAnalyzer {
    pub fn new(port: Arc<dyn ChatCompletionPort>) -> Self {
        Self { port }
    }

    /// Renders the judging prompt for `history` against `criteria`.
    pub fn prompt(history: &ChatHistory, criteria: &[String]) -> Result<String, HarnessError> {
        let criteria = criteria
            .iter()
            .map(|criterion| format!("- {criterion}"))
            .collect::<Vec<_>>()
            .join("\n");
        prompts::render(
            ANALYZER_PROMPT,
            &json!({ "criteria": criteria, "conversation": history.render_transcript() }),
        )
    }

    /// One judge call; the transcript is embedded in a single system message.
    pub async fn analyze(
        &self,
        history: &ChatHistory,
        criteria: &[String],
    ) -> Result<VerdictReport, HarnessError> {
        let prompt = Self::prompt(history, criteria)?;
        debug!(turns = history.len(), criteria = criteria.len(), "analyzing conversation");

        let content = self
            .port
            .complete(&[ChatMessage::system(prompt)], &[])
            .await?
            .into_text();

        let verdict = parse_verdict(&content)?;
        info!(score = verdict.score, "conversation verdict");
        Ok(verdict)
    }
}

pub async fn analyze_conversation(
    port: Arc<dyn ChatCompletionPort>,
    history: &ChatHistory,
    criteria: &[String],
) -> Result<VerdictReport, HarnessError> {
    ConversationAnalyzer::new(port).analyze(history, criteria).await
}

/// Parses judge output, tolerating fences and surrounding prose.
///
/// A score given as a numeric string is accepted. Anything that is not an
/// object with an integer `score` in `0..=9` and a string `feedback` fails
/// with `MalformedVerdict`.
pub fn parse_verdict(content: &str) -> Result<VerdictReport, HarnessError> {
    let schema = VERDICT_VALIDATOR
        .as_ref()
        .map_err(|error| HarnessError::MalformedVerdict(format!("verdict schema: {error}")))?;

    let mut last_problem = String::from("no JSON object found");
    for candidate in json_candidates(content) {
        let Ok(mut value) = serde_json::from_str::<Value>(&candidate) else {
            continue;
        };
        normalize_score(&mut value);

        if let Err(errors) = schema.validate(&value) {
            last_problem = errors
                .map(|error| error.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            continue;
        }

        return verdict_from(&value)
            .ok_or_else(|| HarnessError::MalformedVerdict(format!("unusable verdict: {value}")));
    }

    Err(HarnessError::MalformedVerdict(last_problem))
}

fn normalize_score(value: &mut Value) {
    if let Some(score) = value.get_mut("score") {
        if let Some(parsed) = score.as_str().and_then(|text| text.trim().parse::<i64>().ok()) {
            *score = Value::from(parsed);
        }
    }
}

fn verdict_from(value: &Value) -> Option<VerdictReport> {
    let score = match &value["score"] {
        Value::Number(number) => match number.as_u64() {
            Some(score) => score,
            None => {
                let float = number.as_f64()?;
                if float.fract() != 0.0 || float < 0.0 {
                    return None;
                }
                float as u64
            }
        },
        _ => return None,
    };
    let score = u8::try_from(score).ok().filter(|score| *score <= MAX_SCORE)?;
    let feedback = value["feedback"].as_str()?.to_string();
    Some(VerdictReport { score, feedback })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{ModelSettings, NativeToolCallingPort};
    use crate::providers::scripted::ScriptedProvider;
    use crate::types::MessageRole;

    #[test]
    fn parses_plain_json() {
        let verdict = parse_verdict(r#"{"score": 8, "feedback": "Polite and correct."}"#)
            .expect("verdict");
        assert_eq!(verdict.score, 8);
        assert_eq!(verdict.feedback, "Polite and correct.");
    }

    #[test]
    fn recovers_from_fences_and_prose() {
        let content = "Here is my analysis:\n```json\n{\"score\": 3, \"feedback\": \"Never asked for the name.\"}\n```\nHope it helps!";
        assert_eq!(parse_verdict(content).expect("verdict").score, 3);

        let trailing = r#"{"score": "6", "feedback": "ok"} -- end of analysis"#;
        assert_eq!(parse_verdict(trailing).expect("verdict").score, 6);
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        for content in [
            r#"{"score": 10, "feedback": "great"}"#,
            r#"{"score": -1, "feedback": "bad"}"#,
            r#"{"score": 4.5, "feedback": "meh"}"#,
        ] {
            assert!(matches!(
                parse_verdict(content),
                Err(HarnessError::MalformedVerdict(_))
            ));
        }
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(parse_verdict(r#"{"score": 5}"#).is_err());
        assert!(parse_verdict(r#"{"feedback": "no score"}"#).is_err());
        assert!(parse_verdict("The assistant did fine, 7/9.").is_err());
    }

    #[test]
    fn validator_is_compiled_once_and_reused() {
        let first = VERDICT_VALIDATOR.as_ref().expect("schema compiles");
        for score in 0..=MAX_SCORE {
            let content = format!(r#"{{"score": {score}, "feedback": "ok"}}"#);
            assert_eq!(parse_verdict(&content).expect("verdict").score, score);
        }
        let again = VERDICT_VALIDATOR.as_ref().expect("schema compiles");
        assert!(std::ptr::eq(first, again));
        assert!(!first.is_valid(&json!({"score": 10, "feedback": "ok"})));
    }

    #[test]
    fn integral_float_score_is_accepted() {
        assert_eq!(
            parse_verdict(r#"{"score": 7.0, "feedback": "fine"}"#).expect("verdict").score,
            7
        );
    }

    #[tokio::test]
    async fn judge_sees_transcript_as_a_single_system_message() {
        let provider = Arc::new(ScriptedProvider::from_texts([
            r#"{"score": 2, "feedback": "The assistant never asked for the guest name."}"#,
        ]));
        let port = Arc::new(NativeToolCallingPort::new(provider.clone(), ModelSettings::new("gpt-4")));

        let mut history = ChatHistory::new();
        history.push_user("Book the Kensington Hotel");
        history.push_assistant("Done, your room is booked.");

        let criteria = vec!["ask for guest name before reservation".to_string()];
        let verdict = analyze_conversation(port, &history, &criteria)
            .await
            .expect("verdict");
        assert!(verdict.score <= 5);
        assert!(verdict.feedback.contains("guest name"));

        let request = &provider.requests()[0];
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, MessageRole::System);
        let prompt = request.messages[0].text().unwrap_or_default();
        assert!(prompt.contains("- ask for guest name before reservation"));
        assert!(prompt.contains("USER: Book the Kensington Hotel"));
        assert!(request.tools.is_empty());
    }
}
