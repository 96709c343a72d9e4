use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarnessError;
use crate::hotel::{default_hotels, Hotel, Reservation};
use crate::runner::{StopCondition, DEFAULT_MAX_ITERATIONS};
use crate::user::DEFAULT_STOP_PHRASE;

/// A persona-driven conversation plus what it should achieve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationScenario {
    pub name: String,
    pub persona: String,
    #[serde(default)]
    pub seed: Option<String>,
    #[serde(default)]
    pub today: Option<NaiveDate>,
    #[serde(default = "default_hotels")]
    pub hotels: Vec<Hotel>,
    #[serde(default)]
    pub stop: StopSpec,
    #[serde(default)]
    pub criteria: Vec<String>,
    #[serde(default)]
    pub minimum_score: Option<u8>,
    #[serde(default)]
    pub maximum_score: Option<u8>,
    #[serde(default)]
    pub expect: ExpectedOutcome,
    #[serde(default)]
    pub scripted: Option<ScriptedRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSpec {
    #[serde(default = "default_stop_phrase")]
    pub phrase: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl StopSpec {
    pub fn condition(&self) -> StopCondition {
        if self.phrase.is_empty() {
            StopCondition::max_iterations(self.max_iterations)
        } else {
            StopCondition::default_for(self.phrase.clone(), self.max_iterations)
        }
    }
}

impl Default for StopSpec {
    fn default() -> Self {
        Self {
            phrase: default_stop_phrase(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_stop_phrase() -> String {
    DEFAULT_STOP_PHRASE.to_string()
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    /// `FindHotels` must be called exactly once with this location.
    #[serde(default)]
    pub find_hotels: Option<String>,
    /// `MakeReservation` must be called exactly once with these details.
    #[serde(default)]
    pub reservation: Option<Reservation>,
    #[serde(default)]
    pub no_reservation: bool,
}

/// Canned model output for an offline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedRun {
    #[serde(default = "default_function_calling")]
    pub function_calling: bool,
    #[serde(default)]
    pub user: Vec<String>,
    #[serde(default)]
    pub assistant: Vec<ScriptedTurn>,
    #[serde(default)]
    pub analyzer: Vec<String>,
}

fn default_function_calling() -> bool {
    true
}

/// One scripted assistant reply: plain text or a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptedTurn {
    ToolCall { tool: String, arguments: Value },
    Text(String),
}

impl ConversationScenario {
    pub fn from_yaml_str(input: &str) -> Result<Self, HarnessError> {
        Ok(serde_yaml::from_str(input)?)
    }
}

/// Loads one scenario file, or every `.yaml`/`.yml`/`.json` file of a
/// directory in file-name order.
pub fn load_scenarios(path: impl AsRef<Path>) -> Result<Vec<ConversationScenario>, HarnessError> {
    let path = path.as_ref();
    if !path.is_dir() {
        let content = fs::read_to_string(path)?;
        return Ok(vec![ConversationScenario::from_yaml_str(&content)?]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let file = entry?.path();
        let is_scenario = matches!(
            file.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml" | "json")
        );
        if is_scenario {
            files.push(file);
        }
    }
    files.sort();

    files
        .iter()
        .map(|file| {
            let content = fs::read_to_string(file)?;
            ConversationScenario::from_yaml_str(&content)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_scenario_uses_defaults() {
        let scenario = ConversationScenario::from_yaml_str(
            "name: minimal\npersona: I want a room in Paris.\n",
        )
        .expect("scenario");

        assert_eq!(scenario.stop.phrase, "bye");
        assert_eq!(scenario.stop.max_iterations, 10);
        assert_eq!(scenario.hotels, default_hotels());
        assert!(scenario.scripted.is_none());
        assert!(!scenario.expect.no_reservation);
    }

    #[test]
    fn scripted_turns_and_expectations_parse() {
        let yaml = r#"
name: london
persona: John Smith
today: 2024-02-01
expect:
  find_hotels: London
  reservation:
    hotel_name: Kensington Hotel
    guest_name: John Smith
    checkin_date: 2024-02-09
    checkout_date: 2024-02-11
    guests: 3
scripted:
  user: ["Hi"]
  assistant:
    - Which city?
    - tool: FindHotels
      arguments: { location: London }
"#;
        let scenario = ConversationScenario::from_yaml_str(yaml).expect("scenario");
        assert_eq!(scenario.today, NaiveDate::from_ymd_opt(2024, 2, 1));

        let reservation = scenario.expect.reservation.expect("reservation");
        assert_eq!(reservation.guests, 3);
        assert_eq!(reservation.checkin_date, NaiveDate::from_ymd_opt(2024, 2, 9).expect("date"));

        let scripted = scenario.scripted.expect("scripted");
        assert!(scripted.function_calling);
        assert_eq!(scripted.assistant[0], ScriptedTurn::Text("Which city?".into()));
        assert!(matches!(
            &scripted.assistant[1],
            ScriptedTurn::ToolCall { tool, arguments } if tool == "FindHotels" && arguments["location"] == "London"
        ));
    }
}
