use std::sync::Arc;

use tracing::{info, warn};

use crate::analyzer::{ConversationAnalyzer, VerdictReport};
use crate::assistant::HotelReservationsAssistant;
use crate::config::{HarnessConfig, LlmConfig, Role};
use crate::error::HarnessError;
use crate::eval::report::{CaseReport, EvalReport};
use crate::eval::scenario::{ConversationScenario, ScriptedRun};
use crate::hotel::{BackendCalls, InMemoryHotelBackend};
use crate::port::{connect, port_for, ChatCompletionPort};
use crate::providers::scripted::ScriptedProvider;
use crate::runner::{ConversationEvent, ConversationRunner, ConversationState};
use crate::user::LlmUser;

type ScenarioCallback = Arc<dyn Fn(&str, &ConversationEvent) + Send + Sync>;

enum Backends {
    Scripted,
    Live(HarnessConfig),
}

struct Ports {
    user: Arc<dyn ChatCompletionPort>,
    assistant: Arc<dyn ChatCompletionPort>,
    analyzer: Arc<dyn ChatCompletionPort>,
}

/// Everything a finished scenario produced.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub state: ConversationState,
    pub calls: BackendCalls,
    pub verdict: Option<VerdictReport>,
}

pub struct ScenarioRunner {
    backends: Backends,
    event_callback: Option<ScenarioCallback>,
}

impl ScenarioRunner {
    /// Replays each scenario's `scripted` section; no network access.
    pub fn scripted() -> Self {
        Self {
            backends: Backends::Scripted,
            event_callback: None,
        }
    }

    /// Talks to the back-ends configured per role.
    pub fn live(config: HarnessConfig) -> Self {
        Self {
            backends: Backends::Live(config),
            event_callback: None,
        }
    }

    pub fn with_event_callback(
        mut self,
        callback: impl Fn(&str, &ConversationEvent) + Send + Sync + 'static,
    ) -> Self {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    pub async fn run(&self, scenarios: &[ConversationScenario]) -> EvalReport {
        let mut report = EvalReport::default();
        for scenario in scenarios {
            report.push(self.run_scenario(scenario).await);
        }
        report
    }

    pub async fn run_scenario(&self, scenario: &ConversationScenario) -> CaseReport {
        match self.execute(scenario).await {
            Ok(outcome) => {
                let failures = check_outcome(scenario, &outcome);
                if !failures.is_empty() {
                    warn!(scenario = %scenario.name, failures = failures.len(), "scenario failed");
                }
                CaseReport {
                    name: scenario.name.clone(),
                    pass: failures.is_empty(),
                    failures,
                    iterations: outcome.state.iterations_count,
                    verdict: outcome.verdict,
                }
            }
            Err(error) => {
                warn!(scenario = %scenario.name, %error, "scenario aborted");
                CaseReport::failed(&scenario.name, format!("run failed: {error}"))
            }
        }
    }

    /// Runs the conversation and, when criteria are given, the analysis.
    pub async fn execute(
        &self,
        scenario: &ConversationScenario,
    ) -> Result<ScenarioOutcome, HarnessError> {
        info!(scenario = %scenario.name, "running scenario");
        let ports = self.ports(scenario)?;

        let backend = Arc::new(InMemoryHotelBackend::new(scenario.hotels.clone()));
        let mut assistant = HotelReservationsAssistant::new(ports.assistant, backend.clone());
        if let Some(today) = scenario.today {
            assistant = assistant.with_current_date(today);
        }
        let user = LlmUser::new(&scenario.persona, ports.user)
            .with_stop_phrase(scenario.stop.phrase.clone());

        let mut runner = ConversationRunner::new(user, assistant)
            .with_stop_condition(scenario.stop.condition());
        if let Some(callback) = &self.event_callback {
            let callback = callback.clone();
            let name = scenario.name.clone();
            runner = runner.with_event_callback(move |event| callback(&name, event));
        }

        let state = runner.run(scenario.seed.as_deref()).await?;

        let verdict = if scenario.criteria.is_empty() {
            None
        } else {
            let analyzer = ConversationAnalyzer::new(ports.analyzer);
            Some(analyzer.analyze(&state.chat_history, &scenario.criteria).await?)
        };

        Ok(ScenarioOutcome {
            state,
            calls: backend.calls(),
            verdict,
        })
    }

    fn ports(&self, scenario: &ConversationScenario) -> Result<Ports, HarnessError> {
        match &self.backends {
            Backends::Scripted => {
                let scripted = scenario.scripted.as_ref().ok_or_else(|| {
                    HarnessError::Config(format!(
                        "scenario '{}' has no scripted responses",
                        scenario.name
                    ))
                })?;
                Ok(scripted_ports(scripted))
            }
            Backends::Live(config) => Ok(Ports {
                user: connect(&config.resolve(Role::User)?)?,
                assistant: connect(&config.resolve(Role::Assistant)?)?,
                analyzer: connect(&config.resolve(Role::Analyzer)?)?,
            }),
        }
    }
}

fn scripted_ports(scripted: &ScriptedRun) -> Ports {
    let config = LlmConfig::default().with_model("scripted");
    let user = ScriptedProvider::from_texts(scripted.user.iter().cloned());
    let assistant =
        ScriptedProvider::from_scripted_turns(&scripted.assistant, scripted.function_calling);
    let analyzer = ScriptedProvider::from_texts(scripted.analyzer.iter().cloned());

    Ports {
        user: port_for(Arc::new(user), &config),
        assistant: port_for(Arc::new(assistant), &config),
        analyzer: port_for(Arc::new(analyzer), &config),
    }
}

/// Compares a finished run against the scenario's expectations.
pub fn check_outcome(scenario: &ConversationScenario, outcome: &ScenarioOutcome) -> Vec<String> {
    let mut failures = Vec::new();
    let calls = &outcome.calls;

    if let Some(location) = &scenario.expect.find_hotels {
        let matched = calls.find_hotels.len() == 1
            && calls.find_hotels[0].eq_ignore_ascii_case(location);
        if !matched {
            failures.push(format!(
                "expected FindHotels(\"{location}\") exactly once, got {:?}",
                calls.find_hotels
            ));
        }
    }

    if let Some(expected) = &scenario.expect.reservation {
        if calls.make_reservation.as_slice() != std::slice::from_ref(expected) {
            failures.push(format!(
                "expected exactly one reservation {expected:?}, got {:?}",
                calls.make_reservation
            ));
        }
    }

    if scenario.expect.no_reservation && !calls.make_reservation.is_empty() {
        failures.push(format!(
            "expected no reservation, got {:?}",
            calls.make_reservation
        ));
    }

    let stop = &scenario.stop;
    if !stop.phrase.is_empty()
        && !outcome.state.last_assistant_message_contains(&stop.phrase)
    {
        failures.push(format!(
            "conversation ended after {} rounds without the assistant saying '{}'",
            outcome.state.iterations_count, stop.phrase
        ));
    }

    match (&outcome.verdict, scenario.minimum_score, scenario.maximum_score) {
        (Some(verdict), Some(minimum), _) if verdict.score < minimum => failures.push(format!(
            "score {} is below the minimum {minimum}: {}",
            verdict.score, verdict.feedback
        )),
        (Some(verdict), _, Some(maximum)) if verdict.score > maximum => failures.push(format!(
            "score {} is above the maximum {maximum}: {}",
            verdict.score, verdict.feedback
        )),
        (None, Some(_), _) | (None, _, Some(_)) => {
            failures.push("a score bound is set but the scenario has no criteria".to_string())
        }
        _ => {}
    }

    failures
}
