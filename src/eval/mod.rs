//! Scenario files and the runner that checks them.

pub mod report;
pub mod runner;
pub mod scenario;

pub use report::{CaseReport, EvalReport};
pub use runner::{ScenarioOutcome, ScenarioRunner};
pub use scenario::{load_scenarios, ConversationScenario, ScriptedRun, ScriptedTurn, StopSpec};
