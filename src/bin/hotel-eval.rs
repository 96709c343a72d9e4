use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use colored::Colorize;
use dialogue_bench::{
    analyzer::ConversationAnalyzer,
    assistant::HotelReservationsAssistant,
    config::{HarnessConfig, Role},
    eval::{load_scenarios, EvalReport, ScenarioRunner},
    hotel::InMemoryHotelBackend,
    port::connect,
    runner::{ConversationEvent, ConversationRunner, StopCondition},
    user::{ConsoleUser, DEFAULT_STOP_PHRASE},
    HarnessError,
};
use regex::Regex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hotel-eval")]
#[command(about = "Run simulated-user conversations against the hotel reservations assistant")]
struct Args {
    /// Scenario file or directory of scenario files
    #[arg(short, long, default_value = "demos/scenarios")]
    scenarios: PathBuf,

    /// YAML file with per-role model settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Call the configured models instead of replaying scripted responses
    #[arg(long)]
    live: bool,

    /// Only run scenarios whose name matches this regex
    #[arg(long)]
    filter: Option<String>,

    /// Chat with the live assistant yourself; say "bye" to finish
    #[arg(long)]
    interactive: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> Result<bool, HarnessError> {
    let config = match &args.config {
        Some(path) => HarnessConfig::from_path(path)?,
        None => HarnessConfig::default(),
    };

    if args.interactive {
        interactive(&config).await?;
        return Ok(true);
    }

    let mut scenarios = load_scenarios(&args.scenarios)?;
    if let Some(pattern) = &args.filter {
        let filter = Regex::new(pattern)
            .map_err(|error| HarnessError::Config(format!("invalid --filter: {error}")))?;
        scenarios.retain(|scenario| filter.is_match(&scenario.name));
    }

    let runner = if args.live {
        ScenarioRunner::live(config)
    } else {
        ScenarioRunner::scripted()
    };
    let runner = runner.with_event_callback(print_event);

    let report = runner.run(&scenarios).await;
    print_report(&report);
    Ok(report.all_passed())
}

async fn interactive(config: &HarnessConfig) -> Result<(), HarnessError> {
    let backend = Arc::new(InMemoryHotelBackend::with_default_hotels());
    let port = connect(&config.resolve(Role::Assistant)?)?;
    let assistant = HotelReservationsAssistant::new(port, backend);

    let mut runner = ConversationRunner::new(ConsoleUser::new(), assistant)
        .with_stop_condition(StopCondition::last_message_says(DEFAULT_STOP_PHRASE));
    let state = runner.run(None).await?;

    let analyzer = ConversationAnalyzer::new(connect(&config.resolve(Role::Analyzer)?)?);
    let criteria = vec![
        "ask for the guest name before making a reservation".to_string(),
        "present the price per night before making a reservation".to_string(),
        "ask for confirmation before making a reservation".to_string(),
    ];
    let verdict = analyzer.analyze(&state.chat_history, &criteria).await?;
    println!(
        "{} {}/9 {}",
        "score:".bold(),
        verdict.score,
        verdict.feedback.dimmed()
    );
    Ok(())
}

fn print_event(scenario: &str, event: &ConversationEvent) {
    match event {
        ConversationEvent::UserMessage { content } => {
            println!("[{scenario}] {} {content}", "user:".cyan())
        }
        ConversationEvent::AssistantMessage { content } => {
            println!("[{scenario}] {} {content}", "assistant:".green())
        }
        ConversationEvent::RoundCompleted { iteration } => {
            println!("[{scenario}] {}", format!("-- round {iteration} --").dimmed())
        }
        ConversationEvent::Stopped { iterations } => {
            println!("[{scenario}] stopped after {iterations} rounds")
        }
    }
}

fn print_report(report: &EvalReport) {
    println!();
    for case in &report.cases {
        let status = if case.pass { "PASS".green().bold() } else { "FAIL".red().bold() };
        let score = case
            .verdict
            .as_ref()
            .map(|verdict| format!(" score {}/9", verdict.score))
            .unwrap_or_default();
        println!("{status} {} ({} rounds){score}", case.name, case.iterations);
        for failure in &case.failures {
            println!("  - {failure}");
        }
    }
    println!("Total: {}, Passed: {}", report.total, report.passed);
}
