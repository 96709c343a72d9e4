use std::sync::Arc;

use chrono::NaiveDate;
use dialogue_bench::{
    analyze_conversation, merge, port_for, providers::scripted::ScriptedProvider,
    run_conversation, ChatCompletionPort, HarnessError, HotelReservationsAssistant,
    InMemoryHotelBackend, LlmConfig, MessageRole, Reservation, StopCondition,
};
use dialogue_bench::hotel::{BackendCalls, Hotel};
use serde_json::json;

const PERSONA: &str = "My name is John Smith. I want a hotel in London from 2024-02-09 to \
                       2024-02-11 for 3 guests. My budget is $350 per night.";

fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("date")
}

fn london_hotels() -> Arc<InMemoryHotelBackend> {
    Arc::new(InMemoryHotelBackend::new(vec![
        Hotel::new("1", "Kensington Hotel", "London", 300.0),
        Hotel::new("2", "Notting Hill Hotel", "London", 400.0),
    ]))
}

fn scripted_port(provider: ScriptedProvider) -> Arc<dyn ChatCompletionPort> {
    port_for(Arc::new(provider), &LlmConfig::default())
}

fn john_smith_user() -> Arc<dyn ChatCompletionPort> {
    scripted_port(ScriptedProvider::from_texts([
        "Hi, I need a hotel in London from 2024-02-09 to 2024-02-11 for 3 guests.",
        "Kensington Hotel is within my budget, please book it.",
        "The guest is John Smith.",
        "Thank you, bye!",
    ]))
}

fn reservation_arguments() -> serde_json::Value {
    json!({
        "hotel_name": "Kensington Hotel",
        "guest_name": "John Smith",
        "checkin_date": "2024-02-09",
        "checkout_date": "2024-02-11",
        "guests": 3
    })
}

#[tokio::test]
async fn london_booking_calls_each_host_function_once() {
    let assistant_provider = ScriptedProvider::new();
    assistant_provider.push_tool_call("FindHotels", json!({"location": "London"}));
    assistant_provider.push_text(
        "Kensington Hotel is $300 per night and Notting Hill Hotel is $400 per night.",
    );
    assistant_provider.push_text("Great, what is the name of the guest?");
    assistant_provider.push_tool_call("MakeReservation", reservation_arguments());
    assistant_provider.push_text("You are all set at Kensington Hotel, John Smith. Goodbye!");

    let backend = london_hotels();
    let assistant = HotelReservationsAssistant::new(scripted_port(assistant_provider), backend.clone())
        .with_current_date(date("2024-02-01"));

    let state = run_conversation(
        PERSONA,
        john_smith_user(),
        assistant,
        None,
        StopCondition::default_for("bye", 10),
    )
    .await
    .expect("conversation");

    assert_eq!(state.iterations_count, 3);
    assert!(state.last_assistant_message_contains("BYE"));
    assert_eq!(state.chat_history.len(), 7);
    assert!(state
        .chat_history
        .iter()
        .all(|message| matches!(message.role, MessageRole::User | MessageRole::Assistant)));

    let calls = backend.calls();
    assert_eq!(calls.find_hotels, vec!["London".to_string()]);
    assert_eq!(
        calls.make_reservation,
        vec![Reservation {
            hotel_name: "Kensington Hotel".into(),
            guest_name: "John Smith".into(),
            checkin_date: date("2024-02-09"),
            checkout_date: date("2024-02-11"),
            guests: 3,
        }]
    );

    let judge = scripted_port(ScriptedProvider::from_texts([
        "```json\n{\"score\": 8, \"feedback\": \"Booked the hotel within budget after asking for the name.\"}\n```",
    ]));
    let criteria = vec!["ask for guest name before reservation".to_string()];
    let verdict = analyze_conversation(judge, &state.chat_history, &criteria)
        .await
        .expect("verdict");
    assert_eq!(verdict.score, 8);
}

#[tokio::test]
async fn prompted_back_end_books_through_extracted_calls() {
    let assistant_provider = ScriptedProvider::from_texts(vec![
        "```json\n{\"function_call\": {\"name\": \"FindHotels\", \"arguments\": {\"location\": \"London\"}}}\n```".to_string(),
        "Kensington Hotel costs $300 per night, Notting Hill Hotel $400.".to_string(),
        "May I have the guest name?".to_string(),
        format!(
            "<functioncall> {{\"name\": \"MakeReservation\", \"arguments\": {}}} </functioncall>",
            reservation_arguments()
        ),
        "Booked! Goodbye.".to_string(),
    ])
    .with_function_calling(false);
    let assistant_provider = Arc::new(assistant_provider);

    let config = merge(&LlmConfig::builtin(), &LlmConfig::default());
    let port = port_for(assistant_provider.clone(), &config.with_function_calling(false));
    assert!(!port.supports_function_calling());

    let backend = london_hotels();
    let assistant = HotelReservationsAssistant::new(port, backend.clone());
    let state = run_conversation(
        PERSONA,
        john_smith_user(),
        assistant,
        None,
        StopCondition::default_for("bye", 10),
    )
    .await
    .expect("conversation");

    assert_eq!(state.iterations_count, 3);
    assert_eq!(backend.calls().find_hotels.len(), 1);
    assert_eq!(backend.calls().make_reservation.len(), 1);

    let requests = assistant_provider.requests();
    assert!(requests.iter().all(|request| request.tools.is_empty()));
    let fed_back = requests[1]
        .messages
        .iter()
        .filter_map(|message| message.text())
        .any(|text| text.starts_with("Function FindHotels returned:"));
    assert!(fed_back);
}

#[tokio::test]
async fn conversation_without_stop_phrase_runs_to_the_cap() {
    let assistant_provider = ScriptedProvider::from_texts(vec!["Could you tell me more?"; 4]);
    let user = scripted_port(ScriptedProvider::from_texts(vec!["I want a hotel."; 5]));
    let assistant = HotelReservationsAssistant::new(scripted_port(assistant_provider), london_hotels());

    let state = run_conversation(PERSONA, user, assistant, None, StopCondition::max_iterations(4))
        .await
        .expect("conversation");

    assert_eq!(state.iterations_count, 4);
    assert!(!state.last_assistant_message_contains("bye"));
}

#[tokio::test]
async fn unknown_tool_aborts_the_conversation() {
    let assistant_provider = ScriptedProvider::new();
    assistant_provider.push_tool_call("CancelReservation", json!({"reservation_id": "42"}));
    let backend = london_hotels();
    let assistant = HotelReservationsAssistant::new(scripted_port(assistant_provider), backend.clone());

    let error = run_conversation(
        PERSONA,
        john_smith_user(),
        assistant,
        None,
        StopCondition::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(error, HarnessError::UnknownTool(name) if name == "CancelReservation"));
    assert_eq!(backend.calls(), BackendCalls::default());
}

#[tokio::test]
async fn malformed_judge_output_is_an_error() {
    let judge = scripted_port(ScriptedProvider::from_texts([
        "I would rate this conversation an 11 out of 9!",
    ]));
    let mut history = dialogue_bench::ChatHistory::new();
    history.push_user("Book a room");
    history.push_assistant("Booked.");

    let error = analyze_conversation(judge, &history, &["be polite".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(error, HarnessError::MalformedVerdict(_)));
}
