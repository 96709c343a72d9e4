pub mod analyzer;
pub mod assistant;
pub mod config;
pub mod error;
pub mod eval;
mod extract;
pub mod functions;
pub mod history;
pub mod hotel;
pub mod port;
pub mod prompts;
pub mod providers;
pub mod runner;
pub mod types;
pub mod user;

pub use analyzer::{analyze_conversation, parse_verdict, ConversationAnalyzer, VerdictReport};
pub use assistant::{Assistant, HotelReservationsAssistant};
pub use config::{merge, HarnessConfig, LlmConfig, Role};
pub use error::{HarnessError, LLMError};
pub use functions::{
    FunctionCall, FunctionDefinition, FunctionParameter, Tool, ToolCall, ToolCallType, ToolChoice,
};
pub use history::ChatHistory;
pub use hotel::{Hotel, HotelBackend, InMemoryHotelBackend, Reservation, ToolInvocation};
pub use port::{
    connect, port_for, AssistantTurn, ChatCompletionPort, NativeToolCallingPort,
    PromptedToolCallingPort,
};
pub use providers::LLMProvider;
pub use runner::{
    run_conversation, ConversationEvent, ConversationRunner, ConversationState, StopCondition,
};
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole, ProviderCapabilities};
pub use user::{ConsoleUser, LlmUser, User};
