pub mod cache;
pub mod coalescer;
pub mod gateway;
pub mod provider;
pub mod retry;
pub mod types;

pub use gateway::{request, LlmGateway};
pub use provider::{AnthropicProvider, LlmProvider, MockProvider, OpenAiCompatProvider};
pub use retry::RetryConfig;
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, GatewayError, QueryClass, Role};
