pub mod chat;
pub mod error;
pub mod models;

pub use chat::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChunkChoice,
    ChunkDelta, CompletionChoice, CompletionMessage, ContentPart, MessageContent, Usage,
};
pub use error::{ErrorBody, ErrorEnvelope};
pub use models::{ListModelsResponse, ModelObject};
