mod chat;
mod chunk;
mod completion;
mod model_list;
mod responses;

pub use chat::{
    ChatCompletionRequest, ChatMessage, ContentPart, FunctionDecl, ImageUrl, MessageContent,
    ReasoningOptions, StopSequences, ToolCall, ToolCallFunction, ToolDefinition,
};
pub use chunk::{ChatCompletionChunk, ChunkChoice, ChunkDelta, ToolCallDelta, ToolCallDeltaFunction};
pub use completion::{AssistantMessage, ChatChoice, ChatCompletion, Usage};
pub use model_list::{ModelEntry, ModelList};
pub use responses::{
    Reasoning, ResponsesRequest, ResponsesSseEvent, ResponsesTool, ResponsesToolChoice,
    ResponseItem, ResponseItemContent,
};
