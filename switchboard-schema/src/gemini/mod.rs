mod content;
mod request;
mod response;

pub use content::{Blob, Content, FileData, FunctionCall, FunctionResponse, Part};
pub use request::{
    FunctionDeclaration, GeminiTool, GenerateContentRequest, GenerationConfig, ThinkingConfig,
};
pub use response::{Candidate, GenerateContentResponse, UsageMetadata};
