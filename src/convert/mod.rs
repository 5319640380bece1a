//! Format converters between the dialects the proxy speaks.
//!
//! Request direction: OpenAI chat.completions -> Gemini generateContent
//! (Code Assist providers) or -> OpenAI Responses (Codex). Response
//! direction: the upstream dialect -> chat.completions, buffered or as an
//! SSE transform with explicit per-stream state.

mod claude_envelope;
mod gemini_envelope;
mod gemini_openai;
mod openai_gemini;
mod responses;

pub use claude_envelope::apply_claude_envelope;
pub use gemini_envelope::apply_gemini_envelope;
pub use gemini_openai::{GeminiSseState, gemini_to_chat_completion, merge_buffered_chunks};
pub use openai_gemini::{chat_to_gemini_request, sanitize_orphan_tool_parts};
pub use responses::{ResponsesSseState, chat_to_responses_request, responses_input_to_messages};
