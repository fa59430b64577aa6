//! Responses API gateway engine
//!
//! Turns Responses API requests into chat-completions rounds against a
//! backend, runs the server-side tool loop, and translates the results back
//! into Responses objects or events. The HTTP handlers and the proxy filter
//! are two front ends over the same `Engine`.

pub mod adapter;
pub mod builders;
pub mod chat;
pub mod constants;
pub mod conversions;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod orchestrator;
pub mod state;
pub mod storage;
pub mod stream_processor;
pub mod tools;
pub mod translator;
pub mod types;

pub use orchestrator::Engine;
pub use state::codec_for;
pub use storage::InMemoryResponseStore;
pub use tools::ToolExecutor;

pub use handlers::router;
