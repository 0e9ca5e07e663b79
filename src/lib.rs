pub mod config;
pub mod embedding;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod source;
pub mod sync;
pub mod vector;
