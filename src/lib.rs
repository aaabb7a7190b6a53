pub mod config;
pub mod error;
pub mod handlers;
pub mod openai;
pub mod pipeline;
pub mod replicate;
pub mod store;
