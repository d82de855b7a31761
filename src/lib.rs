pub mod buffer;
pub mod codec;
pub mod collector;
pub mod config;
pub mod error;
pub mod filter;
pub mod log_entry;
pub mod pipeline;
pub mod scheduler;
pub mod server;
pub mod sink;
pub mod tag;
pub mod worker;
