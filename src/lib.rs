pub mod chain;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod policy;
pub mod probe;
pub mod progress;
pub mod report;
pub mod scratch;
pub mod search;
pub mod util;
