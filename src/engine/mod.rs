pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod output;
pub mod reader;
pub mod render;
