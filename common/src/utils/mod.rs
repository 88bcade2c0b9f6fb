pub mod config;
pub mod encoder;
