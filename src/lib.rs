pub mod ads;
pub mod bridge;
pub mod config;
pub mod error;
pub mod upload;
