//! Plan configuration

pub mod settings;

pub use settings::*;
