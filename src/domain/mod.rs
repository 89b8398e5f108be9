//! Domain model of the dispatch protocol

pub mod backlog;
pub mod book;
pub mod constant;
pub mod error;
pub mod protocol;
pub mod state;
pub mod topology;
