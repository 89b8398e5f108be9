//! Ports - abstractions over external collaborators

pub mod transport;
