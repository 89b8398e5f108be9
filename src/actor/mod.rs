//! Actor-based dispatch runtime
//!
//! One Ractor actor per rank: a coordinator, one leader per province and
//! its workers. The guardian spawns them and collects their outcomes.

pub mod coordinator;
pub mod guardian;
pub mod leader;
pub mod message;
pub mod worker;

pub use coordinator::*;
pub use guardian::*;
pub use leader::*;
pub use message::*;
pub use worker::*;
