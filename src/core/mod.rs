//! Connection orchestration: policies, collaborators and the state machine
//! that ties them together.

pub mod driver;
pub mod machine;
pub mod network;
pub mod observable;
pub mod protocol;
pub mod runtime;
pub mod selection;
pub mod session;
