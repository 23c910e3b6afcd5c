//! Library side of the `turnloop` binary: session replay.

pub mod replay;

pub use replay::{ReplayError, ReplayOptions, Session, replay};
