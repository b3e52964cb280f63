pub mod args;
pub mod cache;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod flock;
pub mod git;
pub mod paths;
pub mod resolver;
pub mod token;

mod api;
mod attempt;
mod netrc;

pub use api::{ProtocRemote, ProtocRemoteBuilder};
