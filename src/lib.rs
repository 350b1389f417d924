pub mod args;
pub mod auth;
pub mod cert;
pub mod command;
pub mod config;
pub mod fs_util;
pub mod issue;
pub mod lifecycle;
pub mod lock;
pub mod request;
pub mod rotation;

pub use args::Args;
