#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod cmd;
pub mod config;
pub mod dom_facts;
pub mod events;
pub mod filename;
pub mod http;
pub mod logging;
pub mod media;
pub mod model;
pub mod navigation;
pub mod policy;
pub mod runtime;
pub mod scheduler;
pub mod storage;
pub mod update;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
pub use update::update;
