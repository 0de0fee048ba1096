pub mod config;
pub mod logging;

pub type Result<T> = anyhow::Result<T>;
