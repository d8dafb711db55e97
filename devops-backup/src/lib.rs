pub mod azure_devops;
pub mod cli;
pub mod debug;
pub mod load_config;
pub mod sharepoint;

pub use cli::{run, Cli, Commands};
