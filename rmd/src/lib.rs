pub mod cli;
pub mod load_config;
pub mod pocket_tail;
pub mod url_to_epub;

pub use cli::{run, Cli, Settings};
