//! CLI domain: parse, route, and output only.
//! No pipeline logic; a single route table dispatches to the orchestrator.

mod output;
mod parse;
mod route;

pub use output::{format_event_line, map_error};
pub use parse::{Cli, Commands, ConfigCommands};
pub use route::CliContext;
