//! Library half of the operator CLI: the HTTP client over the control
//! plane's own surface, the auto-start-on-demand helper, default on-disk
//! paths, and the `serve` subcommand's `AppState` assembly. `main.rs`
//! wires these into clap subcommands.

pub mod auto_start;
pub mod client;
pub mod paths;
pub mod serve_cmd;
