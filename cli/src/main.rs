#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::missing_docs_in_private_items)]

//! A CLI tool for writing and checking the app specs of a homelab cluster.

use clap::Parser;
use tracing::Level;

use crate::prelude::*;

/// The output format and the trait every command implements
mod app;
/// All the commands, arguments and the functionalities for it.
mod commands;

/// A prelude that re-exports commonly used items.
pub mod prelude {
	pub use tracing::{debug, error, info, instrument, trace, warn};

	pub use crate::{
		app::{CommandExecutor, CommandOutput, OutputType},
		commands::{AppArgs, GlobalArgs, GlobalCommands},
	};
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_max_level(Level::WARN)
		.without_time()
		.compact()
		.init();

	let AppArgs {
		global_args,
		command,
	} = AppArgs::parse();

	let output = command.execute(&global_args).await?;

	println!("{}", output.render(global_args.output)?);

	Ok(())
}
