use serde_json::Value;

use crate::prelude::*;

/// The format a command prints its output in
#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputType {
	/// Human readable text
	#[default]
	Text,
	/// JSON on a single line
	Json,
	/// Indented JSON
	PrettyJson,
}

/// What a command produced. Every command fills in both forms, and the global
/// output flag decides which one is printed.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
	/// The output for people
	pub text: String,
	/// The output for scripts
	pub json: Value,
}

impl CommandOutput {
	/// Renders the output in the requested format
	pub fn render(self, output: OutputType) -> Result<String, serde_json::Error> {
		match output {
			OutputType::Text => Ok(self.text),
			OutputType::Json => serde_json::to_string(&self.json),
			OutputType::PrettyJson => serde_json::to_string_pretty(&self.json),
		}
	}
}

/// A command that can be run from the CLI
pub trait CommandExecutor {
	/// Runs the command
	async fn execute(self, global_args: &GlobalArgs) -> anyhow::Result<CommandOutput>;
}
