use clap::{Args, Parser, Subcommand};

use self::{init::InitArgs, render::RenderArgs, validate::ValidateArgs};
use crate::prelude::*;

/// The command to write a starter app spec.
mod init;
/// The command to print the manifests an app spec turns into.
mod render;
/// The command to check an app spec.
mod validate;

/// A list of all the arguments that can be passed to the CLI.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about)]
pub struct AppArgs {
	/// All global arguments that can be used across all commands.
	#[command(flatten)]
	pub global_args: GlobalArgs,
	/// A command that is called on the CLI.
	#[command(subcommand)]
	pub command: GlobalCommands,
}

/// A global list of all the arguments that can be passed to the CLI.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
	/// The output type of each command. Defaults to text.
	#[arg(short = 'o', long, global = true, default_value_t = OutputType::Text)]
	pub output: OutputType,
}

/// A list of all the commands that can be called on the CLI.
#[derive(Debug, Clone, Subcommand)]
#[command(rename_all = "kebab-case")]
pub enum GlobalCommands {
	/// Check an app spec and list everything that is wrong with it.
	#[command(alias = "check")]
	Validate(ValidateArgs),
	/// Write a starter app spec that can be edited from there.
	#[command(alias = "new")]
	Init(InitArgs),
	/// Print the manifests an app spec is stored as.
	Render(RenderArgs),
}

impl CommandExecutor for GlobalCommands {
	async fn execute(self, global_args: &GlobalArgs) -> anyhow::Result<CommandOutput> {
		match self {
			Self::Validate(args) => validate::execute(global_args, args).await,
			Self::Init(args) => init::execute(global_args, args).await,
			Self::Render(args) => render::execute(global_args, args).await,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_output_before_and_after_the_command() {
		let args = AppArgs::try_parse_from(["homelab", "-o", "json", "validate", "app.yaml"]).unwrap();
		assert_eq!(args.global_args.output, OutputType::Json);
		assert!(matches!(args.command, GlobalCommands::Validate(_)));

		let args =
			AppArgs::try_parse_from(["homelab", "render", "app.yaml", "-o", "pretty-json"]).unwrap();
		assert_eq!(args.global_args.output, OutputType::PrettyJson);
	}

	#[test]
	fn init_defaults_to_the_current_directory() {
		let args = AppArgs::try_parse_from(["homelab", "init", "grafana"]).unwrap();
		let GlobalCommands::Init(init) = args.command else {
			panic!("expected the init command");
		};
		assert_eq!(init.name, "grafana");
		assert_eq!(init.path, std::path::PathBuf::from("."));
	}

	#[test]
	fn unknown_output_types_are_rejected() {
		assert!(AppArgs::try_parse_from(["homelab", "-o", "yaml", "validate", "app.yaml"]).is_err());
	}
}
