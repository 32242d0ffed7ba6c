use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use models::app::AppSpec;
use serde_json::json;

use super::GlobalArgs;
use crate::prelude::*;

/// The arguments that can be passed to the validate command.
#[derive(Debug, Clone, Args)]
pub struct ValidateArgs {
	/// The app spec to check, as a YAML file
	pub path: PathBuf,
}

/// Checks the app spec at the given path. Every violation is reported at once,
/// and the command fails if there is any.
pub(super) async fn execute(
	_global_args: &GlobalArgs,
	ValidateArgs { path }: ValidateArgs,
) -> anyhow::Result<CommandOutput> {
	let yaml = tokio::fs::read_to_string(&path)
		.await
		.with_context(|| format!("failed to read `{}`", path.display()))?;

	let spec = AppSpec::from_yaml(&yaml).map_err(|errors| {
		debug!("`{}` has {} errors", path.display(), errors.0.len());
		let lines = errors
			.iter()
			.map(|error| format!("  - {}", error))
			.collect::<Vec<_>>()
			.join("\n");
		anyhow::anyhow!("`{}` is not a valid app spec:\n{}", path.display(), lines)
	})?;

	Ok(CommandOutput {
		text: "valid".to_string(),
		json: json!({
			"valid": true,
			"name": spec.name,
		}),
	})
}
