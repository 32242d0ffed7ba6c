use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use models::app::{AppPort, AppSpec, HealthCheck, IngressBinding, PortProtocol, ResourceLimits};
use serde_json::json;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

use super::GlobalArgs;
use crate::prelude::*;

/// The arguments that can be passed to the init command.
#[derive(Debug, Clone, Args)]
pub struct InitArgs {
	/// The name of the new app
	pub name: String,
	/// The directory to write `<name>.yaml` into
	#[arg(default_value = ".")]
	pub path: PathBuf,
}

/// Writes a starter app spec for the given name. An existing file is never
/// overwritten.
pub(super) async fn execute(
	_global_args: &GlobalArgs,
	InitArgs { name, path }: InitArgs,
) -> anyhow::Result<CommandOutput> {
	let spec = template(&name)?;
	spec.validate()?;

	let file = path.join(format!("{}.yaml", name));
	let yaml = serde_yaml::to_string(&spec)?;

	let mut writer = OpenOptions::new()
		.write(true)
		.create_new(true)
		.open(&file)
		.await
		.with_context(|| format!("refusing to write `{}`", file.display()))?;
	writer.write_all(yaml.as_bytes()).await?;
	writer.flush().await?;
	info!("Wrote a starter spec to `{}`", file.display());

	Ok(CommandOutput {
		text: format!("Created `{}`", file.display()),
		json: json!({
			"name": name,
			"path": file,
		}),
	})
}

/// A web server on port 80 behind the ingress, with a modest resource limit
fn template(name: &str) -> anyhow::Result<AppSpec> {
	let mut spec = AppSpec::new(name, "nginx:latest");
	spec.ports.push(AppPort {
		name: "http".to_string(),
		container_port: 80,
		protocol: PortProtocol::Tcp,
	});
	spec.resources = ResourceLimits {
		cpu: Some("500m".parse().map_err(anyhow::Error::msg)?),
		memory: Some("256Mi".parse().map_err(anyhow::Error::msg)?),
	};
	spec.ingress = Some(IngressBinding {
		port: "http".to_string(),
		host: None,
	});
	spec.health_check = Some(HealthCheck::Http {
		path: "/".to_string(),
		port: "http".to_string(),
	});
	Ok(spec)
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;

	fn args(name: &str, path: PathBuf) -> InitArgs {
		InitArgs {
			name: name.to_string(),
			path,
		}
	}

	#[tokio::test]
	async fn writes_a_spec_that_passes_validation() {
		let dir = tempfile::tempdir().unwrap();

		execute(&GlobalArgs::default(), args("grafana", dir.path().to_path_buf()))
			.await
			.unwrap();

		let yaml = fs::read_to_string(dir.path().join("grafana.yaml")).unwrap();
		let spec = AppSpec::from_yaml(&yaml).unwrap();
		assert_eq!(spec.name, "grafana");
		assert_eq!(spec.ingress.unwrap().port, "http");
	}

	#[tokio::test]
	async fn refuses_to_overwrite() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("grafana.yaml");
		fs::write(&file, "name: mine\n").unwrap();

		let result = execute(&GlobalArgs::default(), args("grafana", dir.path().to_path_buf())).await;

		assert!(result.is_err());
		assert_eq!(fs::read_to_string(&file).unwrap(), "name: mine\n");
	}

	#[tokio::test]
	async fn rejects_invalid_names() {
		let dir = tempfile::tempdir().unwrap();

		let result = execute(&GlobalArgs::default(), args("Grafana", dir.path().to_path_buf())).await;

		assert!(result.is_err());
		assert!(!dir.path().join("Grafana.yaml").exists());
	}
}
