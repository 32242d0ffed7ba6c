use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use models::{app::AppSpec, manifest::to_manifests};
use serde_json::Value;

use super::GlobalArgs;
use crate::prelude::*;

/// The arguments that can be passed to the render command.
#[derive(Debug, Clone, Args)]
pub struct RenderArgs {
	/// The app spec to render, as a YAML file
	pub path: PathBuf,
}

/// Prints every manifest the app spec at the given path is stored as,
/// kustomization included
pub(super) async fn execute(
	_global_args: &GlobalArgs,
	RenderArgs { path }: RenderArgs,
) -> anyhow::Result<CommandOutput> {
	let yaml = tokio::fs::read_to_string(&path)
		.await
		.with_context(|| format!("failed to read `{}`", path.display()))?;
	let spec = AppSpec::from_yaml(&yaml)?;

	let set = to_manifests(&spec);
	let mut documents = set.resources();
	documents.push(models::manifest::ManifestDocument::Kustomization(
		set.kustomization.clone(),
	));
	let json = documents
		.iter()
		.map(|document| document.to_json_value())
		.collect::<Result<Vec<_>, _>>()?;

	Ok(CommandOutput {
		text: set.to_yaml_stream()?,
		json: Value::Array(json),
	})
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;

	const SPEC: &str = r#"
name: whoami
image: traefik/whoami:v1.10
ports:
  - name: http
    containerPort: 80
ingress:
  port: http
  host: whoami.home.lan
"#;

	#[tokio::test]
	async fn renders_every_document() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("whoami.yaml");
		fs::write(&path, SPEC).unwrap();

		let output = execute(&GlobalArgs::default(), RenderArgs { path }).await.unwrap();

		let kinds = output
			.json
			.as_array()
			.unwrap()
			.iter()
			.map(|document| document["kind"].as_str().unwrap().to_string())
			.collect::<Vec<_>>();
		assert_eq!(
			kinds,
			["Namespace", "Deployment", "Service", "Ingress", "Kustomization"]
		);
		assert_eq!(output.text.matches("---\n").count(), 4);
		assert!(output.text.contains("whoami.home.lan"));
	}

	#[tokio::test]
	async fn invalid_specs_are_not_rendered() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("whoami.yaml");
		fs::write(&path, "name: whoami\nimage: ''\n").unwrap();

		let err = execute(&GlobalArgs::default(), RenderArgs { path })
			.await
			.unwrap_err()
			.to_string();

		assert!(err.contains("image"), "{}", err);
	}
}
