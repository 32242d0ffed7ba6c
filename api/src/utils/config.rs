use std::{
	env,
	fmt::{Display, Formatter},
	net::SocketAddr,
	path::PathBuf,
};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// The prefix of every environment variable the API reads its configuration
/// from, such as `HOMELAB_GIT__TOKEN`
const ENV_PREFIX: &str = "HOMELAB";
/// The separator between nested keys in environment variables
const ENV_SEPARATOR: &str = "__";

/// Reads the configuration from the config file of the running environment
/// and then from the environment variables, which take precedence.
#[instrument]
pub fn parse_config() -> Result<AppConfig, ConfigError> {
	trace!("Reading config data...");

	let env = if cfg!(debug_assertions) {
		"dev".to_string()
	} else {
		env::var("HOMELAB_ENV").unwrap_or_else(|_| "prod".into())
	};

	parse_config_from(
		&env,
		Environment::with_prefix(ENV_PREFIX)
			.prefix_separator("_")
			.separator(ENV_SEPARATOR),
	)
}

/// Builds the configuration for the given running environment, taking
/// overrides from the given environment source
fn parse_config_from(env: &str, environment: Environment) -> Result<AppConfig, ConfigError> {
	let builder = match env {
		"prod" | "production" => Config::builder()
			.add_source(File::with_name("config/prod").required(false))
			.set_default("environment", "production")?,
		"dev" | "development" => Config::builder()
			.add_source(File::with_name("config/dev").required(false))
			.set_default("environment", "development")?,
		_ => {
			return Err(ConfigError::Message(format!(
				"unknown running environment `{}`",
				env
			)));
		}
	};

	builder
		.add_source(environment)
		.build()?
		.try_deserialize()
}

/// The configuration of the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
	/// The address the HTTP server listens on
	#[serde(alias = "bindaddr", default = "default_bind_addr")]
	pub bind_addr: SocketAddr,
	/// The environment the application is running in. This is set at runtime
	/// based on an environment variable and if the application is compiled with
	/// debug mode.
	pub environment: RunningEnvironment,
	/// The local clone of the GitOps repository
	#[serde(alias = "projectdir")]
	pub project_dir: PathBuf,
	/// The name of the cluster directory within the repository
	#[serde(alias = "clustername")]
	pub cluster_name: String,
	/// How changes are committed and pushed
	pub git: GitConfig,
	/// The GitOps source that is asked to reconcile after a push
	#[serde(default)]
	pub flux: FluxConfig,
	/// The issuer URL of the cluster's identity provider. When set, every
	/// OAuth client written to the repository is annotated with it.
	#[serde(alias = "identityproviderurl", default)]
	pub identity_provider_url: Option<String>,
}

impl AppConfig {
	/// The directory holding one sub-directory per app
	pub fn apps_dir(&self) -> PathBuf {
		self.project_dir
			.join("clusters")
			.join(&self.cluster_name)
			.join("my-applications")
	}
}

/// The address the server listens on if none is configured
fn default_bind_addr() -> SocketAddr {
	SocketAddr::from(([0, 0, 0, 0], 3000))
}

/// The git identity and remote used to publish changes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
	/// The name of the remote to push to
	#[serde(default = "default_remote")]
	pub remote: String,
	/// The branch the GitOps controller tracks
	#[serde(default = "default_branch")]
	pub branch: String,
	/// The name commits are authored with
	#[serde(alias = "authorname")]
	pub author_name: String,
	/// The email commits are authored with
	#[serde(alias = "authoremail")]
	pub author_email: String,
	/// The user name sent along with the token. Most forges ignore it
	#[serde(default = "default_username")]
	pub username: String,
	/// The access token used to push. Pushes are unauthenticated without one
	#[serde(default)]
	pub token: Option<String>,
}

/// The default remote to push to
fn default_remote() -> String {
	"origin".to_string()
}

/// The default branch to push to
fn default_branch() -> String {
	"main".to_string()
}

/// The default user name sent with the token
fn default_username() -> String {
	"git".to_string()
}

/// The Flux `GitRepository` that watches the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FluxConfig {
	/// The name of the `GitRepository`
	pub name: String,
	/// The namespace of the `GitRepository`
	pub namespace: String,
}

impl Default for FluxConfig {
	fn default() -> Self {
		Self {
			name: "flux-system".to_string(),
			namespace: "flux-system".to_string(),
		}
	}
}

/// The environment the application is running in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunningEnvironment {
	/// The application is running in development mode
	Development,
	/// The application is running in production mode
	Production,
}

impl Display for RunningEnvironment {
	fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
		write!(
			formatter,
			"{}",
			match self {
				RunningEnvironment::Development => "Development",
				RunningEnvironment::Production => "Production",
			}
		)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	fn source(vars: &[(&str, &str)]) -> Environment {
		Environment::with_prefix(ENV_PREFIX)
			.prefix_separator("_")
			.separator(ENV_SEPARATOR)
			.source(Some(
				vars.iter()
					.map(|(key, value)| (key.to_string(), value.to_string()))
					.collect::<HashMap<_, _>>(),
			))
	}

	#[test]
	fn reads_nested_settings_from_the_environment() {
		let config = parse_config_from(
			"production",
			source(&[
				("HOMELAB_PROJECTDIR", "/srv/gitops"),
				("HOMELAB_CLUSTERNAME", "home"),
				("HOMELAB_GIT__AUTHORNAME", "Homelab Bot"),
				("HOMELAB_GIT__AUTHOREMAIL", "bot@homelab.local"),
				("HOMELAB_GIT__TOKEN", "secret"),
			]),
		)
		.unwrap();

		assert_eq!(config.environment, RunningEnvironment::Production);
		assert_eq!(config.git.author_name, "Homelab Bot");
		assert_eq!(config.git.token.as_deref(), Some("secret"));
		assert_eq!(config.git.branch, "main");
		assert_eq!(config.flux.namespace, "flux-system");
		assert_eq!(config.bind_addr, default_bind_addr());
		assert_eq!(
			config.apps_dir(),
			PathBuf::from("/srv/gitops/clusters/home/my-applications")
		);
	}

	#[test]
	fn unknown_environment_is_rejected() {
		assert!(parse_config_from("staging", source(&[])).is_err());
	}
}
