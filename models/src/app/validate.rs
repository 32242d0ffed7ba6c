use std::collections::{BTreeMap, BTreeSet};

use url::Url;

use super::{AdditionalResource, AppSpec, Dimension, EnvVarSource, HealthCheck};
use crate::error::ValidationErrors;

/// The longest a DNS-1123 label (and so an app or resource name) can be
const MAX_NAME_LENGTH: usize = 63;
/// The longest a port name can be
const MAX_PORT_NAME_LENGTH: usize = 15;

/// Validates an untyped document (parsed from YAML or JSON) and returns the
/// typed app spec. Shape errors (a missing field, a string where a number is
/// expected) are reported at the path the deserializer was at; if the shape
/// is right, every business rule is checked and all violations are returned
/// together.
pub fn validate(value: serde_json::Value) -> Result<AppSpec, ValidationErrors> {
	let spec: AppSpec = serde_path_to_error::deserialize(value).map_err(|err| {
		let path = err.path().to_string();
		let mut errors = ValidationErrors::default();
		errors.push(
			if path == "." { String::new() } else { path },
			err.into_inner().to_string(),
		);
		errors
	})?;
	spec.validate()?;
	Ok(spec)
}

impl AppSpec {
	/// Parses and validates an app spec written in YAML
	pub fn from_yaml(yaml: &str) -> Result<Self, ValidationErrors> {
		let value: serde_json::Value = serde_yaml::from_str(yaml).map_err(|err| {
			let mut errors = ValidationErrors::default();
			errors.push("", format!("not valid YAML: {}", err));
			errors
		})?;
		validate(value)
	}

	/// Checks every rule of an already typed spec
	pub fn validate(&self) -> Result<(), ValidationErrors> {
		let mut errors = ValidationErrors::default();

		check_name(&mut errors, "name", &self.name);
		if self.image.trim().is_empty() {
			errors.push("image", "must not be empty");
		} else if self.image.chars().any(char::is_whitespace) {
			errors.push("image", "must not contain whitespace");
		}

		self.validate_ports(&mut errors);
		self.validate_env(&mut errors);

		if let Some(cpu) = &self.resources.cpu {
			if let Err(message) = cpu.check(Dimension::Cpu) {
				errors.push("resources.cpu", message);
			}
		}
		if let Some(memory) = &self.resources.memory {
			if let Err(message) = memory.check(Dimension::Memory) {
				errors.push("resources.memory", message);
			}
		}

		if let Some(ingress) = &self.ingress {
			if self.port(&ingress.port).is_none() {
				errors.push(
					"ingress.port",
					format!("`{}` is not one of the declared ports", ingress.port),
				);
			}
			if let Some(host) = &ingress.host {
				if !is_hostname(host) {
					errors.push("ingress.host", format!("`{}` is not a valid host name", host));
				}
			}
		}

		if let Some(health_check) = &self.health_check {
			if self.port(health_check.port()).is_none() {
				errors.push(
					"healthCheck.port",
					format!(
						"`{}` is not one of the declared ports",
						health_check.port()
					),
				);
			}
			if let HealthCheck::Http { path, .. } = health_check {
				if !path.starts_with('/') {
					errors.push("healthCheck.path", "must start with `/`");
				}
			}
		}

		self.validate_volumes(&mut errors);
		self.validate_additional_resources(&mut errors);

		errors.into_result(())
	}

	/// Port names and numbers must be well formed and unique
	fn validate_ports(&self, errors: &mut ValidationErrors) {
		let mut names = BTreeSet::new();
		let mut numbers = BTreeSet::new();

		for (index, port) in self.ports.iter().enumerate() {
			let path = format!("ports[{}]", index);

			if port.name.is_empty() {
				errors.push(format!("{}.name", path), "must not be empty");
			} else if !is_port_name(&port.name) {
				errors.push(
					format!("{}.name", path),
					format!(
						"must be at most {} lowercase letters, digits or `-`, with at least one letter",
						MAX_PORT_NAME_LENGTH
					),
				);
			} else if !names.insert(port.name.as_str()) {
				errors.push(
					format!("{}.name", path),
					format!("duplicate port name `{}`", port.name),
				);
			}

			if port.container_port == 0 {
				errors.push(format!("{}.containerPort", path), "must be between 1 and 65535");
			} else if !numbers.insert(port.container_port) {
				errors.push(
					format!("{}.containerPort", path),
					format!("duplicate port number {}", port.container_port),
				);
			}
		}
	}

	/// Env names must be unique, and secret references must name a declared
	/// OAuth client
	fn validate_env(&self, errors: &mut ValidationErrors) {
		let auth_clients = self
			.auth_clients()
			.map(|client| client.name.as_str())
			.collect::<BTreeSet<_>>();
		let mut names = BTreeSet::new();

		for (index, env) in self.env.iter().enumerate() {
			let path = format!("env[{}]", index);

			if env.name.is_empty() {
				errors.push(format!("{}.name", path), "must not be empty");
			} else if !names.insert(env.name.as_str()) {
				errors.push(
					format!("{}.name", path),
					format!("duplicate environment variable `{}`", env.name),
				);
			}

			if let EnvVarSource::SecretRef(secret) = &env.source {
				if !auth_clients.contains(secret.name.as_str()) {
					errors.push(
						format!("{}.secretRef.name", path),
						format!(
							"`{}` is not an AuthClient declared in additionalResources",
							secret.name
						),
					);
				}
				if secret.key.is_empty() {
					errors.push(format!("{}.secretRef.key", path), "must not be empty");
				}
			}
		}
	}

	/// Volumes must name a declared claim and mount at distinct absolute paths
	fn validate_volumes(&self, errors: &mut ValidationErrors) {
		let claims = self
			.volume_claims()
			.map(|claim| claim.name.as_str())
			.collect::<BTreeSet<_>>();
		let mut mount_paths = BTreeSet::new();

		for (index, volume) in self.volumes.iter().enumerate() {
			let path = format!("volumes[{}]", index);

			if !claims.contains(volume.name.as_str()) {
				errors.push(
					format!("{}.name", path),
					format!(
						"`{}` is not a PersistentVolumeClaim declared in additionalResources",
						volume.name
					),
				);
			}

			if !volume.mount_path.starts_with('/') {
				errors.push(format!("{}.mountPath", path), "must be an absolute path");
			} else if !mount_paths.insert(volume.mount_path.as_str()) {
				errors.push(
					format!("{}.mountPath", path),
					format!("`{}` is already mounted", volume.mount_path),
				);
			}
		}
	}

	/// Names must be unique per kind, redirect URIs absolute and storage a
	/// memory quantity
	fn validate_additional_resources(&self, errors: &mut ValidationErrors) {
		let mut seen = BTreeMap::<&str, BTreeSet<&str>>::new();

		for (index, resource) in self.additional_resources.iter().enumerate() {
			let path = format!("additionalResources[{}]", index);

			if check_name(errors, &format!("{}.name", path), resource.name()) &&
				!seen
					.entry(resource.kind())
					.or_default()
					.insert(resource.name())
			{
				errors.push(
					format!("{}.name", path),
					format!("duplicate {} `{}`", resource.kind(), resource.name()),
				);
			}

			match resource {
				AdditionalResource::AuthClient(client) => {
					if client.redirect_uris.is_empty() {
						errors.push(
							format!("{}.redirectUris", path),
							"at least one redirect URI is required",
						);
					}
					for (field, uris) in [
						("redirectUris", &client.redirect_uris),
						("postLogoutRedirectUris", &client.post_logout_redirect_uris),
					] {
						for (uri_index, uri) in uris.iter().enumerate() {
							if let Err(err) = Url::parse(uri) {
								errors.push(
									format!("{}.{}[{}]", path, field, uri_index),
									format!("`{}` is not an absolute URL: {}", uri, err),
								);
							}
						}
					}
				}
				AdditionalResource::PersistentVolumeClaim(claim) => {
					if let Err(message) = claim.storage.check(Dimension::Memory) {
						errors.push(format!("{}.storage", path), message);
					}
					if claim
						.storage_class_name
						.as_ref()
						.is_some_and(|class| class.is_empty())
					{
						errors.push(
							format!("{}.storageClassName", path),
							"must not be empty when set",
						);
					}
				}
			}
		}
	}
}

/// Checks that a name is a valid DNS-1123 label, recording an error if not.
/// Returns whether the name was valid.
fn check_name(errors: &mut ValidationErrors, path: &str, name: &str) -> bool {
	if name.is_empty() {
		errors.push(path, "must not be empty");
		false
	} else if !is_dns_label(name) {
		errors.push(
			path,
			format!(
				"must be at most {} lowercase letters, digits or `-`, starting and ending with a letter or digit",
				MAX_NAME_LENGTH
			),
		);
		false
	} else {
		true
	}
}

/// Whether the name is a DNS-1123 label
pub fn is_dns_label(name: &str) -> bool {
	name.len() <= MAX_NAME_LENGTH &&
		name.chars()
			.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') &&
		!name.starts_with('-') &&
		!name.ends_with('-')
}

/// Whether the name is a valid IANA-style port name
fn is_port_name(name: &str) -> bool {
	name.len() <= MAX_PORT_NAME_LENGTH &&
		is_dns_label(name) &&
		name.chars().any(|c| c.is_ascii_lowercase()) &&
		!name.contains("--")
}

/// Whether every dot-separated label of the host is a DNS-1123 label
fn is_hostname(host: &str) -> bool {
	host.len() <= 253 && host.split('.').all(|label| !label.is_empty() && is_dns_label(label))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::app::{
		AppPort,
		AuthClientResource,
		EnvVar,
		IngressBinding,
		PortProtocol,
		Quantity,
		VolumeClaimResource,
		VolumeMount,
	};

	fn port(name: &str, number: u16) -> AppPort {
		AppPort {
			name: name.to_string(),
			container_port: number,
			protocol: PortProtocol::Tcp,
		}
	}

	fn auth_client(name: &str) -> AdditionalResource {
		AdditionalResource::AuthClient(AuthClientResource {
			name: name.to_string(),
			redirect_uris: vec![format!("https://{}.home.arpa/oauth2/callback", name)],
			post_logout_redirect_uris: vec![],
		})
	}

	#[test]
	fn minimal_spec_is_valid() {
		let spec = validate(json!({
			"name": "new-app",
			"image": "nginx:latest",
			"resources": { "cpu": "0.5", "memory": "256Mi" }
		}))
		.unwrap();

		assert_eq!(spec.name, "new-app");
		assert_eq!(spec.resources.cpu, Some("0.5".parse().unwrap()));
	}

	#[test]
	fn empty_name_and_image_are_rejected() {
		let errors = AppSpec::new("", " ").validate().unwrap_err();

		assert!(errors.has_error_at("name"));
		assert!(errors.has_error_at("image"));
	}

	#[test]
	fn shape_errors_carry_the_field_path() {
		let errors = validate(json!({
			"name": "web",
			"image": "nginx",
			"ports": [{ "name": "http", "containerPort": "eighty" }]
		}))
		.unwrap_err();

		assert_eq!(errors.0.len(), 1);
		assert_eq!(errors.0[0].path, "ports[0].containerPort");
	}

	#[test]
	fn duplicate_port_names_are_rejected_at_the_offending_index() {
		let mut spec = AppSpec::new("web", "nginx");
		spec.ports = vec![port("http", 80), port("metrics", 9090), port("http", 8080)];

		let errors = spec.validate().unwrap_err();

		assert_eq!(errors.0.len(), 1);
		assert!(errors.has_error_at("ports[2].name"));
	}

	#[test]
	fn duplicate_port_numbers_are_rejected_at_the_offending_index() {
		let mut spec = AppSpec::new("web", "nginx");
		spec.ports = vec![port("http", 80), port("alt", 80)];

		let errors = spec.validate().unwrap_err();

		assert_eq!(errors.0.len(), 1);
		assert!(errors.has_error_at("ports[1].containerPort"));
	}

	#[test]
	fn ingress_must_reference_a_declared_port() {
		let mut spec = AppSpec::new("web", "nginx");
		spec.ports = vec![port("http", 80)];
		spec.ingress = Some(IngressBinding {
			port: "https".to_string(),
			host: None,
		});

		let errors = spec.validate().unwrap_err();
		assert!(errors.has_error_at("ingress.port"));

		spec.ingress = Some(IngressBinding {
			port: "http".to_string(),
			host: Some("web.home.arpa".to_string()),
		});
		assert!(spec.validate().is_ok());
	}

	#[test]
	fn health_check_must_reference_a_declared_port() {
		let mut spec = AppSpec::new("web", "nginx");
		spec.ports = vec![port("http", 80)];
		spec.health_check = Some(HealthCheck::Http {
			path: "healthz".to_string(),
			port: "metrics".to_string(),
		});

		let errors = spec.validate().unwrap_err();

		assert!(errors.has_error_at("healthCheck.port"));
		assert!(errors.has_error_at("healthCheck.path"));
	}

	#[test]
	fn secret_references_must_resolve_to_an_auth_client() {
		let mut spec = AppSpec::new("grafana", "grafana/grafana");
		spec.env = vec![EnvVar::secret("OAUTH_SECRET", "grafana", "clientSecret")];

		let errors = spec.validate().unwrap_err();
		assert!(errors.has_error_at("env[0].secretRef.name"));

		spec.additional_resources = vec![auth_client("grafana")];
		assert!(spec.validate().is_ok());
	}

	#[test]
	fn quantities_are_checked_per_dimension() {
		let errors = validate(json!({
			"name": "web",
			"image": "nginx",
			"resources": { "cpu": "1Gi", "memory": "5Xi" }
		}))
		.unwrap_err();

		assert!(errors.has_error_at("resources.cpu"));
		assert!(errors.has_error_at("resources.memory"));

		for memory in ["512Mi", "1Gi", "1"] {
			let mut spec = AppSpec::new("web", "nginx");
			spec.resources.memory = Some(memory.parse().unwrap());
			assert!(spec.validate().is_ok(), "{} should be accepted", memory);
		}
	}

	#[test]
	fn volumes_must_reference_a_declared_claim() {
		let mut spec = AppSpec::new("web", "nginx");
		spec.volumes = vec![VolumeMount {
			name: "data".to_string(),
			mount_path: "data".to_string(),
		}];

		let errors = spec.validate().unwrap_err();
		assert!(errors.has_error_at("volumes[0].name"));
		assert!(errors.has_error_at("volumes[0].mountPath"));

		spec.volumes[0].mount_path = "/data".to_string();
		spec.additional_resources = vec![AdditionalResource::PersistentVolumeClaim(
			VolumeClaimResource {
				name: "data".to_string(),
				storage: Quantity::parse("10Gi", Dimension::Memory).unwrap(),
				access_mode: Default::default(),
				storage_class_name: None,
			},
		)];
		assert!(spec.validate().is_ok());
	}

	#[test]
	fn additional_resources_are_unique_per_kind() {
		let mut spec = AppSpec::new("web", "nginx");
		spec.additional_resources = vec![auth_client("web"), auth_client("web")];

		let errors = spec.validate().unwrap_err();

		assert!(errors.has_error_at("additionalResources[1].name"));
		assert!(!errors.has_error_at("additionalResources[0].name"));
	}

	#[test]
	fn redirect_uris_must_be_absolute() {
		let mut spec = AppSpec::new("web", "nginx");
		spec.additional_resources = vec![AdditionalResource::AuthClient(AuthClientResource {
			name: "web".to_string(),
			redirect_uris: vec!["/callback".to_string()],
			post_logout_redirect_uris: vec![],
		})];

		let errors = spec.validate().unwrap_err();

		assert!(errors.has_error_at("additionalResources[0].redirectUris[0]"));
	}

	#[test]
	fn every_violation_is_reported() {
		let errors = AppSpec::from_yaml(
			r#"
name: Web_App
image: ""
ports:
  - name: http
    containerPort: 80
  - name: http
    containerPort: 80
ingress:
  port: https
"#,
		)
		.unwrap_err();

		assert!(errors.has_error_at("name"));
		assert!(errors.has_error_at("image"));
		assert!(errors.has_error_at("ports[1].name"));
		assert!(errors.has_error_at("ports[1].containerPort"));
		assert!(errors.has_error_at("ingress.port"));
	}

	#[test]
	fn malformed_yaml_is_reported_without_a_path() {
		let errors = AppSpec::from_yaml("name: [unterminated").unwrap_err();

		assert_eq!(errors.0.len(), 1);
		assert_eq!(errors.0[0].path, "");
	}
}
