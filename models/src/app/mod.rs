use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Resource quantities such as `512Mi` or `500m`, along with the unit
/// allow-lists for each dimension
mod quantity;
/// The rules an app spec must satisfy before it is turned into manifests
mod validate;

pub use self::{quantity::*, validate::*};

/// The user-facing description of a workload running on the cluster. This is
/// the source of truth for the desired state of an app; the manifests in the
/// GitOps repository are derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
	/// Name of the app. This is also the name of the namespace, the deployment,
	/// the service and the ingress of the app, and cannot be changed once the
	/// app has been created.
	pub name: String,
	/// The container image to run, such as `nginx:latest`
	pub image: String,
	/// The ports the container listens on. Each port is referred to by name
	/// from the ingress and the health check
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub ports: Vec<AppPort>,
	/// Environment variables passed to the container, in order
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub env: Vec<EnvVar>,
	/// CPU and memory limits of the container
	#[serde(default, skip_serializing_if = "ResourceLimits::is_empty")]
	pub resources: ResourceLimits,
	/// Exposes one of the ports through the cluster's ingress controller
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ingress: Option<IngressBinding>,
	/// How the cluster checks that the container is healthy
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub health_check: Option<HealthCheck>,
	/// Persistent volumes mounted into the container
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub volumes: Vec<VolumeMount>,
	/// Extra resources that belong to the app, such as OAuth clients and
	/// persistent volume claims
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub additional_resources: Vec<AdditionalResource>,
}

impl AppSpec {
	/// Creates a spec with only the required fields set
	pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			image: image.into(),
			ports: vec![],
			env: vec![],
			resources: ResourceLimits::default(),
			ingress: None,
			health_check: None,
			volumes: vec![],
			additional_resources: vec![],
		}
	}

	/// Finds a declared port by its name
	pub fn port(&self, name: &str) -> Option<&AppPort> {
		self.ports.iter().find(|port| port.name == name)
	}

	/// All the OAuth clients declared in the additional resources
	pub fn auth_clients(&self) -> impl Iterator<Item = &AuthClientResource> {
		self.additional_resources
			.iter()
			.filter_map(|resource| match resource {
				AdditionalResource::AuthClient(client) => Some(client),
				AdditionalResource::PersistentVolumeClaim(_) => None,
			})
	}

	/// All the persistent volume claims declared in the additional resources
	pub fn volume_claims(&self) -> impl Iterator<Item = &VolumeClaimResource> {
		self.additional_resources
			.iter()
			.filter_map(|resource| match resource {
				AdditionalResource::AuthClient(_) => None,
				AdditionalResource::PersistentVolumeClaim(claim) => Some(claim),
			})
	}
}

/// A named port the container listens on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppPort {
	/// The name of the port, unique within the app
	pub name: String,
	/// The port number, unique within the app
	pub container_port: u16,
	/// The protocol of the port. Defaults to TCP
	#[serde(default, skip_serializing_if = "PortProtocol::is_default")]
	pub protocol: PortProtocol,
}

/// The protocol of a port
#[derive(
	Debug,
	Clone,
	Copy,
	Default,
	Serialize,
	Deserialize,
	PartialEq,
	Eq,
	JsonSchema,
	strum::EnumString,
	strum::Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum PortProtocol {
	/// TCP
	#[default]
	Tcp,
	/// UDP
	Udp,
}

impl PortProtocol {
	/// Used to keep the default protocol out of serialized specs
	fn is_default(&self) -> bool {
		*self == Self::default()
	}
}

/// An environment variable passed to the container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
	/// Name of the variable
	pub name: String,
	/// Where the value of the variable comes from
	#[serde(flatten)]
	pub source: EnvVarSource,
}

impl EnvVar {
	/// An environment variable with a literal value
	pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			source: EnvVarSource::Value(value.into()),
		}
	}

	/// An environment variable read from the secret of an OAuth client
	pub fn secret(
		name: impl Into<String>,
		secret_name: impl Into<String>,
		key: impl Into<String>,
	) -> Self {
		Self {
			name: name.into(),
			source: EnvVarSource::SecretRef(SecretRef {
				name: secret_name.into(),
				key: key.into(),
			}),
		}
	}
}

/// The value of an environment variable can either be a literal string or a
/// reference to a key of a secret
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum EnvVarSource {
	/// A literal value
	Value(String),
	/// A key of the secret created for an OAuth client of the app
	SecretRef(SecretRef),
}

/// A reference to a key of a secret
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
	/// The name of the secret. This is the name of an [`AuthClientResource`]
	/// declared in the app's additional resources
	pub name: String,
	/// The key within the secret, such as `clientSecret`
	pub key: String,
}

/// CPU and memory limits of the container
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
	/// The CPU limit, such as `500m` or `1`
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cpu: Option<Quantity>,
	/// The memory limit, such as `256Mi`
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub memory: Option<Quantity>,
}

impl ResourceLimits {
	/// Whether neither limit is set
	pub fn is_empty(&self) -> bool {
		self.cpu.is_none() && self.memory.is_none()
	}
}

/// Exposes a port of the app through the ingress controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressBinding {
	/// The name of the port to expose
	pub port: String,
	/// The host name to route to the app. If not set, the ingress matches any
	/// host
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub host: Option<String>,
}

/// How the cluster checks the health of the container. The same check is used
/// for both liveness and readiness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HealthCheck {
	/// An HTTP GET request to the given path must succeed
	Http {
		/// The path to request, such as `/healthz`
		path: String,
		/// The name of the port to send the request to
		port: String,
	},
	/// A TCP connection to the port must succeed
	Tcp {
		/// The name of the port to connect to
		port: String,
	},
}

impl HealthCheck {
	/// The name of the port the check is made against
	pub fn port(&self) -> &str {
		match self {
			Self::Http { port, .. } | Self::Tcp { port } => port,
		}
	}
}

/// A persistent volume mounted into the container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
	/// The name of the persistent volume claim to mount. This must be a
	/// [`VolumeClaimResource`] declared in the app's additional resources
	pub name: String,
	/// The absolute path to mount the volume at
	pub mount_path: String,
}

/// A resource that belongs to the app, besides its deployment, service and
/// ingress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(tag = "kind")]
pub enum AdditionalResource {
	/// An OAuth client registered with the identity provider
	AuthClient(AuthClientResource),
	/// A persistent volume claim
	PersistentVolumeClaim(VolumeClaimResource),
}

impl AdditionalResource {
	/// The name of the resource
	pub fn name(&self) -> &str {
		match self {
			Self::AuthClient(client) => &client.name,
			Self::PersistentVolumeClaim(claim) => &claim.name,
		}
	}

	/// The kind of the resource, as written in the manifests
	pub fn kind(&self) -> &'static str {
		match self {
			Self::AuthClient(_) => "AuthClient",
			Self::PersistentVolumeClaim(_) => "PersistentVolumeClaim",
		}
	}
}

/// An OAuth client for the app. The identity provider's operator creates a
/// secret with the same name holding the client's credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthClientResource {
	/// Name of the client, and of the secret holding its credentials
	pub name: String,
	/// The URIs the identity provider may redirect to after a login
	pub redirect_uris: Vec<String>,
	/// The URIs the identity provider may redirect to after a logout
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub post_logout_redirect_uris: Vec<String>,
}

/// A persistent volume claim for the app
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimResource {
	/// Name of the claim
	pub name: String,
	/// The requested size, such as `10Gi`
	pub storage: Quantity,
	/// The access mode of the claim. Defaults to `ReadWriteOnce`
	#[serde(default, skip_serializing_if = "AccessMode::is_default")]
	pub access_mode: AccessMode,
	/// The storage class to provision the volume from. Uses the cluster's
	/// default class if not set
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub storage_class_name: Option<String>,
}

/// The access mode of a persistent volume claim
#[derive(
	Debug,
	Clone,
	Copy,
	Default,
	Serialize,
	Deserialize,
	PartialEq,
	Eq,
	JsonSchema,
	strum::EnumString,
	strum::Display,
)]
pub enum AccessMode {
	/// Mounted read-write by a single node
	#[default]
	ReadWriteOnce,
	/// Mounted read-only by many nodes
	ReadOnlyMany,
	/// Mounted read-write by many nodes
	ReadWriteMany,
	/// Mounted read-write by a single pod
	ReadWriteOncePod,
}

impl AccessMode {
	/// Used to keep the default access mode out of serialized specs
	fn is_default(&self) -> bool {
		*self == Self::default()
	}
}

#[cfg(test)]
mod tests {
	use serde_test::{assert_tokens, Token};

	use super::*;

	#[test]
	fn literal_env_var_shape() {
		assert_tokens(
			&EnvVar::literal("LOG_LEVEL", "debug"),
			&[
				Token::Map { len: None },
				Token::Str("name"),
				Token::Str("LOG_LEVEL"),
				Token::Str("value"),
				Token::Str("debug"),
				Token::MapEnd,
			],
		);
	}

	#[test]
	fn secret_env_var_shape() {
		assert_tokens(
			&EnvVar::secret("OIDC_SECRET", "grafana", "clientSecret"),
			&[
				Token::Map { len: None },
				Token::Str("name"),
				Token::Str("OIDC_SECRET"),
				Token::Str("secretRef"),
				Token::Struct {
					name: "SecretRef",
					len: 2,
				},
				Token::Str("name"),
				Token::Str("grafana"),
				Token::Str("key"),
				Token::Str("clientSecret"),
				Token::StructEnd,
				Token::MapEnd,
			],
		);
	}

	#[test]
	fn spec_parses_from_yaml() {
		let spec: AppSpec = serde_yaml::from_str(
			r#"
name: grafana
image: grafana/grafana:11.0.0
ports:
  - name: http
    containerPort: 3000
env:
  - name: GF_LOG_LEVEL
    value: info
resources:
  memory: 256Mi
healthCheck:
  type: http
  path: /api/health
  port: http
additionalResources:
  - kind: PersistentVolumeClaim
    name: data
    storage: 1Gi
"#,
		)
		.unwrap();

		assert_eq!(spec.port("http").unwrap().container_port, 3000);
		assert_eq!(spec.port("http").unwrap().protocol, PortProtocol::Tcp);
		assert_eq!(spec.resources.cpu, None);
		assert_eq!(spec.health_check.as_ref().unwrap().port(), "http");
		assert_eq!(spec.volume_claims().count(), 1);
		assert_eq!(spec.auth_clients().count(), 0);
		assert_eq!(
			spec.volume_claims().next().unwrap().access_mode,
			AccessMode::ReadWriteOnce
		);
	}
}
