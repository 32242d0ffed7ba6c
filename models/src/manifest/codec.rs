use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::{
	api::{
		apps::v1::{Deployment, DeploymentSpec},
		core::v1::{
			Container,
			ContainerPort,
			EnvVar as KubeEnvVar,
			EnvVarSource as KubeEnvVarSource,
			HTTPGetAction,
			Namespace,
			PersistentVolumeClaim,
			PersistentVolumeClaimSpec,
			PersistentVolumeClaimVolumeSource,
			PodSpec,
			PodTemplateSpec,
			Probe,
			ResourceRequirements,
			SecretKeySelector,
			Service,
			ServicePort,
			ServiceSpec,
			TCPSocketAction,
			Volume,
			VolumeMount as KubeVolumeMount,
			VolumeResourceRequirements,
		},
		networking::v1::{
			HTTPIngressPath,
			HTTPIngressRuleValue,
			Ingress,
			IngressBackend,
			IngressRule,
			IngressServiceBackend,
			IngressSpec,
			ServiceBackendPort,
		},
	},
	apimachinery::pkg::{
		api::resource::Quantity as KubeQuantity,
		apis::meta::v1::LabelSelector,
		util::intstr::IntOrString,
	},
};
use kube::core::ObjectMeta;

use super::{
	app_labels,
	app_selector,
	AdditionalManifest,
	AuthClient,
	AuthClientSpec,
	Kustomization,
	Manifest,
	ManifestSet,
};
use crate::{
	app::{
		AccessMode,
		AdditionalResource,
		AppPort,
		AppSpec,
		AuthClientResource,
		EnvVar,
		EnvVarSource,
		HealthCheck,
		IngressBinding,
		PortProtocol,
		Quantity,
		ResourceLimits,
		SecretRef,
		VolumeClaimResource,
		VolumeMount,
	},
	error::SchemaError,
};

/// The resource name of the CPU limit
const CPU: &str = "cpu";
/// The resource name of the memory limit
const MEMORY: &str = "memory";
/// The resource name of a volume claim's size
const STORAGE: &str = "storage";

/// Derives every manifest of an app from its spec. The result only depends on
/// the app spec: the namespace, deployment, service and ingress are all named
/// after the app, and the kustomization lists every other document.
///
/// The replica count is left unset so that merging the deployment onto an
/// existing one keeps whatever count the cluster is running with.
pub fn to_manifests(spec: &AppSpec) -> ManifestSet {
	let name = spec.name.as_str();

	let mut set = ManifestSet {
		namespace: Namespace {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				labels: Some(app_labels(name)),
				..ObjectMeta::default()
			},
			..Namespace::default()
		},
		deployment: to_deployment(spec),
		service: (!spec.ports.is_empty()).then(|| to_service(spec)),
		ingress: spec.ingress.as_ref().map(|ingress| to_ingress(spec, ingress)),
		kustomization: Kustomization::new(vec![]),
		additional: spec
			.additional_resources
			.iter()
			.map(|resource| to_additional_manifest(name, resource))
			.collect(),
	};
	set.reindex();
	set
}

/// Recovers an app spec from its manifests. This is the inverse of
/// [`to_manifests`], and fails if a manifest is missing something the app spec
/// needs.
pub fn from_manifests(set: &ManifestSet) -> Result<AppSpec, SchemaError> {
	let deployment = &set.deployment;
	let kind = Deployment::KIND;

	let name = deployment
		.metadata
		.name
		.clone()
		.ok_or_else(|| SchemaError::new(kind, "metadata.name", "is missing"))?;
	let pod = deployment
		.spec
		.as_ref()
		.and_then(|spec| spec.template.spec.as_ref())
		.ok_or_else(|| SchemaError::new(kind, "spec.template.spec", "is missing"))?;
	let container = pod.containers.first().ok_or_else(|| {
		SchemaError::new(
			kind,
			"spec.template.spec.containers",
			"must have at least one container",
		)
	})?;

	let image = container.image.clone().ok_or_else(|| {
		SchemaError::new(kind, "spec.template.spec.containers[0].image", "is missing")
	})?;

	let ports = container
		.ports
		.iter()
		.flatten()
		.enumerate()
		.map(|(index, port)| from_container_port(index, port))
		.collect::<Result<Vec<_>, _>>()?;

	let env = container
		.env
		.iter()
		.flatten()
		.enumerate()
		.map(|(index, env)| from_env_var(index, env))
		.collect::<Result<Vec<_>, _>>()?;

	let limits = container
		.resources
		.as_ref()
		.and_then(|resources| resources.limits.as_ref());
	let resources = ResourceLimits {
		cpu: limits.and_then(|limits| limits.get(CPU)).map(Quantity::from),
		memory: limits
			.and_then(|limits| limits.get(MEMORY))
			.map(Quantity::from),
	};

	let health_check = container
		.liveness_probe
		.as_ref()
		.map(|probe| from_probe(probe, &ports))
		.transpose()?;

	let claims = pod
		.volumes
		.iter()
		.flatten()
		.filter_map(|volume| {
			volume
				.persistent_volume_claim
				.as_ref()
				.map(|claim| (volume.name.as_str(), claim.claim_name.as_str()))
		})
		.collect::<BTreeMap<_, _>>();
	let volumes = container
		.volume_mounts
		.iter()
		.flatten()
		.enumerate()
		.map(|(index, mount)| {
			let claim_name = claims.get(mount.name.as_str()).ok_or_else(|| {
				SchemaError::new(
					kind,
					format!("spec.template.spec.containers[0].volumeMounts[{}].name", index),
					format!(
						"`{}` is not a volume backed by a persistent volume claim",
						mount.name
					),
				)
			})?;
			Ok(VolumeMount {
				name: claim_name.to_string(),
				mount_path: mount.mount_path.clone(),
			})
		})
		.collect::<Result<Vec<_>, SchemaError>>()?;

	let ingress = set
		.ingress
		.as_ref()
		.map(|ingress| from_ingress(ingress, set.service.as_ref(), &ports))
		.transpose()?;

	let additional_resources = set
		.additional
		.iter()
		.map(from_additional_manifest)
		.collect::<Result<Vec<_>, _>>()?;

	Ok(AppSpec {
		name,
		image,
		ports,
		env,
		resources,
		ingress,
		health_check,
		volumes,
		additional_resources,
	})
}

/// The deployment running the app's single container
fn to_deployment(spec: &AppSpec) -> Deployment {
	let name = spec.name.as_str();

	let limits = [
		(CPU, spec.resources.cpu.as_ref()),
		(MEMORY, spec.resources.memory.as_ref()),
	]
	.into_iter()
	.filter_map(|(resource, quantity)| Some((resource.to_string(), KubeQuantity::from(quantity?))))
	.collect::<BTreeMap<_, _>>();

	let probe = spec.health_check.as_ref().map(to_probe);

	let container = Container {
		name: name.to_string(),
		image: Some(spec.image.clone()),
		ports: (!spec.ports.is_empty()).then(|| {
			spec.ports
				.iter()
				.map(|port| ContainerPort {
					name: Some(port.name.clone()),
					container_port: i32::from(port.container_port),
					protocol: Some(port.protocol.to_string()),
					..ContainerPort::default()
				})
				.collect()
		}),
		env: (!spec.env.is_empty()).then(|| spec.env.iter().map(to_env_var).collect()),
		resources: (!limits.is_empty()).then(|| ResourceRequirements {
			limits: Some(limits),
			..ResourceRequirements::default()
		}),
		liveness_probe: probe.clone(),
		readiness_probe: probe,
		volume_mounts: (!spec.volumes.is_empty()).then(|| {
			spec.volumes
				.iter()
				.map(|volume| KubeVolumeMount {
					name: volume.name.clone(),
					mount_path: volume.mount_path.clone(),
					..KubeVolumeMount::default()
				})
				.collect()
		}),
		..Container::default()
	};

	Deployment {
		metadata: ObjectMeta {
			name: Some(name.to_string()),
			namespace: Some(name.to_string()),
			labels: Some(app_labels(name)),
			..ObjectMeta::default()
		},
		spec: Some(DeploymentSpec {
			selector: LabelSelector {
				match_labels: Some(app_selector(name)),
				..LabelSelector::default()
			},
			template: PodTemplateSpec {
				metadata: Some(ObjectMeta {
					labels: Some(app_labels(name)),
					..ObjectMeta::default()
				}),
				spec: Some(PodSpec {
					containers: vec![container],
					volumes: (!spec.volumes.is_empty()).then(|| to_pod_volumes(spec)),
					..PodSpec::default()
				}),
			},
			..DeploymentSpec::default()
		}),
		..Deployment::default()
	}
}

/// One pod volume per claim, in the order each claim is first mounted. A
/// claim mounted at several paths is still a single volume.
fn to_pod_volumes(spec: &AppSpec) -> Vec<Volume> {
	let mut seen = BTreeSet::new();
	spec.volumes
		.iter()
		.filter(|volume| seen.insert(volume.name.as_str()))
		.map(|volume| Volume {
			name: volume.name.clone(),
			persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
				claim_name: volume.name.clone(),
				..PersistentVolumeClaimVolumeSource::default()
			}),
			..Volume::default()
		})
		.collect()
}

/// Maps an env var to its literal or `secretKeyRef` form
fn to_env_var(env: &EnvVar) -> KubeEnvVar {
	match &env.source {
		EnvVarSource::Value(value) => KubeEnvVar {
			name: env.name.clone(),
			value: Some(value.clone()),
			..KubeEnvVar::default()
		},
		EnvVarSource::SecretRef(secret) => KubeEnvVar {
			name: env.name.clone(),
			value_from: Some(KubeEnvVarSource {
				secret_key_ref: Some(SecretKeySelector {
					name: Some(secret.name.clone()),
					key: secret.key.clone(),
					..SecretKeySelector::default()
				}),
				..KubeEnvVarSource::default()
			}),
			..KubeEnvVar::default()
		},
	}
}

/// The probe used for both liveness and readiness
fn to_probe(health_check: &HealthCheck) -> Probe {
	match health_check {
		HealthCheck::Http { path, port } => Probe {
			http_get: Some(HTTPGetAction {
				path: Some(path.clone()),
				port: IntOrString::String(port.clone()),
				..HTTPGetAction::default()
			}),
			..Probe::default()
		},
		HealthCheck::Tcp { port } => Probe {
			tcp_socket: Some(TCPSocketAction {
				port: IntOrString::String(port.clone()),
				..TCPSocketAction::default()
			}),
			..Probe::default()
		},
	}
}

/// The service exposing every declared port, targeting ports by name
fn to_service(spec: &AppSpec) -> Service {
	let name = spec.name.as_str();
	Service {
		metadata: ObjectMeta {
			name: Some(name.to_string()),
			namespace: Some(name.to_string()),
			labels: Some(app_labels(name)),
			..ObjectMeta::default()
		},
		spec: Some(ServiceSpec {
			selector: Some(app_selector(name)),
			ports: Some(
				spec.ports
					.iter()
					.map(|port| ServicePort {
						name: Some(port.name.clone()),
						port: i32::from(port.container_port),
						target_port: Some(IntOrString::String(port.name.clone())),
						protocol: Some(port.protocol.to_string()),
						..ServicePort::default()
					})
					.collect(),
			),
			..ServiceSpec::default()
		}),
		..Service::default()
	}
}

/// The ingress routing every path of the host to the bound port
fn to_ingress(spec: &AppSpec, ingress: &IngressBinding) -> Ingress {
	let name = spec.name.as_str();
	Ingress {
		metadata: ObjectMeta {
			name: Some(name.to_string()),
			namespace: Some(name.to_string()),
			labels: Some(app_labels(name)),
			..ObjectMeta::default()
		},
		spec: Some(IngressSpec {
			rules: Some(vec![IngressRule {
				host: ingress.host.clone(),
				http: Some(HTTPIngressRuleValue {
					paths: vec![HTTPIngressPath {
						path: Some("/".to_string()),
						path_type: "Prefix".to_string(),
						backend: IngressBackend {
							service: Some(IngressServiceBackend {
								name: name.to_string(),
								port: Some(ServiceBackendPort {
									name: Some(ingress.port.clone()),
									number: None,
								}),
							}),
							..IngressBackend::default()
						},
					}],
				}),
			}]),
			..IngressSpec::default()
		}),
		..Ingress::default()
	}
}

/// The OAuth client or volume claim document of an additional resource
fn to_additional_manifest(app_name: &str, resource: &AdditionalResource) -> AdditionalManifest {
	let metadata = |name: &str| ObjectMeta {
		name: Some(name.to_string()),
		namespace: Some(app_name.to_string()),
		labels: Some(app_labels(app_name)),
		..ObjectMeta::default()
	};

	match resource {
		AdditionalResource::AuthClient(client) => AdditionalManifest::AuthClient(AuthClient {
			metadata: metadata(&client.name),
			spec: AuthClientSpec {
				redirect_uris: client.redirect_uris.clone(),
				post_logout_redirect_uris: client.post_logout_redirect_uris.clone(),
			},
		}),
		AdditionalResource::PersistentVolumeClaim(claim) => {
			AdditionalManifest::PersistentVolumeClaim(PersistentVolumeClaim {
				metadata: metadata(&claim.name),
				spec: Some(PersistentVolumeClaimSpec {
					access_modes: Some(vec![claim.access_mode.to_string()]),
					resources: Some(VolumeResourceRequirements {
						requests: Some(BTreeMap::from([(
							STORAGE.to_string(),
							KubeQuantity::from(&claim.storage),
						)])),
						..VolumeResourceRequirements::default()
					}),
					storage_class_name: claim.storage_class_name.clone(),
					..PersistentVolumeClaimSpec::default()
				}),
				..PersistentVolumeClaim::default()
			})
		}
	}
}

/// Recovers a declared port from a container port
fn from_container_port(index: usize, port: &ContainerPort) -> Result<AppPort, SchemaError> {
	let field = |name: &str| format!("spec.template.spec.containers[0].ports[{}].{}", index, name);

	let name = port
		.name
		.clone()
		.ok_or_else(|| SchemaError::new(Deployment::KIND, field("name"), "is missing"))?;
	let container_port = u16::try_from(port.container_port).map_err(|_| {
		SchemaError::new(
			Deployment::KIND,
			field("containerPort"),
			format!("{} is not a valid port number", port.container_port),
		)
	})?;
	let protocol = port
		.protocol
		.as_deref()
		.map(str::parse::<PortProtocol>)
		.transpose()
		.map_err(|_| {
			SchemaError::new(
				Deployment::KIND,
				field("protocol"),
				"must be either TCP or UDP",
			)
		})?
		.unwrap_or_default();

	Ok(AppPort {
		name,
		container_port,
		protocol,
	})
}

/// Recovers an env var from its literal or `secretKeyRef` form
fn from_env_var(index: usize, env: &KubeEnvVar) -> Result<EnvVar, SchemaError> {
	let field = format!("spec.template.spec.containers[0].env[{}]", index);

	if let Some(value) = &env.value {
		return Ok(EnvVar::literal(&env.name, value));
	}

	let secret = env
		.value_from
		.as_ref()
		.and_then(|source| source.secret_key_ref.as_ref())
		.ok_or_else(|| {
			SchemaError::new(
				Deployment::KIND,
				field.clone(),
				"must have either a value or a secretKeyRef",
			)
		})?;
	let secret_name = secret.name.clone().ok_or_else(|| {
		SchemaError::new(
			Deployment::KIND,
			format!("{}.valueFrom.secretKeyRef.name", field),
			"is missing",
		)
	})?;

	Ok(EnvVar {
		name: env.name.clone(),
		source: EnvVarSource::SecretRef(SecretRef {
			name: secret_name,
			key: secret.key.clone(),
		}),
	})
}

/// Probes reference ports by name, but hand-written manifests may use the
/// number instead
fn port_name_of(
	port: &IntOrString,
	ports: &[AppPort],
	kind: &'static str,
	field: &str,
) -> Result<String, SchemaError> {
	match port {
		IntOrString::String(name) => Ok(name.clone()),
		IntOrString::Int(number) => ports
			.iter()
			.find(|port| i32::from(port.container_port) == *number)
			.map(|port| port.name.clone())
			.ok_or_else(|| {
				SchemaError::new(
					kind,
					field,
					format!("port {} is not one of the container's ports", number),
				)
			}),
	}
}

/// Recovers the health check from the liveness probe
fn from_probe(probe: &Probe, ports: &[AppPort]) -> Result<HealthCheck, SchemaError> {
	let field = "spec.template.spec.containers[0].livenessProbe";

	if let Some(http_get) = &probe.http_get {
		Ok(HealthCheck::Http {
			path: http_get.path.clone().unwrap_or_else(|| "/".to_string()),
			port: port_name_of(
				&http_get.port,
				ports,
				Deployment::KIND,
				&format!("{}.httpGet.port", field),
			)?,
		})
	} else if let Some(tcp_socket) = &probe.tcp_socket {
		Ok(HealthCheck::Tcp {
			port: port_name_of(
				&tcp_socket.port,
				ports,
				Deployment::KIND,
				&format!("{}.tcpSocket.port", field),
			)?,
		})
	} else {
		Err(SchemaError::new(
			Deployment::KIND,
			field,
			"only httpGet and tcpSocket probes are supported",
		))
	}
}

/// Recovers the ingress binding, mapping a numbered backend port back to its
/// name through the service
fn from_ingress(
	ingress: &Ingress,
	service: Option<&Service>,
	ports: &[AppPort],
) -> Result<IngressBinding, SchemaError> {
	let kind = Ingress::KIND;

	let rule = ingress
		.spec
		.as_ref()
		.and_then(|spec| spec.rules.as_ref())
		.and_then(|rules| rules.first())
		.ok_or_else(|| SchemaError::new(kind, "spec.rules", "must have at least one rule"))?;
	let backend_port = rule
		.http
		.as_ref()
		.and_then(|http| http.paths.first())
		.and_then(|path| path.backend.service.as_ref())
		.and_then(|service| service.port.as_ref())
		.ok_or_else(|| {
			SchemaError::new(
				kind,
				"spec.rules[0].http.paths[0].backend.service.port",
				"is missing",
			)
		})?;

	let port = match (&backend_port.name, backend_port.number) {
		(Some(name), _) => name.clone(),
		(None, Some(number)) => service
			.and_then(|service| service.spec.as_ref())
			.and_then(|spec| spec.ports.as_ref())
			.and_then(|service_ports| {
				service_ports
					.iter()
					.find(|service_port| service_port.port == number)
			})
			.and_then(|service_port| service_port.name.clone())
			.or_else(|| {
				ports.iter()
					.find(|port| i32::from(port.container_port) == number)
					.map(|port| port.name.clone())
			})
			.ok_or_else(|| {
				SchemaError::new(
					kind,
					"spec.rules[0].http.paths[0].backend.service.port.number",
					format!("service port {} does not exist", number),
				)
			})?,
		(None, None) => {
			return Err(SchemaError::new(
				kind,
				"spec.rules[0].http.paths[0].backend.service.port",
				"must have either a name or a number",
			))
		}
	};

	Ok(IngressBinding {
		port,
		host: rule.host.clone(),
	})
}

/// Recovers an additional resource from its document
fn from_additional_manifest(manifest: &AdditionalManifest) -> Result<AdditionalResource, SchemaError> {
	match manifest {
		AdditionalManifest::AuthClient(client) => {
			let name = client
				.metadata
				.name
				.clone()
				.ok_or_else(|| SchemaError::new(AuthClient::KIND, "metadata.name", "is missing"))?;
			Ok(AdditionalResource::AuthClient(AuthClientResource {
				name,
				redirect_uris: client.spec.redirect_uris.clone(),
				post_logout_redirect_uris: client.spec.post_logout_redirect_uris.clone(),
			}))
		}
		AdditionalManifest::PersistentVolumeClaim(claim) => {
			let kind = PersistentVolumeClaim::KIND;
			let name = claim
				.metadata
				.name
				.clone()
				.ok_or_else(|| SchemaError::new(kind, "metadata.name", "is missing"))?;
			let spec = claim
				.spec
				.as_ref()
				.ok_or_else(|| SchemaError::new(kind, "spec", "is missing"))?;
			let storage = spec
				.resources
				.as_ref()
				.and_then(|resources| resources.requests.as_ref())
				.and_then(|requests| requests.get(STORAGE))
				.map(Quantity::from)
				.ok_or_else(|| {
					SchemaError::new(kind, "spec.resources.requests.storage", "is missing")
				})?;
			let access_mode = spec
				.access_modes
				.as_ref()
				.and_then(|modes| modes.first())
				.map(|mode| {
					mode.parse::<AccessMode>().map_err(|_| {
						SchemaError::new(
							kind,
							"spec.accessModes[0]",
							format!("`{}` is not a known access mode", mode),
						)
					})
				})
				.transpose()?
				.unwrap_or_default();

			Ok(AdditionalResource::PersistentVolumeClaim(VolumeClaimResource {
				name,
				storage,
				access_mode,
				storage_class_name: spec.storage_class_name.clone(),
			}))
		}
	}
}
