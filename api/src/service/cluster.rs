use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
use kube::{
	api::{ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams},
	core::ErrorResponse,
	Api,
	Client,
	Error,
};
use models::api::{AppStatus, ReplicaCounts};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{prelude::*, utils::config::FluxConfig};

/// The annotation Flux watches to reconcile a source on demand
pub const RECONCILE_ANNOTATION: &str = "reconcile.fluxcd.io/requestedAt";

/// Read access to the live state of the cluster, and the one write the API
/// needs: asking the GitOps controller to pull the repository again
#[async_trait]
pub trait ClusterClient: Send + Sync {
	/// The deployment with the given name, `None` if there is none
	async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, AppError>;

	/// The pods matching the given label selector
	async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, AppError>;

	/// Asks the GitOps controller to reconcile the repository now instead of
	/// waiting for its next poll
	async fn request_reconcile(&self) -> Result<(), AppError>;
}

/// Patches a resource, treating a missing resource as `None` instead of an
/// error
#[async_trait]
pub trait PatchOpt<T> {
	/// Patches the resource, `Ok(None)` if it does not exist
	async fn patch_opt<P>(&self, name: &str, pp: &PatchParams, patch: &Patch<P>) -> kube::Result<Option<T>>
	where
		P: Serialize + Debug + Send + Sync;
}

#[async_trait]
impl<T> PatchOpt<T> for Api<T>
where
	T: Clone + DeserializeOwned + Debug + Send + Sync,
{
	async fn patch_opt<P>(&self, name: &str, pp: &PatchParams, patch: &Patch<P>) -> kube::Result<Option<T>>
	where
		P: Serialize + Debug + Send + Sync,
	{
		match self.patch(name, pp, patch).await {
			Ok(obj) => Ok(Some(obj)),
			Err(Error::Api(ErrorResponse { code: 404, .. })) => Ok(None),
			Err(err) => Err(err),
		}
	}
}

/// A [`ClusterClient`] talking to the Kubernetes API. The client is created
/// once at start-up and shared by every request.
#[derive(Clone)]
pub struct KubeCluster {
	/// The shared connection to the API server
	client: Client,
	/// The Flux `GitRepository` to reconcile after a push
	flux: FluxConfig,
}

impl KubeCluster {
	/// Wraps an existing client
	pub fn new(client: Client, flux: FluxConfig) -> Self {
		Self { client, flux }
	}

	/// The resource definition of Flux's `GitRepository`
	fn git_repository_resource() -> ApiResource {
		ApiResource::from_gvk_with_plural(
			&GroupVersionKind::gvk("source.toolkit.fluxcd.io", "v1", "GitRepository"),
			"gitrepositories",
		)
	}
}

#[async_trait]
impl ClusterClient for KubeCluster {
	#[instrument(skip(self))]
	async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, AppError> {
		let deployment = Api::<Deployment>::namespaced(self.client.clone(), namespace)
			.get_opt(name)
			.await?;
		if deployment.is_none() {
			debug!("Deployment `{}/{}` not found", namespace, name);
		}
		Ok(deployment)
	}

	#[instrument(skip(self))]
	async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, AppError> {
		let pods = Api::<Pod>::namespaced(self.client.clone(), namespace)
			.list(&ListParams::default().labels(label_selector))
			.await?;
		Ok(pods.items)
	}

	#[instrument(skip(self))]
	async fn request_reconcile(&self) -> Result<(), AppError> {
		let now = OffsetDateTime::now_utc()
			.format(&Rfc3339)
			.map_err(|err| AppError::Internal(format!("unable to format timestamp: {}", err)))?;
		let patch = json!({
			"metadata": {
				"annotations": {
					RECONCILE_ANNOTATION: now,
				}
			}
		});

		let api: Api<DynamicObject> = Api::namespaced_with(
			self.client.clone(),
			&self.flux.namespace,
			&Self::git_repository_resource(),
		);
		let patched = api
			.patch_opt(&self.flux.name, &PatchParams::default(), &Patch::Merge(&patch))
			.await?;

		match patched {
			Some(_) => info!(
				"Requested reconciliation of GitRepository `{}/{}`",
				self.flux.namespace, self.flux.name
			),
			None => warn!(
				"GitRepository `{}/{}` not found, the change will be applied on the next poll",
				self.flux.namespace, self.flux.name
			),
		}
		Ok(())
	}
}

/// Derives the status of an app from its live deployment and pods.
///
/// An app without a deployment, or with a failed pod, is `Unknown`. An app
/// with fewer replicas than it asks for, or with a pod that is not running
/// yet, is `Pending`. Otherwise it is `Running`.
pub fn derive_status(deployment: Option<&Deployment>, pods: &[Pod]) -> (AppStatus, ReplicaCounts) {
	let Some(deployment) = deployment else {
		return (AppStatus::Unknown, ReplicaCounts::default());
	};

	let desired = deployment
		.spec
		.as_ref()
		.and_then(|spec| spec.replicas)
		.unwrap_or(1);
	let status = deployment.status.as_ref();
	let replicas = ReplicaCounts {
		desired,
		observed: status.and_then(|status| status.replicas).unwrap_or(0),
		ready: status
			.and_then(|status| status.ready_replicas)
			.unwrap_or(0),
	};

	let phases = pods
		.iter()
		.map(|pod| {
			pod.status
				.as_ref()
				.and_then(|status| status.phase.as_deref())
				.unwrap_or("Unknown")
		})
		.collect::<Vec<_>>();

	let app_status = if phases
		.iter()
		.any(|phase| matches!(*phase, "Failed" | "Unknown"))
	{
		AppStatus::Unknown
	} else if desired > replicas.observed ||
		phases.iter().any(|phase| *phase != "Running") ||
		(phases.is_empty() && desired > 0)
	{
		AppStatus::Pending
	} else {
		AppStatus::Running
	};

	(app_status, replicas)
}

/// An in-memory cluster for tests
#[cfg(test)]
pub mod fake {
	use std::{
		collections::{HashMap, HashSet},
		sync::{
			atomic::{AtomicUsize, Ordering},
			Mutex,
		},
	};

	use k8s_openapi::api::{
		apps::v1::{DeploymentSpec, DeploymentStatus},
		core::v1::PodStatus,
	};
	use kube::core::ObjectMeta;

	use super::*;

	/// A cluster whose deployments and pods are set up by the test
	#[derive(Default)]
	pub struct FakeCluster {
		/// Deployments keyed by namespace, each app has at most one
		deployments: HashMap<String, Deployment>,
		/// Pods keyed by namespace
		pods: HashMap<String, Vec<Pod>>,
		/// Namespaces whose requests fail as if the API was unreachable
		unreachable: HashSet<String>,
		/// Whether reconcile requests fail
		reconcile_fails: bool,
		/// The number of reconcile requests received
		reconciles: AtomicUsize,
		/// Every label selector pods were listed with
		selectors: Mutex<Vec<String>>,
	}

	impl FakeCluster {
		/// Adds a deployment with the given replica counts and one pod per
		/// phase
		pub fn with_app(mut self, name: &str, desired: i32, observed: i32, phases: &[&str]) -> Self {
			self.deployments.insert(name.to_string(), deployment(name, desired, observed));
			self.pods.insert(
				name.to_string(),
				phases.iter().map(|phase| pod(phase)).collect(),
			);
			self
		}

		/// Makes every request about the given app fail
		pub fn with_unreachable(mut self, name: &str) -> Self {
			self.unreachable.insert(name.to_string());
			self
		}

		/// Makes reconcile requests fail
		pub fn with_failing_reconcile(mut self) -> Self {
			self.reconcile_fails = true;
			self
		}

		/// The number of reconcile requests received so far
		pub fn reconciles(&self) -> usize {
			self.reconciles.load(Ordering::SeqCst)
		}

		/// Every label selector pods were listed with
		pub fn selectors(&self) -> Vec<String> {
			self.selectors.lock().map(|list| list.clone()).unwrap_or_default()
		}

		/// Fails if the namespace was marked unreachable
		fn check(&self, namespace: &str) -> Result<(), AppError> {
			if self.unreachable.contains(namespace) {
				Err(AppError::Kube(kube::Error::Api(ErrorResponse {
					status: "Failure".to_string(),
					message: "service unavailable".to_string(),
					reason: "ServiceUnavailable".to_string(),
					code: 503,
				})))
			} else {
				Ok(())
			}
		}
	}

	#[async_trait]
	impl ClusterClient for FakeCluster {
		async fn get_deployment(&self, namespace: &str, _name: &str) -> Result<Option<Deployment>, AppError> {
			self.check(namespace)?;
			Ok(self.deployments.get(namespace).cloned())
		}

		async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, AppError> {
			self.check(namespace)?;
			if let Ok(mut selectors) = self.selectors.lock() {
				selectors.push(label_selector.to_string());
			}
			Ok(self.pods.get(namespace).cloned().unwrap_or_default())
		}

		async fn request_reconcile(&self) -> Result<(), AppError> {
			self.reconciles.fetch_add(1, Ordering::SeqCst);
			if self.reconcile_fails {
				return Err(AppError::Internal("reconcile failed".to_string()));
			}
			Ok(())
		}
	}

	/// A deployment asking for `desired` replicas with `observed` of them
	/// created
	pub fn deployment(name: &str, desired: i32, observed: i32) -> Deployment {
		Deployment {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				namespace: Some(name.to_string()),
				..ObjectMeta::default()
			},
			spec: Some(DeploymentSpec {
				replicas: Some(desired),
				..DeploymentSpec::default()
			}),
			status: Some(DeploymentStatus {
				replicas: Some(observed),
				ready_replicas: Some(observed),
				..DeploymentStatus::default()
			}),
		}
	}

	/// A pod in the given phase
	pub fn pod(phase: &str) -> Pod {
		Pod {
			status: Some(PodStatus {
				phase: Some(phase.to_string()),
				..PodStatus::default()
			}),
			..Pod::default()
		}
	}
}
