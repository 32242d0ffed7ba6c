use std::collections::BTreeMap;

use k8s_openapi::api::{
	apps::v1::Deployment,
	core::v1::{Namespace, PersistentVolumeClaim, Service},
	networking::v1::Ingress,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// The custom resource for OAuth clients of an app
mod auth_client;
/// Converts app specs to manifests and back
mod codec;

pub use self::{auth_client::*, codec::*};

/// The label every object of an app carries, with the app's name as value
pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
/// The label marking objects as managed through the GitOps repository
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// The value of [`MANAGED_BY_LABEL`] for objects written by this project
pub const MANAGED_BY_VALUE: &str = "homelab";

/// The file name of the index manifest of an app
pub const KUSTOMIZATION_FILE_NAME: &str = "kustomization.yaml";

/// A kind of Kubernetes document that can be stored in an app's directory
pub trait Manifest: Serialize + DeserializeOwned + Clone {
	/// The `kind` of the document, as written in the manifest
	const KIND: &'static str;
	/// Whether an app has at most one document of this kind. Singletons are
	/// stored under a fixed file name, others are named after the object.
	const SINGLETON: bool;

	/// The `metadata.name` of the document, if it has one
	fn object_name(&self) -> Option<&str>;

	/// The canonical file name of the document within the app's directory
	fn file_name(&self) -> String {
		let kind = Self::KIND.to_lowercase();
		match self.object_name() {
			Some(name) if !Self::SINGLETON => format!("{}.{}.yaml", name, kind),
			_ => format!("{}.yaml", kind),
		}
	}
}

/// Implements [`Manifest`] for a type with an `ObjectMeta` in `metadata`
macro_rules! impl_manifest {
	($ty:ty, $kind:literal, $singleton:literal) => {
		impl Manifest for $ty {
			const KIND: &'static str = $kind;
			const SINGLETON: bool = $singleton;

			fn object_name(&self) -> Option<&str> {
				self.metadata.name.as_deref()
			}
		}
	};
}

impl_manifest!(Namespace, "Namespace", true);
impl_manifest!(Deployment, "Deployment", true);
impl_manifest!(Service, "Service", true);
impl_manifest!(Ingress, "Ingress", true);
impl_manifest!(AuthClient, "AuthClient", false);
impl_manifest!(PersistentVolumeClaim, "PersistentVolumeClaim", false);

/// The index of an app's directory, listing every other manifest file that
/// belongs to the app. The GitOps controller applies exactly these files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Kustomization {
	/// Always `kustomize.config.k8s.io/v1beta1`
	pub api_version: String,
	/// Always `Kustomization`
	pub kind: String,
	/// The file names of the manifests, relative to the app's directory
	#[serde(default)]
	pub resources: Vec<String>,
}

impl Kustomization {
	/// The `apiVersion` of kustomization files
	pub const API_VERSION: &'static str = "kustomize.config.k8s.io/v1beta1";

	/// Creates an index listing the given files, sorted
	pub fn new(resources: impl IntoIterator<Item = String>) -> Self {
		let mut resources = resources.into_iter().collect::<Vec<_>>();
		resources.sort();
		resources.dedup();
		Self {
			api_version: Self::API_VERSION.to_string(),
			kind: <Self as Manifest>::KIND.to_string(),
			resources,
		}
	}
}

impl Manifest for Kustomization {
	const KIND: &'static str = "Kustomization";
	const SINGLETON: bool = true;

	fn object_name(&self) -> Option<&str> {
		None
	}
}

/// Any document that can be stored in an app's directory
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestDocument {
	/// The namespace of the app
	Namespace(Namespace),
	/// The deployment running the app's container
	Deployment(Deployment),
	/// The service exposing the app's ports
	Service(Service),
	/// The ingress routing external traffic to the app
	Ingress(Ingress),
	/// The index of the app's directory
	Kustomization(Kustomization),
	/// An OAuth client of the app
	AuthClient(AuthClient),
	/// A persistent volume claim of the app
	PersistentVolumeClaim(PersistentVolumeClaim),
}

impl ManifestDocument {
	/// The `kind` of the document
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Namespace(_) => Namespace::KIND,
			Self::Deployment(_) => Deployment::KIND,
			Self::Service(_) => Service::KIND,
			Self::Ingress(_) => Ingress::KIND,
			Self::Kustomization(_) => <Kustomization as Manifest>::KIND,
			Self::AuthClient(_) => AuthClient::KIND,
			Self::PersistentVolumeClaim(_) => PersistentVolumeClaim::KIND,
		}
	}

	/// The canonical file name of the document within the app's directory
	pub fn file_name(&self) -> String {
		match self {
			Self::Namespace(doc) => doc.file_name(),
			Self::Deployment(doc) => doc.file_name(),
			Self::Service(doc) => doc.file_name(),
			Self::Ingress(doc) => doc.file_name(),
			Self::Kustomization(doc) => doc.file_name(),
			Self::AuthClient(doc) => doc.file_name(),
			Self::PersistentVolumeClaim(doc) => doc.file_name(),
		}
	}

	/// Serializes the document as YAML
	pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
		match self {
			Self::Namespace(doc) => serde_yaml::to_string(doc),
			Self::Deployment(doc) => serde_yaml::to_string(doc),
			Self::Service(doc) => serde_yaml::to_string(doc),
			Self::Ingress(doc) => serde_yaml::to_string(doc),
			Self::Kustomization(doc) => serde_yaml::to_string(doc),
			Self::AuthClient(doc) => serde_yaml::to_string(doc),
			Self::PersistentVolumeClaim(doc) => serde_yaml::to_string(doc),
		}
	}

	/// Serializes the document as a JSON value
	pub fn to_json_value(&self) -> Result<serde_json::Value, serde_json::Error> {
		match self {
			Self::Namespace(doc) => serde_json::to_value(doc),
			Self::Deployment(doc) => serde_json::to_value(doc),
			Self::Service(doc) => serde_json::to_value(doc),
			Self::Ingress(doc) => serde_json::to_value(doc),
			Self::Kustomization(doc) => serde_json::to_value(doc),
			Self::AuthClient(doc) => serde_json::to_value(doc),
			Self::PersistentVolumeClaim(doc) => serde_json::to_value(doc),
		}
	}
}

/// A document of a kind an app can have any number of
#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalManifest {
	/// An OAuth client of the app
	AuthClient(AuthClient),
	/// A persistent volume claim of the app
	PersistentVolumeClaim(PersistentVolumeClaim),
}

impl From<AdditionalManifest> for ManifestDocument {
	fn from(manifest: AdditionalManifest) -> Self {
		match manifest {
			AdditionalManifest::AuthClient(doc) => Self::AuthClient(doc),
			AdditionalManifest::PersistentVolumeClaim(doc) => Self::PersistentVolumeClaim(doc),
		}
	}
}

/// Every manifest that belongs to one app
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSet {
	/// The namespace the app runs in
	pub namespace: Namespace,
	/// The deployment running the app's container
	pub deployment: Deployment,
	/// The service exposing the app's ports. Only present if the app declares
	/// any ports
	pub service: Option<Service>,
	/// The ingress routing traffic to the app. Only present if the app has an
	/// ingress binding
	pub ingress: Option<Ingress>,
	/// The index of the app's directory
	pub kustomization: Kustomization,
	/// OAuth clients and volume claims, in the order they were declared
	pub additional: Vec<AdditionalManifest>,
}

impl ManifestSet {
	/// Every document of the set except the kustomization, which is derived
	/// from the others when the set is written
	pub fn resources(&self) -> Vec<ManifestDocument> {
		let mut documents = vec![
			ManifestDocument::Namespace(self.namespace.clone()),
			ManifestDocument::Deployment(self.deployment.clone()),
		];
		if let Some(service) = &self.service {
			documents.push(ManifestDocument::Service(service.clone()));
		}
		if let Some(ingress) = &self.ingress {
			documents.push(ManifestDocument::Ingress(ingress.clone()));
		}
		documents.extend(self.additional.iter().cloned().map(ManifestDocument::from));
		documents
	}

	/// Rebuilds the kustomization so that it lists exactly the resources of
	/// the set
	pub fn reindex(&mut self) {
		self.kustomization =
			Kustomization::new(self.resources().iter().map(ManifestDocument::file_name));
	}

	/// Renders the whole set, kustomization included, as one multi-document
	/// YAML stream
	pub fn to_yaml_stream(&self) -> Result<String, serde_yaml::Error> {
		let mut documents = self.resources();
		documents.push(ManifestDocument::Kustomization(self.kustomization.clone()));
		let mut rendered = Vec::with_capacity(documents.len());
		for document in documents {
			rendered.push(format!("# {}\n{}", document.file_name(), document.to_yaml()?));
		}
		Ok(rendered.join("---\n"))
	}
}

/// The common labels of every object belonging to an app
pub fn app_labels(app_name: &str) -> BTreeMap<String, String> {
	BTreeMap::from([
		(APP_NAME_LABEL.to_string(), app_name.to_string()),
		(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
	])
}

/// The label selector matching the pods of an app
pub fn app_selector(app_name: &str) -> BTreeMap<String, String> {
	BTreeMap::from([(APP_NAME_LABEL.to_string(), app_name.to_string())])
}
