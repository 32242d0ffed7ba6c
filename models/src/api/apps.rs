use serde::{Deserialize, Serialize};

use crate::app::AppSpec;

/// The live state of an app, as observed on the cluster
#[derive(
	Debug,
	Clone,
	Copy,
	Default,
	Serialize,
	Deserialize,
	PartialEq,
	Eq,
	Hash,
	strum::Display,
	strum::EnumString,
)]
pub enum AppStatus {
	/// The app is rolling out, scaling up, or some of its pods are not
	/// running yet
	Pending,
	/// Every desired replica is up and every pod is running
	Running,
	/// The app has no deployment on the cluster, or some of its pods failed
	#[default]
	Unknown,
}

/// Replica counts of an app's deployment
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaCounts {
	/// The number of replicas the deployment asks for
	pub desired: i32,
	/// The number of replicas the cluster has created
	pub observed: i32,
	/// The number of replicas that are ready
	pub ready: i32,
}

/// An app's spec, read from the GitOps repository, along with its live state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppDetails {
	/// The desired state of the app
	#[serde(flatten)]
	pub spec: AppSpec,
	/// The status derived from the live deployment and pods
	pub status: AppStatus,
	/// The replica counts of the live deployment
	pub replicas: ReplicaCounts,
}

/// The response body of `GET /health`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {}

/// The response body of `GET /apps`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListAppsResponse {
	/// Every app that could be read, sorted by name
	pub apps: Vec<AppDetails>,
}

/// The response body of `GET /apps/{name}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GetAppResponse {
	/// The requested app
	pub app: AppDetails,
}

/// The response body of `POST /apps` and `PUT /apps/{name}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SaveAppResponse {
	/// The app spec that was written to the repository
	pub app: AppSpec,
	/// The id of the commit holding the change, if anything changed
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub commit: Option<String>,
}
