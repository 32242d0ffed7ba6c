use std::sync::Arc;

use crate::{
	service::{apps_prefix, ClusterClient, FileStore, GitPublisher},
	utils::{config::AppConfig, lock::AppLocks},
};

/// The global state of the application. Every handle in here is created once
/// at start-up and shared by every request.
#[derive(Clone)]
pub struct AppState {
	/// The application configuration.
	pub config: Arc<AppConfig>,
	/// The manifests of every app, on disk
	pub store: FileStore,
	/// Commits and pushes changes to the GitOps repository
	pub publisher: GitPublisher,
	/// The live cluster
	pub cluster: Arc<dyn ClusterClient>,
	/// Serializes writes to the same app
	pub locks: AppLocks,
}

impl AppState {
	/// Builds the state from the configuration and a cluster client
	pub fn new(config: AppConfig, cluster: Arc<dyn ClusterClient>) -> Self {
		let store = FileStore::new(config.apps_dir());
		let publisher = GitPublisher::new(
			&config.project_dir,
			apps_prefix(&config.cluster_name),
			config.git.clone(),
		);
		Self {
			config: Arc::new(config),
			store,
			publisher,
			cluster,
			locks: AppLocks::default(),
		}
	}
}
