use std::{
	fs,
	net::SocketAddr,
	path::{Path, PathBuf},
	sync::Arc,
};

use git2::{Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

use crate::{
	app::AppState,
	service::fake::FakeCluster,
	utils::config::{AppConfig, FluxConfig, GitConfig, RunningEnvironment},
};

/// The cluster name every test repository uses
pub const CLUSTER_NAME: &str = "home";

/// A working clone with one commit on `main`, and a bare `origin` that
/// already has that commit
pub fn init_repositories(root: &Path) -> (PathBuf, PathBuf) {
	let work = root.join("work");
	let remote = root.join("remote.git");

	let mut options = RepositoryInitOptions::new();
	options.initial_head("main");
	let repo = Repository::init_opts(&work, &options).unwrap();
	options.bare(true);
	Repository::init_opts(&remote, &options).unwrap();

	fs::write(work.join("README.md"), "homelab\n").unwrap();
	let mut index = repo.index().unwrap();
	index.add_path(Path::new("README.md")).unwrap();
	index.write().unwrap();
	let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
	let signature = Signature::now("Setup", "setup@homelab.local").unwrap();
	repo.commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])
		.unwrap();

	let mut origin = repo.remote("origin", remote.to_str().unwrap()).unwrap();
	origin.push(&["refs/heads/main:refs/heads/main"], None).unwrap();

	(work, remote)
}

/// The git settings tests publish with
pub fn git_config() -> GitConfig {
	GitConfig {
		remote: "origin".to_string(),
		branch: "main".to_string(),
		author_name: "Homelab Bot".to_string(),
		author_email: "bot@homelab.local".to_string(),
		username: "git".to_string(),
		token: None,
	}
}

/// The commit `main` points to in the repository at `path`
pub fn head_of(path: &Path) -> Oid {
	Repository::open(path)
		.unwrap()
		.refname_to_id("refs/heads/main")
		.unwrap()
}

/// The state of an API running against temporary repositories and a fake
/// cluster
pub struct TestApp {
	/// Keeps the repositories alive
	_dir: TempDir,
	/// The working clone
	pub work: PathBuf,
	/// The bare remote
	pub remote: PathBuf,
	/// The fake cluster the state talks to
	pub cluster: Arc<FakeCluster>,
	/// The state handed to services and routes
	pub state: AppState,
}

impl TestApp {
	/// The commit `main` points to in the working clone
	pub fn local_head(&self) -> Oid {
		head_of(&self.work)
	}

	/// The commit `main` points to on the remote
	pub fn remote_head(&self) -> Oid {
		head_of(&self.remote)
	}
}

/// Sets up an API over fresh repositories and the given cluster
pub fn app(cluster: FakeCluster) -> TestApp {
	build(cluster, None)
}

/// Sets up an API that annotates OAuth clients with the given issuer
pub fn app_with_issuer(cluster: FakeCluster, issuer: &str) -> TestApp {
	build(cluster, Some(issuer.to_string()))
}

/// Builds the state of a test API
fn build(cluster: FakeCluster, identity_provider_url: Option<String>) -> TestApp {
	let dir = tempfile::tempdir().unwrap();
	let (work, remote) = init_repositories(dir.path());

	let config = AppConfig {
		bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
		environment: RunningEnvironment::Development,
		project_dir: work.clone(),
		cluster_name: CLUSTER_NAME.to_string(),
		git: git_config(),
		flux: FluxConfig::default(),
		identity_provider_url,
	};
	let cluster = Arc::new(cluster);
	let state = AppState::new(config, cluster.clone());

	TestApp {
		_dir: dir,
		work,
		remote,
		cluster,
		state,
	}
}
