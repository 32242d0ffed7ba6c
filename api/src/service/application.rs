use std::collections::BTreeMap;

use futures::future;
use k8s_openapi::api::apps::v1::Deployment;
use models::{
	api::AppDetails,
	app::{is_dns_label, AppSpec},
	manifest::{
		from_manifests,
		to_manifests,
		AdditionalManifest,
		Manifest,
		ManifestDocument,
		ManifestSet,
		APP_NAME_LABEL,
	},
};

use super::{derive_status, CommitOutcome};
use crate::{app::AppState, prelude::*, utils::merge::merge_deployment};

/// The annotation carrying the identity provider's issuer URL on OAuth
/// clients
pub const ISSUER_ANNOTATION: &str = "homelab.dev/issuer";

/// Reads an app's spec from the repository along with its live status. A
/// failure only affects this app.
#[instrument(skip(state))]
pub async fn get_app(state: &AppState, name: &str) -> Result<AppDetails, AppError> {
	if name.is_empty() || !is_dns_label(name) {
		return Err(AppError::NotFound(format!("app `{}`", name)));
	}
	let set = state.store.read_manifest_set(name).await?;
	let spec = from_manifests(&set)?;

	let selector = format!("{}={}", APP_NAME_LABEL, name);
	let (deployment, pods) = future::try_join(
		state.cluster.get_deployment(name, name),
		state.cluster.list_pods(name, &selector),
	)
	.await?;
	let (status, replicas) = derive_status(deployment.as_ref(), &pods);
	trace!("App `{}` is {}", name, status);

	Ok(AppDetails {
		spec,
		status,
		replicas,
	})
}

/// Reads every app in the repository. Apps are fetched concurrently, and an
/// app that cannot be read is logged and left out instead of failing the
/// whole list.
#[instrument(skip(state))]
pub async fn get_apps(state: &AppState) -> Result<Vec<AppDetails>, AppError> {
	let names = state.store.list_app_names().await?;
	debug!("Found {} app directories", names.len());

	let results = future::join_all(names.iter().map(|name| get_app(state, name))).await;

	let mut apps = names
		.iter()
		.zip(results)
		.filter_map(|(name, result)| {
			result
				.inspect_err(|err| error!("Unable to read app `{}`: {}", name, err))
				.ok()
		})
		.collect::<Vec<_>>();
	apps.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));

	Ok(apps)
}

/// Creates a new app: writes its manifests, commits and pushes them, and asks
/// the GitOps controller to apply them. New apps start with one replica.
#[instrument(skip(state, spec), fields(app = %spec.name))]
pub async fn create_app(state: &AppState, spec: AppSpec) -> Result<CommitOutcome, AppError> {
	spec.validate()?;
	let _guard = state.locks.lock(&spec.name).await;

	if state.store.app_exists(&spec.name).await? {
		return Err(AppError::Conflict(format!("app `{}`", spec.name)));
	}

	let mut set = to_manifests(&spec);
	set.deployment.spec.get_or_insert_with(Default::default).replicas = Some(1);
	annotate_auth_clients(&mut set, state.config.identity_provider_url.as_deref());

	publish(
		state,
		&spec.name,
		&set.resources(),
		&format!("Create app {}", spec.name),
	)
	.await
}

/// Updates an existing app. The new deployment is merged onto the one in the
/// repository, so fields the app spec does not model (such as the replica
/// count) are kept. Apps cannot be renamed.
#[instrument(skip(state, spec))]
pub async fn update_app(state: &AppState, name: &str, spec: AppSpec) -> Result<CommitOutcome, AppError> {
	let mut errors = spec.validate().err().unwrap_or_default();
	if spec.name != name {
		errors.push("name", format!("cannot be changed from `{}`", name));
	}
	errors.into_result(())?;

	let _guard = state.locks.lock(name).await;

	if !state.store.app_exists(name).await? {
		return Err(AppError::NotFound(format!("app `{}`", name)));
	}
	let existing: Deployment = state
		.store
		.get_file(&state.store.app_dir(name).join(format!("{}.yaml", Deployment::KIND.to_lowercase())))
		.await?;

	let mut set = to_manifests(&spec);
	set.deployment = merge_deployment(&existing, &set.deployment)
		.map_err(|err| AppError::Internal(format!("unable to merge deployment: {}", err)))?;
	annotate_auth_clients(&mut set, state.config.identity_provider_url.as_deref());

	publish(state, name, &set.resources(), &format!("Update app {}", name)).await
}

/// Writes the documents, commits and pushes them, then triggers a
/// reconciliation. If writing, committing or pushing fails, the steps that
/// completed are undone in reverse order. A failed reconcile request is only
/// logged, since the controller picks the change up on its next poll anyway.
async fn publish(
	state: &AppState,
	name: &str,
	resources: &[ManifestDocument],
	message: &str,
) -> Result<CommitOutcome, AppError> {
	let journal = state
		.store
		.write_resources_to_file_system(name, resources)
		.await?;

	// The publisher undoes its own commit if the push fails
	let outcome = match state.publisher.commit_and_push(name, message).await {
		Ok(outcome) => outcome,
		Err(err) => {
			warn!("Publishing app `{}` failed, restoring its files: {}", name, err);
			if let Err(rollback_err) = journal.rollback().await {
				error!("Unable to restore files of app `{}`: {}", name, rollback_err);
			}
			return Err(err);
		}
	};

	if let CommitOutcome::Pushed(_) = outcome {
		if let Err(err) = state.cluster.request_reconcile().await {
			warn!("Unable to request reconciliation: {}", err);
		}
	}

	Ok(outcome)
}

/// Annotates every OAuth client with the identity provider's issuer URL, if
/// one is configured
fn annotate_auth_clients(set: &mut ManifestSet, issuer: Option<&str>) {
	let Some(issuer) = issuer else {
		return;
	};
	for manifest in &mut set.additional {
		if let AdditionalManifest::AuthClient(client) = manifest {
			client
				.metadata
				.annotations
				.get_or_insert_with(BTreeMap::new)
				.insert(ISSUER_ANNOTATION.to_string(), issuer.to_string());
		}
	}
}

#[cfg(test)]
mod tests {
	use std::{fs, sync::Arc};

	use git2::Repository;
	use models::{api::AppStatus, manifest::AuthClient};

	use super::*;
	use crate::{
		service::fake::FakeCluster,
		test_utils::{self, TestApp},
	};

	const NEW_APP: &str = "name: new-app\nimage: nginx:latest\nresources:\n  cpu: \"0.5\"\n  memory: 256Mi\n";

	fn spec(yaml: &str) -> AppSpec {
		AppSpec::from_yaml(yaml).unwrap()
	}

	fn read_deployment(app: &TestApp, name: &str) -> Deployment {
		let path = app.state.store.app_dir(name).join("deployment.yaml");
		serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap()
	}

	#[tokio::test]
	async fn new_app_starts_with_one_replica() {
		let app = test_utils::app(FakeCluster::default());

		let outcome = create_app(&app.state, spec(NEW_APP)).await.unwrap();

		let deployment = read_deployment(&app, "new-app");
		assert_eq!(deployment.spec.unwrap().replicas, Some(1));
		assert!(matches!(outcome, CommitOutcome::Pushed(_)));
		assert_eq!(app.remote_head(), app.local_head());
		assert_eq!(app.cluster.reconciles(), 1);
	}

	#[tokio::test]
	async fn existing_app_cannot_be_created_again() {
		let app = test_utils::app(FakeCluster::default());
		create_app(&app.state, spec(NEW_APP)).await.unwrap();

		let result = create_app(&app.state, spec(NEW_APP)).await;

		assert!(matches!(result, Err(AppError::Conflict(_))), "{:?}", result);
	}

	#[tokio::test]
	async fn invalid_spec_is_rejected_before_anything_is_written() {
		let app = test_utils::app(FakeCluster::default());
		let mut invalid = spec(NEW_APP);
		invalid.image = String::new();

		let result = create_app(&app.state, invalid).await;

		assert!(matches!(result, Err(AppError::Validation(_))), "{:?}", result);
		assert!(!app.state.store.app_exists("new-app").await.unwrap());
	}

	#[tokio::test]
	async fn image_update_keeps_the_replica_count() {
		let app = test_utils::app(FakeCluster::default());
		create_app(&app.state, spec(NEW_APP)).await.unwrap();
		// Scaled by hand in the repository
		let path = app.state.store.app_dir("new-app").join("deployment.yaml");
		let scaled = fs::read_to_string(&path)
			.unwrap()
			.replace("replicas: 1", "replicas: 3");
		fs::write(&path, scaled).unwrap();

		update_app(
			&app.state,
			"new-app",
			spec("name: new-app\nimage: nginx:1.27\nresources:\n  cpu: \"0.5\"\n  memory: 256Mi\n"),
		)
		.await
		.unwrap();

		let deployment = read_deployment(&app, "new-app").spec.unwrap();
		assert_eq!(deployment.replicas, Some(3));
		let container = &deployment.template.spec.unwrap().containers[0];
		assert_eq!(container.image.as_deref(), Some("nginx:1.27"));
	}

	#[tokio::test]
	async fn apps_cannot_be_renamed() {
		let app = test_utils::app(FakeCluster::default());
		create_app(&app.state, spec(NEW_APP)).await.unwrap();

		let result = update_app(&app.state, "new-app", spec("name: other-app\nimage: nginx\n")).await;

		let Err(AppError::Validation(errors)) = result else {
			panic!("expected a validation error, got {:?}", result);
		};
		assert!(errors.has_error_at("name"));
	}

	#[tokio::test]
	async fn updating_a_missing_app_fails() {
		let app = test_utils::app(FakeCluster::default());

		let result = update_app(&app.state, "new-app", spec(NEW_APP)).await;

		assert!(matches!(result, Err(AppError::NotFound(_))), "{:?}", result);
	}

	#[tokio::test]
	async fn failed_push_removes_the_new_app() {
		let app = test_utils::app(FakeCluster::default());
		let before = app.local_head();
		fs::remove_dir_all(&app.remote).unwrap();

		let result = create_app(&app.state, spec(NEW_APP)).await;

		assert!(result.is_err());
		assert!(!app.state.store.app_exists("new-app").await.unwrap());
		assert_eq!(app.local_head(), before);
		assert_eq!(app.cluster.reconciles(), 0);
	}

	#[tokio::test]
	async fn failed_push_restores_the_previous_files() {
		let app = test_utils::app(FakeCluster::default());
		create_app(&app.state, spec(NEW_APP)).await.unwrap();
		let path = app.state.store.app_dir("new-app").join("deployment.yaml");
		let before = fs::read_to_string(&path).unwrap();
		fs::remove_dir_all(&app.remote).unwrap();

		let result = update_app(&app.state, "new-app", spec("name: new-app\nimage: nginx:1.27\n")).await;

		assert!(result.is_err());
		assert_eq!(fs::read_to_string(&path).unwrap(), before);
		let repo = Repository::open(&app.work).unwrap();
		assert!(repo.statuses(None).unwrap().is_empty());
	}

	#[tokio::test]
	async fn failed_reconcile_does_not_fail_the_write() {
		let app = test_utils::app(FakeCluster::default().with_failing_reconcile());

		let outcome = create_app(&app.state, spec(NEW_APP)).await.unwrap();

		assert!(matches!(outcome, CommitOutcome::Pushed(_)));
		assert_eq!(app.cluster.reconciles(), 1);
	}

	#[tokio::test]
	async fn unchanged_update_has_nothing_to_commit() {
		let app = test_utils::app(FakeCluster::default());
		create_app(&app.state, spec(NEW_APP)).await.unwrap();

		let outcome = update_app(&app.state, "new-app", spec(NEW_APP)).await.unwrap();

		assert_eq!(outcome, CommitOutcome::NothingToCommit);
		assert_eq!(app.cluster.reconciles(), 1);
	}

	#[tokio::test]
	async fn auth_clients_carry_the_issuer() {
		let app = test_utils::app_with_issuer(FakeCluster::default(), "https://auth.home.arpa");
		create_app(
			&app.state,
			spec(
				r#"
name: grafana
image: grafana/grafana:10.4.0
additionalResources:
  - kind: AuthClient
    name: grafana
    redirectUris:
      - https://grafana.home.arpa/login/generic_oauth
"#,
			),
		)
		.await
		.unwrap();

		let path = app.state.store.app_dir("grafana").join("grafana.authclient.yaml");
		let client: AuthClient = app.state.store.get_file(&path).await.unwrap();

		assert_eq!(
			client
				.metadata
				.annotations
				.unwrap_or_default()
				.get(ISSUER_ANNOTATION)
				.map(String::as_str),
			Some("https://auth.home.arpa")
		);
	}

	#[tokio::test]
	async fn concurrent_updates_of_one_app_both_land() {
		let app = test_utils::app(FakeCluster::default());
		create_app(&app.state, spec(NEW_APP)).await.unwrap();
		let state = Arc::new(app.state.clone());

		let updates = ["nginx:1.26", "nginx:1.27"].map(|image| {
			let state = state.clone();
			tokio::spawn(async move {
				update_app(
					&state,
					"new-app",
					spec(&format!("name: new-app\nimage: {}\n", image)),
				)
				.await
			})
		});
		for update in updates {
			update.await.unwrap().unwrap();
		}

		let repo = Repository::open(&app.work).unwrap();
		let mut walk = repo.revwalk().unwrap();
		walk.push_head().unwrap();
		// The initial commit, the creation and both updates
		assert_eq!(walk.count(), 4);
		assert_eq!(app.remote_head(), app.local_head());
	}

	#[tokio::test]
	async fn get_app_overlays_the_live_status() {
		let app = test_utils::app(FakeCluster::default().with_app("new-app", 1, 1, &["Running"]));
		create_app(&app.state, spec(NEW_APP)).await.unwrap();

		let details = get_app(&app.state, "new-app").await.unwrap();

		assert_eq!(details.spec, spec(NEW_APP));
		assert_eq!(details.status, AppStatus::Running);
		assert_eq!(details.replicas.desired, 1);
		assert_eq!(app.cluster.selectors(), ["app.kubernetes.io/name=new-app"]);
	}

	#[tokio::test]
	async fn get_apps_lists_running_apps_by_name() {
		let app = test_utils::app(
			FakeCluster::default()
				.with_app("web", 2, 2, &["Running", "Running"])
				.with_app("api", 1, 1, &["Running"]),
		);
		create_app(&app.state, spec("name: web\nimage: nginx:latest\n"))
			.await
			.unwrap();
		create_app(&app.state, spec("name: api\nimage: ghcr.io/homelab/api:1.0\n"))
			.await
			.unwrap();

		let apps = get_apps(&app.state).await.unwrap();

		let names = apps.iter().map(|app| app.spec.name.as_str()).collect::<Vec<_>>();
		assert_eq!(names, ["api", "web"]);
		assert!(apps.iter().all(|app| app.status == AppStatus::Running));
	}

	#[tokio::test]
	async fn unreadable_apps_are_left_out_of_the_list() {
		let app = test_utils::app(
			FakeCluster::default()
				.with_app("web", 1, 1, &["Running"])
				.with_unreachable("api"),
		);
		create_app(&app.state, spec("name: web\nimage: nginx:latest\n"))
			.await
			.unwrap();
		create_app(&app.state, spec("name: api\nimage: ghcr.io/homelab/api:1.0\n"))
			.await
			.unwrap();

		let apps = get_apps(&app.state).await.unwrap();

		assert_eq!(apps.len(), 1);
		assert_eq!(apps[0].spec.name, "web");
	}

	#[tokio::test]
	async fn app_without_deployment_on_the_cluster_is_unknown() {
		let app = test_utils::app(FakeCluster::default());
		create_app(&app.state, spec(NEW_APP)).await.unwrap();

		let details = get_app(&app.state, "new-app").await.unwrap();

		assert_eq!(details.status, AppStatus::Unknown);
	}
}
