use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use git2::{
	Commit,
	Cred,
	ErrorCode,
	IndexAddOption,
	Oid,
	PushOptions,
	RemoteCallbacks,
	Repository,
	ResetType,
	Signature,
};
use tokio::{sync::Mutex, task};

use crate::{prelude::*, utils::config::GitConfig};

/// A commit made by the publisher, along with what the branch pointed to
/// before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRecord {
	/// The commit that was made
	pub id: Oid,
	/// The commit the branch pointed to before, `None` if this was the first
	/// commit of the branch
	pub previous: Option<Oid>,
}

/// What [`GitPublisher::commit_and_push`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
	/// The app's directory had no changes, so nothing was committed or pushed
	NothingToCommit,
	/// The changes were committed and the branch was pushed
	Pushed(CommitRecord),
}

impl CommitOutcome {
	/// The id of the commit that was pushed, if any
	pub fn commit_id(&self) -> Option<String> {
		match self {
			Self::NothingToCommit => None,
			Self::Pushed(record) => Some(record.id.to_string()),
		}
	}
}

/// Commits the changes of one app to the GitOps repository and pushes them to
/// the remote the cluster's GitOps controller watches
#[derive(Debug, Clone)]
pub struct GitPublisher {
	/// The root of the local clone
	repo_dir: PathBuf,
	/// The directory holding the apps, relative to the root of the clone
	apps_prefix: PathBuf,
	/// The author identity, remote and credentials
	git: GitConfig,
	/// Serializes every access to the repository. Git's index is shared by
	/// every app, so two commits cannot be prepared at the same time.
	lock: Arc<Mutex<()>>,
}

impl GitPublisher {
	/// Creates a publisher for the clone at `repo_dir`, whose apps live under
	/// `apps_prefix` (relative to the clone's root)
	pub fn new(repo_dir: impl Into<PathBuf>, apps_prefix: impl Into<PathBuf>, git: GitConfig) -> Self {
		Self {
			repo_dir: repo_dir.into(),
			apps_prefix: apps_prefix.into(),
			git,
			lock: Arc::new(Mutex::new(())),
		}
	}

	/// Stages every change under the app's directory (additions,
	/// modifications and deletions), commits it with the configured author and
	/// pushes the branch. If the push fails, the local commit is undone before
	/// the error is returned, so the repository is left as it was.
	#[instrument(skip(self))]
	pub async fn commit_and_push(&self, app: &str, message: &str) -> Result<CommitOutcome, AppError> {
		let _guard = self.lock.lock().await;
		let publisher = self.clone();
		let app = app.to_string();
		let message = message.to_string();

		task::spawn_blocking(move || publisher.commit_and_push_blocking(&app, &message))
			.await
			.map_err(|err| AppError::Internal(format!("git task failed: {}", err)))?
	}

	/// Moves the branch back to where it was before the given commit. The
	/// index is reset along with it, the working tree is left alone.
	#[cfg(test)]
	#[instrument(skip(self))]
	pub async fn undo_commit(&self, record: CommitRecord) -> Result<(), AppError> {
		let _guard = self.lock.lock().await;
		let publisher = self.clone();

		task::spawn_blocking(move || {
			let repo = publisher.open()?;
			publisher.undo_commit_blocking(&repo, record)
		})
		.await
		.map_err(|err| AppError::Internal(format!("git task failed: {}", err)))?
	}

	/// Opens the local clone
	fn open(&self) -> Result<Repository, AppError> {
		Ok(Repository::open(&self.repo_dir)?)
	}

	/// The blocking part of [`Self::commit_and_push`]
	fn commit_and_push_blocking(&self, app: &str, message: &str) -> Result<CommitOutcome, AppError> {
		let repo = self.open()?;

		let Some(record) = self.commit_blocking(&repo, app, message)? else {
			info!("No changes to commit for app `{}`", app);
			return Ok(CommitOutcome::NothingToCommit);
		};
		info!("Committed {} for app `{}`", record.id, app);

		if let Err(err) = self.push_blocking(&repo) {
			warn!("Push failed, undoing commit {}: {}", record.id, err);
			if let Err(undo_err) = self.undo_commit_blocking(&repo, record) {
				error!("Unable to undo commit {}: {}", record.id, undo_err);
			}
			return Err(err);
		}
		info!("Pushed {} to `{}`", record.id, self.git.remote);

		Ok(CommitOutcome::Pushed(record))
	}

	/// The path of the app's directory relative to the clone's root, as a git
	/// pathspec
	fn pathspec(&self, app: &str) -> String {
		self.apps_prefix
			.join(app)
			.to_string_lossy()
			.replace(std::path::MAIN_SEPARATOR, "/")
	}

	/// Stages the app's directory and commits it. Returns `None` if the
	/// staged tree is the same as the current one.
	fn commit_blocking(
		&self,
		repo: &Repository,
		app: &str,
		message: &str,
	) -> Result<Option<CommitRecord>, AppError> {
		let pathspec = [self.pathspec(app)];

		let mut index = repo.index()?;
		index.add_all(pathspec.iter(), IndexAddOption::DEFAULT, None)?;
		// `add_all` does not notice files that were removed
		index.update_all(pathspec.iter(), None)?;
		index.write()?;
		let tree_id = index.write_tree()?;

		let parent = head_commit(repo)?;
		if parent.as_ref().map(Commit::tree_id) == Some(tree_id) {
			return Ok(None);
		}

		let head = repo.head().ok();
		let branch = head.as_ref().and_then(|head| head.shorthand());
		if branch.is_some() && branch != Some(self.git.branch.as_str()) {
			warn!(
				"Checked out branch {:?} is not the configured branch `{}`",
				branch, self.git.branch
			);
		}

		let signature = Signature::now(&self.git.author_name, &self.git.author_email)?;
		let tree = repo.find_tree(tree_id)?;
		let parents = parent.iter().collect::<Vec<_>>();
		let id = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;

		Ok(Some(CommitRecord {
			id,
			previous: parent.map(|parent| parent.id()),
		}))
	}

	/// Pushes the configured branch, failing if the remote rejects the update
	fn push_blocking(&self, repo: &Repository) -> Result<(), AppError> {
		let mut remote = repo.find_remote(&self.git.remote)?;
		let refspec = format!("refs/heads/{0}:refs/heads/{0}", self.git.branch);
		let mut rejection = None;

		let mut callbacks = RemoteCallbacks::new();
		if let Some(token) = &self.git.token {
			let username = self.git.username.as_str();
			callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
				Cred::userpass_plaintext(username, token)
			});
		}
		callbacks.push_update_reference(|refname, status| {
			if let Some(message) = status {
				rejection = Some((refname.to_string(), message.to_string()));
			}
			Ok(())
		});

		let mut options = PushOptions::new();
		options.remote_callbacks(callbacks);
		remote.push(&[refspec.as_str()], Some(&mut options))?;
		drop(options);

		match rejection {
			Some((refname, message)) => Err(AppError::PushRejected { refname, message }),
			None => Ok(()),
		}
	}

	/// Moves the branch back to the commit's parent, or leaves it unborn if
	/// the commit was the first one
	fn undo_commit_blocking(&self, repo: &Repository, record: CommitRecord) -> Result<(), AppError> {
		match record.previous {
			Some(previous) => {
				let commit = repo.find_commit(previous)?;
				repo.reset(commit.as_object(), ResetType::Mixed, None)?;
			}
			None => {
				// The commit was the first one, so there is nothing to reset
				// to. Drop the branch and unstage everything instead.
				repo.head()?.delete()?;
				let mut index = repo.index()?;
				index.clear()?;
				index.write()?;
			}
		}
		info!("Undid commit {}", record.id);
		Ok(())
	}
}

/// The commit HEAD points to, `None` if the branch has no commits yet
fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>, git2::Error> {
	match repo.head() {
		Ok(head) => Ok(Some(head.peel_to_commit()?)),
		Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
		Err(err) => Err(err),
	}
}

/// The apps directory of a cluster, relative to the root of the repository
pub fn apps_prefix(cluster_name: &str) -> PathBuf {
	Path::new("clusters").join(cluster_name).join("my-applications")
}
