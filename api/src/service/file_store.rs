use std::{
	io::ErrorKind,
	path::{Path, PathBuf},
};

use k8s_openapi::api::{
	apps::v1::Deployment,
	core::v1::{Namespace, PersistentVolumeClaim, Service},
	networking::v1::Ingress,
};
use models::manifest::{
	AdditionalManifest,
	AuthClient,
	Kustomization,
	Manifest,
	ManifestDocument,
	ManifestSet,
	KUSTOMIZATION_FILE_NAME,
};
use serde::Deserialize;
use tokio::fs;

use crate::prelude::*;

/// Reads and writes the manifests of apps, one directory per app
#[derive(Debug, Clone)]
pub struct FileStore {
	/// The directory holding one sub-directory per app
	apps_dir: PathBuf,
}

impl FileStore {
	/// Creates a store over the given apps directory
	pub fn new(apps_dir: impl Into<PathBuf>) -> Self {
		Self {
			apps_dir: apps_dir.into(),
		}
	}

	/// The directory of the given app
	pub fn app_dir(&self, app: &str) -> PathBuf {
		self.apps_dir.join(app)
	}

	/// Whether the given app has a directory
	pub async fn app_exists(&self, app: &str) -> Result<bool, AppError> {
		Ok(fs::try_exists(self.app_dir(app)).await?)
	}

	/// The names of every app directory, sorted. A missing apps directory
	/// holds no apps.
	#[instrument(skip(self))]
	pub async fn list_app_names(&self) -> Result<Vec<String>, AppError> {
		let mut entries = match fs::read_dir(&self.apps_dir).await {
			Ok(entries) => entries,
			Err(err) if err.kind() == ErrorKind::NotFound => {
				warn!("Apps directory `{}` does not exist", self.apps_dir.display());
				return Ok(vec![]);
			}
			Err(err) => return Err(err.into()),
		};

		let mut names = Vec::new();
		while let Some(entry) = entries.next_entry().await? {
			if !entry.file_type().await?.is_dir() {
				continue;
			}
			if let Some(name) = entry.file_name().to_str() {
				names.push(name.to_string());
			}
		}
		names.sort();
		Ok(names)
	}

	/// Writes the given documents into the app's directory, creating it if
	/// needed, and regenerates the kustomization to list exactly these files.
	/// Files the previous kustomization listed that are no longer part of the
	/// app are removed. The returned journal can undo every change made.
	#[instrument(skip(self, resources), fields(count = resources.len()))]
	pub async fn write_resources_to_file_system(
		&self,
		app: &str,
		resources: &[ManifestDocument],
	) -> Result<WriteJournal, AppError> {
		let dir = self.app_dir(app);
		let mut journal = WriteJournal::default();

		if !fs::try_exists(&dir).await? {
			fs::create_dir_all(&dir).await?;
			journal.created_dir = Some(dir.clone());
			debug!("Created directory `{}`", dir.display());
		}

		let result = self.write_into(&dir, resources, &mut journal).await;
		match result {
			Ok(()) => Ok(journal),
			Err(err) => {
				// Leave the directory as it was if a write fails halfway
				if let Err(rollback_err) = journal.rollback().await {
					error!("Unable to roll back partial write: {}", rollback_err);
				}
				Err(err)
			}
		}
	}

	/// Writes the documents and the kustomization, recording every change in
	/// the journal
	async fn write_into(
		&self,
		dir: &Path,
		resources: &[ManifestDocument],
		journal: &mut WriteJournal,
	) -> Result<(), AppError> {
		let kustomization_path = dir.join(KUSTOMIZATION_FILE_NAME);
		let previous = match self.get_file::<Kustomization>(&kustomization_path).await {
			Ok(kustomization) => kustomization.resources,
			Err(AppError::NotFound(_)) => vec![],
			Err(err) => {
				warn!("Ignoring unreadable kustomization: {}", err);
				vec![]
			}
		};

		let mut files = Vec::with_capacity(resources.len());
		for resource in resources {
			if let ManifestDocument::Kustomization(_) = resource {
				continue;
			}
			let file_name = resource.file_name();
			let contents = resource.to_yaml().map_err(|err| {
				AppError::Internal(format!("unable to serialize {}: {}", file_name, err))
			})?;
			journal.write(dir.join(&file_name), contents.into_bytes()).await?;
			trace!("Wrote `{}`", file_name);
			files.push(file_name);
		}

		let kustomization = Kustomization::new(files);
		for stale in previous
			.iter()
			.filter(|file| !kustomization.resources.contains(file))
		{
			journal.remove(dir.join(stale)).await?;
			debug!("Removed `{}`, which is no longer part of the app", stale);
		}

		let contents = ManifestDocument::Kustomization(kustomization)
			.to_yaml()
			.map_err(|err| AppError::Internal(format!("unable to serialize kustomization: {}", err)))?;
		journal.write(kustomization_path, contents.into_bytes()).await
	}

	/// Reads the first document of the given kind from a YAML file, which may
	/// hold several documents
	pub async fn get_file<T>(&self, path: &Path) -> Result<T, AppError>
	where
		T: Manifest,
	{
		let contents = match fs::read_to_string(path).await {
			Ok(contents) => contents,
			Err(err) if err.kind() == ErrorKind::NotFound => {
				return Err(AppError::NotFound(format!("manifest `{}`", path.display())));
			}
			Err(err) => return Err(err.into()),
		};
		parse_manifest(path, &contents)
	}

	/// Reads every manifest of an app. The service and the ingress are only
	/// read if the kustomization lists them, and additional documents are
	/// read in the order the kustomization lists them.
	#[instrument(skip(self))]
	pub async fn read_manifest_set(&self, app: &str) -> Result<ManifestSet, AppError> {
		let dir = self.app_dir(app);
		if !fs::try_exists(&dir).await? {
			return Err(AppError::NotFound(format!("app `{}`", app)));
		}

		let kustomization: Kustomization = self.get_file(&dir.join(KUSTOMIZATION_FILE_NAME)).await?;
		let lists = |file_name: &str| kustomization.resources.iter().any(|file| file == file_name);

		let namespace: Namespace = self.get_file(&dir.join(singleton_file::<Namespace>())).await?;
		let deployment: Deployment = self
			.get_file(&dir.join(singleton_file::<Deployment>()))
			.await?;
		let service = if lists(&singleton_file::<Service>()) {
			Some(self.get_file(&dir.join(singleton_file::<Service>())).await?)
		} else {
			None
		};
		let ingress = if lists(&singleton_file::<Ingress>()) {
			Some(self.get_file(&dir.join(singleton_file::<Ingress>())).await?)
		} else {
			None
		};

		let mut additional = Vec::new();
		for file in &kustomization.resources {
			let path = dir.join(file);
			if file.ends_with(&multi_file_suffix::<AuthClient>()) {
				additional.push(AdditionalManifest::AuthClient(self.get_file(&path).await?));
			} else if file.ends_with(&multi_file_suffix::<PersistentVolumeClaim>()) {
				additional.push(AdditionalManifest::PersistentVolumeClaim(
					self.get_file(&path).await?,
				));
			}
		}

		Ok(ManifestSet {
			namespace,
			deployment,
			service,
			ingress,
			kustomization,
			additional,
		})
	}
}

/// Picks the first document of kind `T::KIND` out of a multi-document YAML
/// file that deserializes as `T`. Syntax errors fail the whole file.
fn parse_manifest<T>(path: &Path, contents: &str) -> Result<T, AppError>
where
	T: Manifest,
{
	let mut last_error = None;
	for document in serde_yaml::Deserializer::from_str(contents) {
		let value = serde_yaml::Value::deserialize(document).map_err(|source| AppError::Parse {
			path: path.to_path_buf(),
			source,
		})?;
		if value.get("kind").and_then(serde_yaml::Value::as_str) != Some(T::KIND) {
			continue;
		}
		match serde_yaml::from_value(value) {
			Ok(manifest) => return Ok(manifest),
			Err(err) => last_error = Some(err.to_string()),
		}
	}

	Err(AppError::InvalidManifest {
		path: path.to_path_buf(),
		kind: T::KIND,
		message: last_error.unwrap_or_else(|| format!("no document of kind `{}`", T::KIND)),
	})
}

/// The fixed file name of a singleton kind
fn singleton_file<T: Manifest>() -> String {
	format!("{}.yaml", T::KIND.to_lowercase())
}

/// The suffix of the file names of a kind an app can have any number of
fn multi_file_suffix<T: Manifest>() -> String {
	format!(".{}.yaml", T::KIND.to_lowercase())
}

/// Everything a write changed on disk, so that it can be undone
#[derive(Debug, Default)]
pub struct WriteJournal {
	/// The app directory, if the write created it
	created_dir: Option<PathBuf>,
	/// Every file that was touched, with its contents from before the write.
	/// `None` if the file did not exist.
	entries: Vec<(PathBuf, Option<Vec<u8>>)>,
}

impl WriteJournal {
	/// Writes a file, remembering what it held before
	async fn write(&mut self, path: PathBuf, contents: Vec<u8>) -> Result<(), AppError> {
		let previous = read_optional(&path).await?;
		self.entries.push((path.clone(), previous));
		fs::write(&path, contents).await?;
		Ok(())
	}

	/// Removes a file, remembering what it held
	async fn remove(&mut self, path: PathBuf) -> Result<(), AppError> {
		let Some(previous) = read_optional(&path).await? else {
			return Ok(());
		};
		self.entries.push((path.clone(), Some(previous)));
		fs::remove_file(&path).await?;
		Ok(())
	}

	/// Whether the write created the app's directory
	#[cfg(test)]
	pub fn created_dir(&self) -> bool {
		self.created_dir.is_some()
	}

	/// Undoes every change, newest first: files are restored to what they
	/// held, files that did not exist are removed, and the directory is
	/// removed if the write created it.
	#[instrument(skip(self), fields(entries = self.entries.len()))]
	pub async fn rollback(self) -> Result<(), AppError> {
		for (path, previous) in self.entries.into_iter().rev() {
			match previous {
				Some(contents) => fs::write(&path, contents).await?,
				None => match fs::remove_file(&path).await {
					Ok(()) => (),
					Err(err) if err.kind() == ErrorKind::NotFound => (),
					Err(err) => return Err(err.into()),
				},
			}
		}
		if let Some(dir) = self.created_dir {
			fs::remove_dir_all(&dir).await?;
		}
		info!("Rolled back file changes");
		Ok(())
	}
}

/// Reads a file, or `None` if it does not exist
async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, AppError> {
	match fs::read(path).await {
		Ok(contents) => Ok(Some(contents)),
		Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
		Err(err) => Err(err.into()),
	}
}
