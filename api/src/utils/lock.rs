use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::prelude::*;

/// Advisory locks keyed by app name. Writes to the same app are serialized,
/// writes to different apps proceed concurrently.
#[derive(Debug, Clone, Default)]
pub struct AppLocks {
	/// One mutex per app that has been locked and is still referenced
	locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AppLocks {
	/// Waits until no one else holds the lock of the given app, and takes it.
	/// The lock is released when the guard is dropped.
	pub async fn lock(&self, app: &str) -> OwnedMutexGuard<()> {
		let lock = {
			let mut locks = self.locks.lock().await;
			// Locks only referenced by the map are not held by anyone
			locks.retain(|_, lock| Arc::strong_count(lock) > 1);
			locks.entry(app.to_string()).or_default().clone()
		};
		trace!("Waiting for the lock of app `{}`", app);
		lock.lock_owned().await
	}

	/// The number of apps that currently have a lock entry
	#[cfg(test)]
	async fn len(&self) -> usize {
		self.locks.lock().await.len()
	}
}
