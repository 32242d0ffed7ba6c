/// Reading, creating and updating apps: the steps that tie the file store,
/// the git publisher and the cluster together
mod application;
/// Live state of the cluster and the GitOps reconcile trigger
mod cluster;
/// App manifests on disk
mod file_store;
/// Committing and pushing changes to the GitOps repository
mod git;

pub use self::{application::*, cluster::*, file_store::*, git::*};
