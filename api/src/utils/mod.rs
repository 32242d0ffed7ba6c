/// The configuration of the API, read from config files and the environment
pub mod config;
/// The error type of the API and how it is sent to clients
pub mod error;
/// Per-app advisory locks serializing writes to the same app
pub mod lock;
/// Deep merging of manifests, used to update documents on disk without
/// losing fields the app spec does not model
pub mod merge;
