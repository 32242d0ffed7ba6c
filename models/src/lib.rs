//! Shared types of the homelab app reconciler: the app spec and its
//! validator, the Kubernetes manifests an app is stored as, the codec between
//! the two, and the wire types of the HTTP API.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::missing_docs_in_private_items)]
#![cfg_attr(
	debug_assertions,
	allow(unused_variables, dead_code, unused_mut),
	allow(missing_docs, clippy::missing_docs_in_private_items)
)]

/// The request and response bodies of the HTTP API
pub mod api;
/// The app spec, its quantities and its validation rules
pub mod app;
/// The Kubernetes documents an app is stored as, and the codec that derives
/// them from an app spec
pub mod manifest;

/// Errors produced while validating specs and decoding manifests
mod error;

pub use self::error::*;

/// A prelude that re-exports commonly used items.
pub mod prelude {
	pub use crate::{
		api::{ApiErrorResponseBody, ApiSuccessResponseBody, AppDetails, AppStatus, ErrorType},
		app::AppSpec,
		manifest::{ManifestDocument, ManifestSet},
		FieldError,
		SchemaError,
		ValidationErrors,
	};
}
