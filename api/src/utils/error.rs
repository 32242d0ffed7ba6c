use std::path::PathBuf;

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use models::prelude::*;

/// Everything that can go wrong while serving a request
#[derive(Debug, thiserror::Error)]
pub enum AppError {
	/// A manifest on disk is not valid YAML
	#[error("could not parse `{}`: {source}", path.display())]
	Parse {
		/// The file that could not be parsed
		path: PathBuf,
		/// What the YAML parser complained about
		source: serde_yaml::Error,
	},
	/// The app spec sent by the client breaks one or more rules
	#[error(transparent)]
	Validation(#[from] ValidationErrors),
	/// A manifest on disk is valid YAML but not the document that was expected
	#[error("`{}` is not a valid {kind} manifest: {message}", path.display())]
	InvalidManifest {
		/// The file that was read
		path: PathBuf,
		/// The kind of document that was looked for
		kind: &'static str,
		/// What is wrong with the file
		message: String,
	},
	/// The manifests of an app cannot be turned back into a spec
	#[error(transparent)]
	Schema(#[from] SchemaError),
	/// The app, or one of its manifest files, does not exist
	#[error("{0} does not exist")]
	NotFound(String),
	/// An app with that name already exists
	#[error("{0} already exists")]
	Conflict(String),
	/// The Kubernetes API refused a request or could not be reached
	#[error("cluster request failed: {0}")]
	Kube(#[from] kube::Error),
	/// A git operation failed
	#[error("git operation failed: {0}")]
	Git(#[from] git2::Error),
	/// The remote refused to update the branch
	#[error("push of `{refname}` was rejected: {message}")]
	PushRejected {
		/// The reference that was pushed
		refname: String,
		/// The reason given by the remote
		message: String,
	},
	/// A filesystem operation failed
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// Something that should never happen, such as a panicking background task
	#[error("{0}")]
	Internal(String),
}

impl AppError {
	/// The error code sent to the client
	pub fn error_type(&self) -> ErrorType {
		match self {
			Self::Validation(_) => ErrorType::WrongParameters,
			Self::Parse { .. } | Self::InvalidManifest { .. } | Self::Schema(_) => {
				ErrorType::InvalidManifest
			}
			Self::NotFound(_) => ErrorType::ResourceDoesNotExist,
			Self::Conflict(_) => ErrorType::ResourceAlreadyExists,
			Self::Kube(_) | Self::PushRejected { .. } => ErrorType::UpstreamUnavailable,
			Self::Git(err) if is_network_error(err) => ErrorType::UpstreamUnavailable,
			Self::Git(_) | Self::Io(_) | Self::Internal(_) => ErrorType::InternalServerError,
		}
	}

	/// The status code sent to the client
	pub fn status_code(&self) -> StatusCode {
		match self.error_type() {
			ErrorType::WrongParameters => StatusCode::BAD_REQUEST,
			ErrorType::InvalidManifest => StatusCode::BAD_REQUEST,
			ErrorType::ResourceDoesNotExist => StatusCode::NOT_FOUND,
			ErrorType::ResourceAlreadyExists => StatusCode::CONFLICT,
			ErrorType::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
			ErrorType::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// The body sent to the client. Internal errors only carry the generic
	/// message, everything else carries the error itself
	pub fn body(&self) -> ApiErrorResponseBody {
		let error_type = self.error_type();
		let mut body = match error_type {
			ErrorType::InternalServerError => ApiErrorResponseBody::new(error_type),
			_ => ApiErrorResponseBody::with_message(error_type, self.to_string()),
		};
		if let Self::Validation(errors) = self {
			body.message = error_type.message().to_string();
			body.errors = Some(errors.clone());
		}
		body
	}
}

/// Whether a git error happened while talking to the remote
fn is_network_error(err: &git2::Error) -> bool {
	matches!(
		err.class(),
		git2::ErrorClass::Net |
			git2::ErrorClass::Http |
			git2::ErrorClass::Ssh |
			git2::ErrorClass::Ssl
	)
}

impl IntoResponse for AppError {
	fn into_response(self) -> Response {
		let status = self.status_code();
		if status.is_server_error() {
			tracing::error!("Request failed: {}", self);
		} else {
			tracing::debug!("Request rejected: {}", self);
		}
		(status, Json(self.body())).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn validation_errors_carry_the_field_list() {
		let mut errors = ValidationErrors::default();
		errors.push("ports[1].name", "duplicate port name `http`");
		let err = AppError::from(errors.clone());

		let body = err.body();

		assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
		assert_eq!(body.error, ErrorType::WrongParameters);
		assert_eq!(body.errors, Some(errors));
	}

	#[test]
	fn status_codes_follow_the_error_kind() {
		assert_eq!(
			AppError::NotFound("app `grafana`".into()).status_code(),
			StatusCode::NOT_FOUND
		);
		assert_eq!(
			AppError::Conflict("app `grafana`".into()).status_code(),
			StatusCode::CONFLICT
		);
		assert_eq!(
			AppError::PushRejected {
				refname: "refs/heads/main".into(),
				message: "non-fast-forward".into(),
			}
			.status_code(),
			StatusCode::BAD_GATEWAY
		);
		assert_eq!(
			AppError::Git(git2::Error::from_str("index is locked")).status_code(),
			StatusCode::INTERNAL_SERVER_ERROR
		);
	}

	#[test]
	fn internal_errors_hide_their_details() {
		let body = AppError::Internal("task panicked".into()).body();

		assert_eq!(body.message, ErrorType::InternalServerError.message());
	}
}
