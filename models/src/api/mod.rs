/// The app endpoints: listing, reading, creating and updating apps
pub mod apps;
/// The constant booleans used to tag response bodies
mod bools;

use serde::{Deserialize, Serialize};

pub use self::{apps::*, bools::*};
use crate::error::ValidationErrors;

/// A list of all the errors the API can respond with. The status code each
/// maps to is decided by the API itself.
#[derive(
	Debug,
	Clone,
	Copy,
	Serialize,
	Deserialize,
	PartialEq,
	Eq,
	Hash,
	strum::Display,
	strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ErrorType {
	/// The app spec sent with the request is invalid. The response contains
	/// the list of offending fields
	WrongParameters,
	/// A manifest in the repository could not be parsed or does not match the
	/// shape it should have
	InvalidManifest,
	/// The app, or one of its manifests, does not exist
	ResourceDoesNotExist,
	/// An app with that name already exists
	ResourceAlreadyExists,
	/// The cluster or the git remote could not be reached, or refused the
	/// request
	UpstreamUnavailable,
	/// An internal server error occurred. This should not happen unless there
	/// is a bug in the server
	InternalServerError,
}

impl ErrorType {
	/// Returns the message that should be used for this error. This is the
	/// message that is user-friendly and can be shown to the user
	pub fn message(&self) -> &'static str {
		match self {
			Self::WrongParameters => "The app spec sent with that request is invalid",
			Self::InvalidManifest => "A manifest of the app is invalid",
			Self::ResourceDoesNotExist => "The app you are trying to access does not exist",
			Self::ResourceAlreadyExists => "An app already exists with that name",
			Self::UpstreamUnavailable => "The cluster or the git remote could not be reached",
			Self::InternalServerError => "An internal server error has occured",
		}
	}
}

/// This struct represents the JSON body of successful response from the API.
/// The fields of the body are flattened to the top level.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiSuccessResponseBody<T> {
	/// Whether the request was successful or not. This is always true.
	pub success: True,
	/// The JSON body of the response
	#[serde(flatten)]
	pub response: T,
}

impl<T> ApiSuccessResponseBody<T> {
	/// Wraps the given response
	pub fn new(response: T) -> Self {
		Self {
			success: True,
			response,
		}
	}
}

/// This struct represents the JSON body of an error response from the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponseBody {
	/// Whether the request was successful or not. This is always false.
	pub success: False,
	/// The error type of the response.
	pub error: ErrorType,
	/// A user-friendly message describing the error.
	pub message: String,
	/// The offending fields, for [`ErrorType::WrongParameters`]
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub errors: Option<ValidationErrors>,
}

impl ApiErrorResponseBody {
	/// Creates an error body with the default message of the error type
	pub fn new(error: ErrorType) -> Self {
		Self::with_message(error, error.message())
	}

	/// Creates an error body with a custom message
	pub fn with_message(error: ErrorType, message: impl Into<String>) -> Self {
		Self {
			success: False,
			error,
			message: message.into(),
			errors: None,
		}
	}
}
