use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A single rule violation found while validating an app spec. The path is
/// the location of the offending value, such as `ports[1].name`. An empty
/// path refers to the document as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
	/// Where in the document the error was found
	pub path: String,
	/// A human readable description of what is wrong with the value
	pub message: String,
}

impl FieldError {
	/// Creates a new field error at the given path
	pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			message: message.into(),
		}
	}
}

impl Display for FieldError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		if self.path.is_empty() {
			write!(f, "{}", self.message)
		} else {
			write!(f, "{}: {}", self.path, self.message)
		}
	}
}

/// All the errors found while validating an app spec. Validation collects
/// every violation instead of stopping at the first one, so that a form can
/// highlight all the offending fields at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(transparent)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
	/// Records a new error at the given path
	pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
		self.0.push(FieldError::new(path, message));
	}

	/// Whether no errors have been recorded
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Iterates over the recorded errors, in the order they were found
	pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
		self.0.iter()
	}

	/// Returns `Ok(value)` if no errors have been recorded, otherwise returns
	/// the recorded errors
	pub fn into_result<T>(self, value: T) -> Result<T, Self> {
		if self.is_empty() {
			Ok(value)
		} else {
			Err(self)
		}
	}

	/// Whether an error has been recorded at exactly the given path
	pub fn has_error_at(&self, path: &str) -> bool {
		self.0.iter().any(|error| error.path == path)
	}
}

impl Display for ValidationErrors {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let errors = self
			.0
			.iter()
			.map(ToString::to_string)
			.collect::<Vec<_>>()
			.join("; ");
		write!(f, "invalid app spec: {}", errors)
	}
}

/// A manifest on disk could not be decoded back into an app spec because it is
/// missing something the codec relies on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} manifest at `{field}`: {message}")]
pub struct SchemaError {
	/// The kind of the offending manifest, such as `Deployment`
	pub kind: &'static str,
	/// The field within the manifest that is invalid
	pub field: String,
	/// What is wrong with it
	pub message: String,
}

impl SchemaError {
	/// Creates a new schema error for the given manifest kind
	pub fn new(kind: &'static str, field: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			kind,
			field: field.into(),
			message: message.into(),
		}
	}
}
