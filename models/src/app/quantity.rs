use std::{
	fmt::{Display, Formatter},
	str::FromStr,
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The dimension a quantity measures. Each dimension accepts its own set of
/// unit suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Dimension {
	/// CPU cores, either whole or in millicores (`500m`)
	Cpu,
	/// Bytes, with decimal (`M`, `G`) or binary (`Mi`, `Gi`) suffixes. Used for
	/// memory limits and volume sizes alike
	Memory,
}

impl Dimension {
	/// The unit suffixes accepted for this dimension. The empty suffix is
	/// always allowed
	pub fn allowed_units(&self) -> &'static [&'static str] {
		match self {
			Self::Cpu => &["", "m"],
			Self::Memory => &[
				"", "k", "M", "G", "T", "P", "E", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei",
			],
		}
	}
}

/// A resource quantity such as `512Mi` or `0.5`. The original string is kept
/// as-is so that it is written back to the manifests exactly as entered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Quantity(String);

impl Quantity {
	/// Parses the quantity and checks its unit against the allow-list of the
	/// given dimension
	pub fn parse(value: &str, dimension: Dimension) -> Result<Self, String> {
		let (_, unit) = split_amount(value)?;
		if !dimension.allowed_units().contains(&unit) {
			return Err(format!(
				"unit `{}` is not valid for {}, expected one of: {}",
				unit,
				dimension,
				dimension
					.allowed_units()
					.iter()
					.filter(|unit| !unit.is_empty())
					.copied()
					.collect::<Vec<_>>()
					.join(", ")
			));
		}
		Ok(Self(value.to_string()))
	}

	/// Checks that an already deserialized quantity is valid for the given
	/// dimension
	pub fn check(&self, dimension: Dimension) -> Result<(), String> {
		Self::parse(&self.0, dimension).map(|_| ())
	}

	/// The quantity exactly as it was written
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl FromStr for Quantity {
	type Err = String;

	/// Parses a quantity without knowing its dimension. Any unit that is valid
	/// in at least one dimension is accepted
	fn from_str(value: &str) -> Result<Self, Self::Err> {
		Self::parse(value, Dimension::Memory).or_else(|_| Self::parse(value, Dimension::Cpu))
	}
}

impl Display for Quantity {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&Quantity> for k8s_openapi::apimachinery::pkg::api::resource::Quantity {
	fn from(quantity: &Quantity) -> Self {
		Self(quantity.0.clone())
	}
}

impl From<&k8s_openapi::apimachinery::pkg::api::resource::Quantity> for Quantity {
	fn from(quantity: &k8s_openapi::apimachinery::pkg::api::resource::Quantity) -> Self {
		Self(quantity.0.clone())
	}
}

/// Splits `1.5Gi` into `("1.5", "Gi")`, checking that the amount is a
/// non-negative decimal number
fn split_amount(value: &str) -> Result<(&str, &str), String> {
	if value.is_empty() {
		return Err("quantity must not be empty".to_string());
	}

	let split_at = value
		.find(|c: char| !(c.is_ascii_digit() || c == '.'))
		.unwrap_or(value.len());
	let (amount, unit) = value.split_at(split_at);

	let digits = amount.chars().filter(char::is_ascii_digit).count();
	let dots = amount.chars().filter(|c| *c == '.').count();
	if digits == 0 || dots > 1 {
		return Err(format!("`{}` does not start with a valid amount", value));
	}

	Ok((amount, unit))
}
