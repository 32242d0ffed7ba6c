use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

/// Declares a unit type that always serializes as the given boolean, and
/// refuses to deserialize from the other one. Used to tag response bodies so
/// that a success body can never be mistaken for an error body.
macro_rules! constant_bool {
	($(#[$meta:meta])* $name:ident = $value:literal) => {
		$(#[$meta])*
		#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
		pub struct $name;

		impl Serialize for $name {
			fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
			where
				S: Serializer,
			{
				serializer.serialize_bool($value)
			}
		}

		impl<'de> Deserialize<'de> for $name {
			fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
			where
				D: Deserializer<'de>,
			{
				if bool::deserialize(deserializer)? == $value {
					Ok($name)
				} else {
					Err(D::Error::custom(concat!("bool is not ", stringify!($value))))
				}
			}
		}

		impl From<$name> for bool {
			fn from(_: $name) -> Self {
				$value
			}
		}
	};
}

constant_bool! {
	/// A constant `true`, the `success` field of successful responses
	True = true
}

constant_bool! {
	/// A constant `false`, the `success` field of error responses
	False = false
}
