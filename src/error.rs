use thiserror::Error;

/// Errors reported by configuration and persistence hooks.
///
/// None of these cross a tick: the runtime logs them and carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
	#[error("reaction `{reaction}` declares no field")]
	MissingField { reaction: String },
	#[error("reaction `{reaction}` observes `{field}`, which `{type_name}` does not declare")]
	UnknownField {
		reaction: String,
		type_name: &'static str,
		field: String,
	},
	/// A snapshot record couldn't be decoded into the field's type.
	#[error("snapshot value for `{object}.{field}` has an incompatible kind")]
	RestoreMismatch { object: String, field: String },
	#[error("snapshot field `{object}.{field}` is not declared")]
	UnknownSnapshotField { object: String, field: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn messages_name_the_offending_field() {
		let err = Error::UnknownField {
			reaction: "low-health".into(),
			type_name: "Health",
			field: "mana".into(),
		};
		assert_eq!(
			err.to_string(),
			"reaction `low-health` observes `mana`, which `Health` does not declare"
		);

		let err: Box<dyn std::error::Error> = Box::new(Error::MissingField { reaction: "r".into() });
		assert_eq!(err.to_string(), "reaction `r` declares no field");
	}
}
