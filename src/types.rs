//! Common value types shared across the document store, the hub and the
//! HTTP/realtime surfaces.

use serde::{Deserialize, Serialize};

/// Opaque user identifier, the `sub` claim of a verified access token.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Membership role. Ordered: a higher role implicitly grants everything a
/// lower role grants.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Viewer,
	Editor,
	Owner,
}

impl Role {
	pub fn can_edit(self) -> bool {
		self >= Role::Editor
	}

	pub fn can_manage_members(self) -> bool {
		self == Role::Owner
	}
}

impl std::str::FromStr for Role {
	type Err = crate::error::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"viewer" => Ok(Role::Viewer),
			"editor" => Ok(Role::Editor),
			"owner" => Ok(Role::Owner),
			_ => Err(crate::error::Error::Validation(format!("unknown role: {s}"))),
		}
	}
}

// vim: ts=4
