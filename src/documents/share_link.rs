//! Share-link token generation, hashing and constant-time verification.

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::types::Role;

/// Requested access level when rotating a share link.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareMode {
	View,
	Edit,
}

impl ShareMode {
	pub fn role(self) -> Role {
		match self {
			ShareMode::View => Role::Viewer,
			ShareMode::Edit => Role::Editor,
		}
	}
}

/// 24 bytes (192 bits) of randomness, comfortably above the 144-bit floor
/// the document store contract requires.
const TOKEN_BYTES: usize = 24;

pub fn generate_token() -> String {
	let mut bytes = [0u8; TOKEN_BYTES];
	rand::rng().fill_bytes(&mut bytes);
	hex_encode(&bytes)
}

pub fn hash_token(token: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(token.as_bytes());
	hex_encode(&hasher.finalize())
}

/// Compares two hex-encoded hashes without branching on a byte mismatch,
/// so the comparison time doesn't leak how many leading bytes matched.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
	let (a, b) = (a.as_bytes(), b.as_bytes());
	if a.len() != b.len() {
		return false;
	}
	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}
	diff == 0
}

fn hex_encode(bytes: &[u8]) -> String {
	use std::fmt::Write;
	let mut s = String::with_capacity(bytes.len() * 2);
	for b in bytes {
		let _ = write!(s, "{b:02x}");
	}
	s
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generated_tokens_are_unique_and_right_length() {
		let a = generate_token();
		let b = generate_token();
		assert_ne!(a, b);
		assert_eq!(a.len(), TOKEN_BYTES * 2);
	}

	#[test]
	fn hash_is_deterministic() {
		let token = generate_token();
		assert_eq!(hash_token(&token), hash_token(&token));
	}

	#[test]
	fn constant_time_eq_matches_regular_eq() {
		let a = hash_token("one");
		let b = hash_token("one");
		let c = hash_token("two");
		assert!(constant_time_eq(&a, &b));
		assert!(!constant_time_eq(&a, &c));
	}

	#[test]
	fn constant_time_eq_rejects_length_mismatch() {
		assert!(!constant_time_eq("ab", "abcd"));
	}

	#[test]
	fn share_mode_maps_to_expected_role() {
		assert_eq!(ShareMode::View.role(), Role::Viewer);
		assert_eq!(ShareMode::Edit.role(), Role::Editor);
	}
}

// vim: ts=4
