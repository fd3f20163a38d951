use std::fmt::Debug;
use std::ops::Deref;

use crate::value::FieldValue;

/// A field value paired with its state hash, kept in sync on every write.
pub struct Hashed<T> {
	pub value: T,
	pub hash: u64,
}

impl<T: FieldValue> Hashed<T> {
	pub fn new(value: T) -> Self {
		let hash = value.value_hash();
		Self { value, hash }
	}

	/// Whether storing `value` would leave the field unchanged. Hashes are
	/// compared first; equality decides.
	pub fn is_same(&self, value: &T) -> bool {
		self.hash == value.value_hash() && self.value == *value
	}

	/// Swaps in `value` and returns the previous one.
	pub fn store(&mut self, value: T) -> T {
		self.hash = value.value_hash();
		std::mem::replace(&mut self.value, value)
	}

	/// Recomputes the hash after the value was mutated in place.
	pub fn rehash(&mut self) {
		self.hash = self.value.value_hash();
	}
}

impl<T> Deref for Hashed<T> {
	type Target = T;
	fn deref(&self) -> &Self::Target {
		&self.value
	}
}

impl<T: Debug> Debug for Hashed<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:?} #{:016x}", self.value, self.hash)
	}
}
