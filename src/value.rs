use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Maximum number of bytes an [`InlineText`] can hold.
pub const INLINE_TEXT_CAPACITY: usize = 63;

/// A fixed-size, `Copy` string used inside history records.
///
/// Text longer than [`INLINE_TEXT_CAPACITY`] bytes is truncated on a
/// character boundary.
#[derive(Clone, Copy)]
pub struct InlineText {
	len: u8,
	bytes: [u8; INLINE_TEXT_CAPACITY],
}

impl InlineText {
	pub const EMPTY: InlineText = InlineText {
		len: 0,
		bytes: [0; INLINE_TEXT_CAPACITY],
	};

	pub fn new(text: &str) -> Self {
		let mut end = text.len().min(INLINE_TEXT_CAPACITY);
		while !text.is_char_boundary(end) {
			end -= 1;
		}
		if end < text.len() {
			tracing::trace!(len = text.len(), kept = end, "inline text truncated");
		}

		let mut bytes = [0; INLINE_TEXT_CAPACITY];
		bytes[..end].copy_from_slice(&text.as_bytes()[..end]);
		InlineText {
			len: end as u8,
			bytes,
		}
	}

	pub fn as_str(&self) -> &str {
		std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
	}

	pub fn len(&self) -> usize {
		self.len as usize
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}
}

impl Default for InlineText {
	fn default() -> Self {
		InlineText::EMPTY
	}
}

impl From<&str> for InlineText {
	fn from(text: &str) -> Self {
		InlineText::new(text)
	}
}

impl PartialEq for InlineText {
	fn eq(&self, other: &Self) -> bool {
		self.as_str() == other.as_str()
	}
}

impl Eq for InlineText {}

impl PartialEq<&str> for InlineText {
	fn eq(&self, other: &&str) -> bool {
		self.as_str() == *other
	}
}

impl Debug for InlineText {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		Debug::fmt(self.as_str(), f)
	}
}

impl Display for InlineText {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
	None,
	Bool,
	Int,
	UInt,
	Float,
	Text,
}

/// Kind-tagged encoding of a field value, small enough to be copied
/// around freely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Record {
	None,
	Bool(bool),
	Int(i64),
	UInt(u64),
	Float(f64),
	Text(InlineText),
}

impl Record {
	pub fn kind(&self) -> RecordKind {
		match self {
			Record::None => RecordKind::None,
			Record::Bool(_) => RecordKind::Bool,
			Record::Int(_) => RecordKind::Int,
			Record::UInt(_) => RecordKind::UInt,
			Record::Float(_) => RecordKind::Float,
			Record::Text(_) => RecordKind::Text,
		}
	}

	pub fn text(text: &str) -> Self {
		Record::Text(InlineText::new(text))
	}
}

impl Display for Record {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Record::None => f.write_str("none"),
			Record::Bool(v) => Display::fmt(v, f),
			Record::Int(v) => Display::fmt(v, f),
			Record::UInt(v) => Display::fmt(v, f),
			Record::Float(v) => Display::fmt(v, f),
			Record::Text(v) => Display::fmt(v, f),
		}
	}
}

/// A value that can live inside a [`Field`](crate::Field).
///
/// Equality gates mutation, `value_hash` feeds the polled state hash and
/// `to_record` feeds the history buffer.
pub trait FieldValue: Clone + PartialEq + 'static {
	fn value_hash(&self) -> u64;

	fn to_record(&self) -> Record;

	/// Decodes a persisted record. Types that cannot be restored keep the
	/// default and return `None`.
	fn from_record(record: &Record) -> Option<Self> {
		let _ = record;
		None
	}
}

/// Hashes any `Hash` value the same way field state hashes are computed.
pub fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
	fxhash::hash64(value)
}

macro_rules! signed {
	($($t:ty),*) => {$(
		impl FieldValue for $t {
			fn value_hash(&self) -> u64 {
				hash_of(self)
			}

			fn to_record(&self) -> Record {
				Record::Int(*self as i64)
			}

			fn from_record(record: &Record) -> Option<Self> {
				match *record {
					Record::Int(v) => <$t>::try_from(v).ok(),
					Record::UInt(v) => <$t>::try_from(v).ok(),
					_ => None,
				}
			}
		}
	)*};
}

macro_rules! unsigned {
	($($t:ty),*) => {$(
		impl FieldValue for $t {
			fn value_hash(&self) -> u64 {
				hash_of(self)
			}

			fn to_record(&self) -> Record {
				Record::UInt(*self as u64)
			}

			fn from_record(record: &Record) -> Option<Self> {
				match *record {
					Record::UInt(v) => <$t>::try_from(v).ok(),
					Record::Int(v) => <$t>::try_from(v).ok(),
					_ => None,
				}
			}
		}
	)*};
}

signed!(i8, i16, i32, i64, isize);
unsigned!(u8, u16, u32, u64, usize);

impl FieldValue for f32 {
	fn value_hash(&self) -> u64 {
		hash_of(&self.to_bits())
	}

	fn to_record(&self) -> Record {
		Record::Float(*self as f64)
	}

	fn from_record(record: &Record) -> Option<Self> {
		match *record {
			Record::Float(v) => Some(v as f32),
			_ => None,
		}
	}
}

impl FieldValue for f64 {
	fn value_hash(&self) -> u64 {
		hash_of(&self.to_bits())
	}

	fn to_record(&self) -> Record {
		Record::Float(*self)
	}

	fn from_record(record: &Record) -> Option<Self> {
		match *record {
			Record::Float(v) => Some(v),
			_ => None,
		}
	}
}

impl FieldValue for bool {
	fn value_hash(&self) -> u64 {
		hash_of(self)
	}

	fn to_record(&self) -> Record {
		Record::Bool(*self)
	}

	fn from_record(record: &Record) -> Option<Self> {
		match *record {
			Record::Bool(v) => Some(v),
			_ => None,
		}
	}
}

impl FieldValue for char {
	fn value_hash(&self) -> u64 {
		hash_of(self)
	}

	fn to_record(&self) -> Record {
		let mut buf = [0; 4];
		Record::text(self.encode_utf8(&mut buf))
	}

	fn from_record(record: &Record) -> Option<Self> {
		match record {
			Record::Text(text) => {
				let mut chars = text.as_str().chars();
				match (chars.next(), chars.next()) {
					(Some(c), None) => Some(c),
					_ => None,
				}
			}
			_ => None,
		}
	}
}

impl FieldValue for String {
	fn value_hash(&self) -> u64 {
		hash_of(self)
	}

	fn to_record(&self) -> Record {
		Record::text(self)
	}

	fn from_record(record: &Record) -> Option<Self> {
		match record {
			Record::Text(text) => Some(text.as_str().to_owned()),
			_ => None,
		}
	}
}

impl FieldValue for &'static str {
	fn value_hash(&self) -> u64 {
		hash_of(self)
	}

	fn to_record(&self) -> Record {
		Record::text(self)
	}
}

impl FieldValue for () {
	fn value_hash(&self) -> u64 {
		0
	}

	fn to_record(&self) -> Record {
		Record::None
	}

	fn from_record(record: &Record) -> Option<Self> {
		match record {
			Record::None => Some(()),
			_ => None,
		}
	}
}

impl<T: FieldValue> FieldValue for Option<T> {
	fn value_hash(&self) -> u64 {
		match self {
			Some(value) => hash_of(&(1u8, value.value_hash())),
			None => 0,
		}
	}

	fn to_record(&self) -> Record {
		match self {
			Some(value) => value.to_record(),
			None => Record::None,
		}
	}

	fn from_record(record: &Record) -> Option<Self> {
		match record {
			Record::None => Some(None),
			other => T::from_record(other).map(Some),
		}
	}
}
