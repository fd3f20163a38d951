use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

use fxhash::FxHashMap;

use crate::field::AnyField;

/// A type whose observable fields can be tracked by a
/// [`DataObject`](crate::DataObject).
///
/// Usually implemented with [`data_fields!`](crate::data_fields).
pub trait Data: Sized + 'static {
	/// Lists the observable fields of this type. Called once per type.
	fn describe() -> Vec<FieldDescriptor<Self>>;
}

pub struct FieldDescriptor<T> {
	name: &'static str,
	access: fn(&T) -> &dyn AnyField,
	persist: bool,
}

impl<T> FieldDescriptor<T> {
	pub fn new(name: &'static str, access: fn(&T) -> &dyn AnyField, persist: bool) -> Self {
		FieldDescriptor {
			name,
			access,
			persist,
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn persist(&self) -> bool {
		self.persist
	}

	#[inline]
	pub fn field<'a>(&self, data: &'a T) -> &'a dyn AnyField {
		(self.access)(data)
	}
}

/// The memoized descriptor list of one data type.
pub struct Schema<T> {
	fields: Vec<FieldDescriptor<T>>,
}

thread_local! {
	static SCHEMAS: RefCell<FxHashMap<TypeId, Rc<dyn Any>>> = RefCell::new(FxHashMap::default());
}

impl<T: Data> Schema<T> {
	/// Returns the schema for `T`, resolving it on first use.
	pub fn of() -> Rc<Schema<T>> {
		let cached = SCHEMAS.with(|schemas| schemas.borrow().get(&TypeId::of::<T>()).cloned());
		if let Some(schema) = cached.and_then(|s| Rc::downcast::<Schema<T>>(s).ok()) {
			return schema;
		}

		// Resolved outside the borrow so `describe` may touch other schemas.
		let schema = Rc::new(Schema {
			fields: T::describe(),
		});
		tracing::debug!(
			type_name = std::any::type_name::<T>(),
			fields = schema.fields.len(),
			"resolved data schema"
		);

		let stored = SCHEMAS.with(|schemas| {
			schemas
				.borrow_mut()
				.entry(TypeId::of::<T>())
				.or_insert_with(|| schema.clone() as Rc<dyn Any>)
				.clone()
		});
		Rc::downcast::<Schema<T>>(stored).unwrap_or(schema)
	}
}

impl<T> Schema<T> {
	pub fn fields(&self) -> &[FieldDescriptor<T>] {
		&self.fields
	}

	pub fn find(&self, name: &str) -> Option<&FieldDescriptor<T>> {
		self.fields.iter().find(|d| d.name == name)
	}

	pub fn position(&self, name: &str) -> Option<usize> {
		self.fields.iter().position(|d| d.name == name)
	}

	pub fn len(&self) -> usize {
		self.fields.len()
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}
}
