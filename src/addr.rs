use std::any::Any;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::object::{DataObject, ObjectBody};
use crate::schema::Data;

/// A type-erased data object, compared and hashed by the address of its
/// allocation so two handles to one object always collide.
#[derive(Clone)]
pub struct ObjectKey {
	body: Rc<dyn Any>,
}

impl ObjectKey {
	pub fn of<T: Data>(object: &DataObject<T>) -> Self {
		ObjectKey {
			body: object.body.clone(),
		}
	}

	/// The allocation address, ignoring the vtable.
	pub fn addr(&self) -> usize {
		Rc::as_ptr(&self.body) as *const () as usize
	}

	pub fn downcast<T: Data>(&self) -> Option<DataObject<T>> {
		self.body
			.clone()
			.downcast::<ObjectBody<T>>()
			.ok()
			.map(DataObject::from_body)
	}
}

impl PartialEq for ObjectKey {
	fn eq(&self, other: &Self) -> bool {
		self.addr() == other.addr()
	}
}

impl Eq for ObjectKey {}

impl Hash for ObjectKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		state.write_usize(self.addr())
	}
}
