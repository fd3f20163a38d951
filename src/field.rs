use std::any::Any;
use std::cell::{OnceCell, Ref, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::hashed::Hashed;
use crate::value::{FieldValue, Record};

/// Back-reference from a bound field to the data object that owns it.
pub trait Owner {
	/// Called after a field's value actually changed.
	fn mark_dirty(&self, field: &'static str);

	/// Called with the encoded old and new values of a change.
	fn record_change(&self, field: &'static str, old: Record, new: Record);
}

struct Binding {
	owner: Weak<dyn Owner>,
	name: &'static str,
}

/// Identifies a callback registered with [`Field::on_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldListener(u32);

type ChangedFn<T> = Rc<dyn Fn(&T)>;

struct Listeners<T> {
	next: u32,
	list: SmallVec<[(FieldListener, ChangedFn<T>); 1]>,
}

/// An observable value cell with equality-gated mutation.
pub struct Field<T> {
	value: RefCell<Hashed<T>>,
	binding: OnceCell<Binding>,
	persist: bool,
	listeners: RefCell<Listeners<T>>,
}

impl<T> Default for Field<T>
where
	T: FieldValue + Default,
{
	fn default() -> Self {
		Field::new(Default::default())
	}
}

impl<T> Field<T>
where
	T: FieldValue,
{
	pub fn new(value: T) -> Self {
		Self::with_persist(value, true)
	}

	/// A field excluded from snapshots.
	pub fn transient(value: T) -> Self {
		Self::with_persist(value, false)
	}

	fn with_persist(value: T, persist: bool) -> Self {
		Field {
			value: RefCell::new(Hashed::new(value)),
			binding: OnceCell::new(),
			persist,
			listeners: RefCell::new(Listeners {
				next: 0,
				list: SmallVec::new(),
			}),
		}
	}

	pub fn get(&self) -> T {
		self.value.borrow().value.clone()
	}

	pub fn borrow(&self) -> Ref<'_, T> {
		Ref::map(self.value.borrow(), |v| &v.value)
	}

	pub fn with<R>(&self, func: impl FnOnce(&T) -> R) -> R {
		func(&self.value.borrow().value)
	}

	pub fn hash(&self) -> u64 {
		self.value.borrow().hash
	}

	#[inline]
	pub fn set(&self, value: T) {
		let _ = self.replace(value);
	}

	/// Stores `value` and returns the previous one. Nothing is notified
	/// when the two compare equal.
	pub fn replace(&self, value: T) -> T {
		let old = {
			let mut current = self.value.borrow_mut();
			if current.is_same(&value) {
				return value;
			}
			current.store(value)
		};

		self.changed(&old);
		old
	}

	pub fn update(&self, func: impl FnOnce(&mut T)) {
		let old = {
			let mut current = self.value.borrow_mut();
			let old = current.value.clone();
			func(&mut current.value);
			if current.value == old {
				return;
			}
			current.rehash();
			old
		};

		self.changed(&old);
	}

	fn changed(&self, old: &T) {
		let new = self.get();

		let listeners: SmallVec<[ChangedFn<T>; 2]> = self
			.listeners
			.borrow()
			.list
			.iter()
			.map(|(_, func)| func.clone())
			.collect();
		for func in listeners {
			func(&new);
		}

		if let Some(binding) = self.binding.get() {
			if let Some(owner) = binding.owner.upgrade() {
				owner.record_change(binding.name, old.to_record(), new.to_record());
				owner.mark_dirty(binding.name);
			}
		}
	}

	pub fn on_changed(&self, func: impl Fn(&T) + 'static) -> FieldListener {
		let mut listeners = self.listeners.borrow_mut();
		let id = FieldListener(listeners.next);
		listeners.next += 1;
		listeners.list.push((id, Rc::new(func)));
		id
	}

	pub fn remove_listener(&self, id: FieldListener) -> bool {
		let mut listeners = self.listeners.borrow_mut();
		let before = listeners.list.len();
		listeners.list.retain(|(other, _)| *other != id);
		listeners.list.len() != before
	}
}

impl<T> Field<T> {
	/// Binds the field to its owner. Only the first call has an effect;
	/// later calls keep the original binding.
	pub fn bind(&self, owner: Weak<dyn Owner>, name: &'static str) {
		if self.binding.set(Binding { owner, name }).is_err() {
			tracing::trace!(field = name, "field already bound, keeping first binding");
		}
	}

	pub fn name(&self) -> Option<&'static str> {
		self.binding.get().map(|b| b.name)
	}

	pub fn is_bound(&self) -> bool {
		self.binding.get().is_some()
	}

	pub fn should_persist(&self) -> bool {
		self.persist
	}
}

/// Type-erased view of a [`Field`] used by data objects and the watcher.
pub trait AnyField {
	fn bind(&self, owner: Weak<dyn Owner>, name: &'static str);

	/// The hash cached at the last write.
	fn value_hash(&self) -> u64;

	/// Hashes the current value again, running the type's hash code.
	fn compute_hash(&self) -> u64;

	/// A copy of the current value for the owner's diff cache.
	fn snapshot(&self) -> Box<dyn Any>;

	/// Whether `cached` holds a value equal to the live one. A cached value
	/// of another type never matches.
	fn matches(&self, cached: &dyn Any) -> bool;

	fn record(&self) -> Record;

	/// Whether `record` decodes into this field's type.
	fn decodes(&self, record: &Record) -> bool;

	/// Whether the current value survives `record`/`restore` unchanged.
	/// Compared by hash, so `NaN` round-trips.
	fn round_trips(&self) -> bool;

	/// Sets the value from a record; `false` when the record can't be decoded.
	fn restore(&self, record: &Record) -> bool;

	fn should_persist(&self) -> bool;
}

impl<T: FieldValue> AnyField for Field<T> {
	fn bind(&self, owner: Weak<dyn Owner>, name: &'static str) {
		Field::bind(self, owner, name)
	}

	fn value_hash(&self) -> u64 {
		self.hash()
	}

	fn compute_hash(&self) -> u64 {
		self.value.borrow().value.value_hash()
	}

	fn snapshot(&self) -> Box<dyn Any> {
		Box::new(self.get())
	}

	fn matches(&self, cached: &dyn Any) -> bool {
		match cached.downcast_ref::<T>() {
			Some(cached) => *cached == self.value.borrow().value,
			None => false,
		}
	}

	fn record(&self) -> Record {
		self.value.borrow().value.to_record()
	}

	fn decodes(&self, record: &Record) -> bool {
		T::from_record(record).is_some()
	}

	fn round_trips(&self) -> bool {
		let value = self.value.borrow();
		T::from_record(&value.value.to_record()).map_or(false, |decoded| decoded.value_hash() == value.hash)
	}

	fn restore(&self, record: &Record) -> bool {
		match T::from_record(record) {
			Some(value) => {
				self.set(value);
				true
			}
			None => false,
		}
	}

	fn should_persist(&self) -> bool {
		self.persist
	}
}

impl<T> Debug for Field<T>
where
	T: Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.value.borrow().value.fmt(f)
	}
}
