use std::any::Any;
use std::cell::RefCell;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};

use fxhash::{FxHashMap, FxHasher64};
use smallvec::SmallVec;

use crate::cause::{active_cause, UNKNOWN_CAUSE};
use crate::error::{Error, Result};
use crate::field::Owner;
use crate::runtime::{Runtime, RuntimeInner};
use crate::schema::{Data, Schema};
use crate::value::Record;
use crate::watcher::{Slot, UpdateMode, Watched};

/// Identifies a callback registered with [`DataObject::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ChangedFn<T> = Rc<dyn Fn(&DataObject<T>, &'static str)>;

struct Subscriber<T: Data> {
	id: SubscriptionId,
	func: ChangedFn<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
	Constructed,
	Active,
	Released,
}

struct ObjectState {
	name: Rc<str>,
	entity: Option<u64>,
	mode: UpdateMode,
	cache: FxHashMap<&'static str, Box<dyn Any>>,
	dirty: bool,
	last_changed: Option<&'static str>,
	lifecycle: Lifecycle,
	runtime: Weak<RuntimeInner>,
	slot: Option<Slot>,
}

/// Persisted field values of one object.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
	pub object: String,
	pub fields: Vec<(&'static str, Record)>,
}

pub struct ObjectBody<T: Data> {
	data: T,
	schema: Rc<Schema<T>>,
	state: RefCell<ObjectState>,
	subscribers: RefCell<Vec<Subscriber<T>>>,
	next_subscription: std::cell::Cell<u64>,
	this: Weak<ObjectBody<T>>,
}

/// A live container of observable fields.
///
/// Cloning gives another handle to the same object; identity is the
/// allocation, never the contents.
pub struct DataObject<T: Data> {
	pub(crate) body: Rc<ObjectBody<T>>,
}

impl<T: Data> Clone for DataObject<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T: Data> Deref for DataObject<T> {
	type Target = T;
	fn deref(&self) -> &Self::Target {
		&self.body.data
	}
}

impl<T: Data> DataObject<T> {
	/// Creates an event-driven object and binds its fields.
	pub fn new(name: impl Into<Rc<str>>, data: T) -> Self {
		let object = DataObject {
			body: Rc::new_cyclic(|this| ObjectBody {
				data,
				schema: Schema::of(),
				state: RefCell::new(ObjectState {
					name: name.into(),
					entity: None,
					mode: UpdateMode::EventDriven,
					cache: FxHashMap::default(),
					dirty: false,
					last_changed: None,
					lifecycle: Lifecycle::Constructed,
					runtime: Weak::new(),
					slot: None,
				}),
				subscribers: RefCell::new(Vec::new()),
				next_subscription: std::cell::Cell::new(0),
				this: this.clone(),
			}),
		};
		object.activate_fields();
		object
	}

	/// Sets the update mode. Takes effect at the next [`initialize`](Self::initialize).
	pub fn with_mode(self, mode: UpdateMode) -> Self {
		self.body.state.borrow_mut().mode = mode;
		self
	}

	pub fn with_entity(self, entity: u64) -> Self {
		self.body.state.borrow_mut().entity = Some(entity);
		self
	}

	pub fn name(&self) -> Rc<str> {
		self.body.state.borrow().name.clone()
	}

	pub fn entity(&self) -> Option<u64> {
		self.body.state.borrow().entity
	}

	pub fn mode(&self) -> UpdateMode {
		self.body.state.borrow().mode
	}

	pub fn data(&self) -> &T {
		&self.body.data
	}

	pub fn schema(&self) -> &Schema<T> {
		&self.body.schema
	}

	pub fn is_dirty(&self) -> bool {
		self.body.state.borrow().dirty
	}

	pub fn last_changed_field(&self) -> Option<&'static str> {
		self.body.state.borrow().last_changed
	}

	pub fn is_active(&self) -> bool {
		self.body.state.borrow().lifecycle == Lifecycle::Active
	}

	pub fn slot(&self) -> Option<Slot> {
		self.body.state.borrow().slot
	}

	pub fn ptr_eq(&self, other: &DataObject<T>) -> bool {
		Rc::ptr_eq(&self.body, &other.body)
	}

	pub(crate) fn addr(&self) -> usize {
		Rc::as_ptr(&self.body) as *const () as usize
	}

	pub(crate) fn downgrade(&self) -> Weak<ObjectBody<T>> {
		Rc::downgrade(&self.body)
	}

	pub(crate) fn from_body(body: Rc<ObjectBody<T>>) -> Self {
		DataObject { body }
	}

	/// Binds every declared field to this object and seeds the diff cache
	/// with the current values. Safe to call again: fields keep their
	/// first binding and the cache is resynchronized.
	pub fn activate_fields(&self) {
		let owner = self.body.this.clone() as Weak<dyn Owner>;
		let mut state = self.body.state.borrow_mut();
		for descriptor in self.body.schema.fields() {
			let field = descriptor.field(&self.body.data);
			field.bind(owner.clone(), descriptor.name());
			state.cache.insert(descriptor.name(), field.snapshot());
		}
	}

	pub fn mark_dirty(&self, field: &'static str) {
		self.body.mark_dirty(field)
	}

	/// Compares one field against the cache and notifies subscribers when
	/// it changed. Always clears the dirty flag.
	pub fn diff_field(&self, field: &str) -> bool {
		self.body.diff_field(field)
	}

	/// Diffs every declared field; returns how many changed.
	pub fn diff_all_fields(&self) -> usize {
		self.body.diff_all_fields()
	}

	/// Subscribes to the object-level change event. Subscribers run in
	/// subscription order.
	pub fn subscribe(&self, func: impl Fn(&DataObject<T>, &'static str) + 'static) -> SubscriptionId {
		let id = SubscriptionId(self.body.next_subscription.get());
		self.body.next_subscription.set(id.0 + 1);
		self.body.subscribers.borrow_mut().push(Subscriber {
			id,
			func: Rc::new(func),
		});
		id
	}

	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let mut subscribers = self.body.subscribers.borrow_mut();
		let before = subscribers.len();
		subscribers.retain(|s| s.id != id);
		subscribers.len() != before
	}

	pub fn subscriber_count(&self) -> usize {
		self.body.subscribers.borrow().len()
	}

	/// Activation hook: registers the object with the runtime's registry
	/// and watcher. A no-op while already active.
	pub fn initialize(&self, runtime: &Runtime) {
		if self.is_active() {
			return;
		}
		self.activate_fields();

		let inner = runtime.inner();
		let mode = self.mode();
		let hash = guarded_hash(&*self.body);
		let watched = self.body.this.clone() as Weak<dyn Watched>;
		let slot = inner.watcher.borrow_mut().register(watched, mode, hash);
		{
			let mut state = self.body.state.borrow_mut();
			state.lifecycle = Lifecycle::Active;
			state.runtime = Rc::downgrade(inner);
			state.slot = Some(slot);
			state.dirty = false;
		}

		tracing::debug!(object = %self.name(), slot = slot.0, ?mode, "object initialized");
		inner.registry.register(self);
	}

	/// Release hook: unregisters the object. Pending and future diffs are
	/// dropped until the next [`initialize`](Self::initialize).
	pub fn release(&self) {
		let (runtime, slot) = {
			let mut state = self.body.state.borrow_mut();
			if state.lifecycle != Lifecycle::Active {
				return;
			}
			state.lifecycle = Lifecycle::Released;
			state.dirty = false;
			(std::mem::take(&mut state.runtime), state.slot.take())
		};

		let Some(runtime) = runtime.upgrade() else {
			return;
		};
		if let Some(slot) = slot {
			runtime.watcher.borrow_mut().unregister(slot);
		}

		tracing::debug!(object = %self.name(), "object released");
		runtime.registry.unregister(self);
	}

	/// Persistence hook: the values of every persisted field. Fields whose
	/// value wouldn't come back unchanged from its record are left out.
	pub fn snapshot(&self) -> Snapshot {
		let fields = self
			.body
			.schema
			.fields()
			.iter()
			.filter(|descriptor| descriptor.persist())
			.filter_map(|descriptor| {
				let field = descriptor.field(&self.body.data);
				if !field.should_persist() {
					return None;
				}
				if !field.round_trips() {
					tracing::trace!(object = %self.name(), field = descriptor.name(), "not restorable, skipped");
					return None;
				}
				Some((descriptor.name(), field.record()))
			})
			.collect();

		Snapshot {
			object: self.name().to_string(),
			fields,
		}
	}

	/// Persistence hook: sets fields from `snapshot` through the normal
	/// mutation path and returns how many were restored. Every record is
	/// checked first; on error nothing is applied.
	pub fn restore(&self, snapshot: &Snapshot) -> Result<usize> {
		let mut fields = Vec::with_capacity(snapshot.fields.len());
		for (name, record) in &snapshot.fields {
			let Some(descriptor) = self.body.schema.find(name) else {
				return Err(Error::UnknownSnapshotField {
					object: self.name().to_string(),
					field: name.to_string(),
				});
			};

			let field = descriptor.field(&self.body.data);
			if !field.decodes(record) {
				let err = Error::RestoreMismatch {
					object: self.name().to_string(),
					field: name.to_string(),
				};
				tracing::warn!(%err, "restore rejected");
				return Err(err);
			}
			fields.push((field, record));
		}

		for (field, record) in &fields {
			field.restore(record);
		}
		Ok(fields.len())
	}
}

impl<T: Data> ObjectBody<T> {
	fn handle(&self) -> Option<DataObject<T>> {
		self.this.upgrade().map(DataObject::from_body)
	}

	fn is_released(&self) -> bool {
		self.state.borrow().lifecycle == Lifecycle::Released
	}

	fn mark_dirty(&self, field: &'static str) {
		let target = {
			let mut state = self.state.borrow_mut();
			if state.lifecycle == Lifecycle::Released {
				return;
			}
			state.dirty = true;
			state.last_changed = Some(field);
			match (state.mode, state.slot) {
				(UpdateMode::EventDriven, Some(slot)) => state.runtime.upgrade().map(|rt| (rt, slot)),
				_ => None,
			}
		};

		if let Some((runtime, slot)) = target {
			runtime.watcher.borrow_mut().enqueue(slot, field);
		}
	}

	fn diff_field(&self, field: &str) -> bool {
		if self.is_released() {
			return false;
		}

		let changed = {
			let mut state = self.state.borrow_mut();
			let changed = self.schema.find(field).and_then(|descriptor| {
				let live = descriptor.field(&self.data);
				let same = state
					.cache
					.get(descriptor.name())
					.map_or(false, |cached| live.matches(cached.as_ref()));
				if same {
					return None;
				}
				state.cache.insert(descriptor.name(), live.snapshot());
				Some(descriptor.name())
			});
			state.dirty = false;
			changed
		};

		match changed {
			Some(field) => {
				tracing::trace!(object = %self.state.borrow().name, field, "field changed");
				self.notify(field);
				true
			}
			None => false,
		}
	}

	fn diff_all_fields(&self) -> usize {
		if self.is_released() {
			return 0;
		}

		let changed: SmallVec<[&'static str; 4]> = {
			let mut state = self.state.borrow_mut();
			let mut changed = SmallVec::new();
			for descriptor in self.schema.fields() {
				let live = descriptor.field(&self.data);
				let same = state
					.cache
					.get(descriptor.name())
					.map_or(false, |cached| live.matches(cached.as_ref()));
				if !same {
					state.cache.insert(descriptor.name(), live.snapshot());
					changed.push(descriptor.name());
				}
			}
			state.dirty = false;
			changed
		};

		for field in &changed {
			self.notify(field);
		}
		changed.len()
	}

	fn notify(&self, field: &'static str) {
		let Some(handle) = self.handle() else {
			return;
		};

		let subscribers: SmallVec<[(SubscriptionId, ChangedFn<T>); 4]> = self
			.subscribers
			.borrow()
			.iter()
			.map(|s| (s.id, s.func.clone()))
			.collect();

		for (id, func) in subscribers {
			// Skip subscribers removed by an earlier callback.
			let alive = self.subscribers.borrow().iter().any(|s| s.id == id);
			if alive {
				func(&handle, field);
			}
		}
	}

	fn state_hash(&self) -> u64 {
		use std::hash::Hasher;

		let mut hasher = FxHasher64::default();
		for descriptor in self.schema.fields() {
			hasher.write_u64(descriptor.field(&self.data).compute_hash());
		}
		hasher.finish()
	}
}

impl<T: Data> Owner for ObjectBody<T> {
	fn mark_dirty(&self, field: &'static str) {
		ObjectBody::mark_dirty(self, field)
	}

	fn record_change(&self, field: &'static str, old: Record, new: Record) {
		let (runtime, name) = {
			let state = self.state.borrow();
			if state.lifecycle != Lifecycle::Active {
				return;
			}
			(state.runtime.upgrade(), state.name.clone())
		};

		if let Some(runtime) = runtime {
			let cause = active_cause();
			let reactor = cause.as_deref().unwrap_or(UNKNOWN_CAUSE);
			runtime.history.log_change(&name, field, old, new, reactor);
		}
	}
}

impl<T: Data> Watched for ObjectBody<T> {
	fn diff_field(&self, field: &str) -> bool {
		ObjectBody::diff_field(self, field)
	}

	fn diff_all_fields(&self) -> usize {
		ObjectBody::diff_all_fields(self)
	}

	fn state_hash(&self) -> u64 {
		ObjectBody::state_hash(self)
	}

	fn object_name(&self) -> Rc<str> {
		self.state.borrow().name.clone()
	}

	fn clear_dirty(&self) {
		self.state.borrow_mut().dirty = false;
	}
}

/// Computes a polled state hash, substituting `0` when the computation
/// panics.
pub(crate) fn guarded_hash(object: &dyn Watched) -> u64 {
	match std::panic::catch_unwind(AssertUnwindSafe(|| object.state_hash())) {
		Ok(hash) => hash,
		Err(_) => {
			tracing::warn!(object = %object.object_name(), "state hash panicked, using 0 for this tick");
			0
		}
	}
}

impl<T: Data> std::fmt::Debug for DataObject<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.body.state.borrow();
		f.debug_struct("DataObject")
			.field("name", &state.name)
			.field("entity", &state.entity)
			.field("mode", &state.mode)
			.field("dirty", &state.dirty)
			.finish()
	}
}
