use std::cell::{Cell, OnceCell, RefCell};
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};

use fxhash::FxHashMap;

use crate::cause::CauseScope;
use crate::error::{Error, Result};
use crate::object::{DataObject, ObjectBody, SubscriptionId};
use crate::registry::{ListenerId, RegistryEventKind};
use crate::runtime::{Runtime, RuntimeInner};
use crate::schema::{Data, Schema};

pub(crate) type FilterFn<T> = Rc<dyn Fn(&DataObject<T>) -> bool>;
pub(crate) type ReactFn<T> = Rc<dyn Fn(&DataObject<T>)>;

/// Resolves a declared field name against `T`'s schema.
pub(crate) fn resolve_field<T: Data>(reaction: &str, field: &str) -> Result<&'static str> {
	if field.is_empty() {
		return Err(Error::MissingField {
			reaction: reaction.to_string(),
		});
	}

	Schema::<T>::of()
		.find(field)
		.map(|d| d.name())
		.ok_or_else(|| Error::UnknownField {
			reaction: reaction.to_string(),
			type_name: std::any::type_name::<T>(),
			field: field.to_string(),
		})
}

/// Calls `func` for every change of one declared field on every live `T`.
///
/// Callbacks run synchronously during the tick that detects the change,
/// with this reaction's name as the active cause.
pub struct Reaction<T: Data> {
	body: Rc<ReactionBody<T>>,
}

impl<T: Data> Clone for Reaction<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

pub struct ReactionBody<T: Data> {
	name: Rc<str>,
	field: String,
	resolved: OnceCell<Option<&'static str>>,
	filter: RefCell<Option<FilterFn<T>>>,
	func: ReactFn<T>,
	invocations: Cell<u64>,
	inner: RefCell<ReactionInner<T>>,
	this: Weak<ReactionBody<T>>,
}

struct ReactionInner<T: Data> {
	runtime: Weak<RuntimeInner>,
	listener: Option<ListenerId>,
	subscriptions: FxHashMap<usize, (Weak<ObjectBody<T>>, SubscriptionId)>,
	active: bool,
}

impl<T: Data> Reaction<T> {
	#[must_use]
	pub fn new(name: impl Into<Rc<str>>, field: impl Into<String>, func: impl Fn(&DataObject<T>) + 'static) -> Self {
		Reaction {
			body: Rc::new_cyclic(|this| ReactionBody {
				name: name.into(),
				field: field.into(),
				resolved: OnceCell::new(),
				filter: RefCell::new(None),
				func: Rc::new(func),
				invocations: Cell::new(0),
				inner: RefCell::new(ReactionInner {
					runtime: Weak::new(),
					listener: None,
					subscriptions: FxHashMap::default(),
					active: false,
				}),
				this: this.clone(),
			}),
		}
	}

	/// Only objects accepted by `filter` are observed. Applied to objects
	/// subscribed after this call.
	#[must_use]
	pub fn with_filter(self, filter: impl Fn(&DataObject<T>) -> bool + 'static) -> Self {
		*self.body.filter.borrow_mut() = Some(Rc::new(filter));
		self
	}

	pub fn name(&self) -> &str {
		&self.body.name
	}

	pub fn field(&self) -> &str {
		&self.body.field
	}

	/// The resolved field, or `None` when the declaration is invalid.
	/// Resolution happens once.
	pub fn resolved_field(&self) -> Option<&'static str> {
		self.body.resolved()
	}

	/// An inert reaction never subscribes nor runs.
	pub fn is_inert(&self) -> bool {
		self.resolved_field().is_none()
	}

	pub fn is_active(&self) -> bool {
		self.body.inner.borrow().active
	}

	pub fn invocations(&self) -> u64 {
		self.body.invocations.get()
	}

	/// Number of objects currently subscribed to.
	pub fn observed(&self) -> usize {
		self.body.inner.borrow().subscriptions.len()
	}

	/// Subscribes to every live `T` and to future registrations.
	pub fn activate(&self, runtime: &Runtime) {
		if self.is_active() {
			return;
		}
		if self.is_inert() {
			return;
		}

		let this = self.body.this.clone();
		let listener = runtime.registry().subscribe_type::<T>(move |kind, object| {
			if let Some(this) = this.upgrade() {
				match kind {
					RegistryEventKind::Registered => this.observe(object),
					RegistryEventKind::Unregistered => this.forget(object),
				}
			}
		});

		{
			let mut inner = self.body.inner.borrow_mut();
			inner.runtime = Rc::downgrade(runtime.inner());
			inner.listener = Some(listener);
			inner.active = true;
		}

		for object in runtime.registry().get_all::<T>() {
			self.body.observe(&object);
		}

		tracing::debug!(reaction = %self.body.name, field = %self.body.field, observed = self.observed(), "reaction activated");
	}

	/// Drops every subscription made by [`activate`](Self::activate).
	pub fn deactivate(&self) {
		let (runtime, listener, subscriptions) = {
			let mut inner = self.body.inner.borrow_mut();
			if !inner.active {
				return;
			}
			inner.active = false;
			(
				std::mem::take(&mut inner.runtime),
				inner.listener.take(),
				std::mem::take(&mut inner.subscriptions),
			)
		};

		if let (Some(runtime), Some(listener)) = (runtime.upgrade(), listener) {
			runtime.registry.unsubscribe(listener);
		}
		for (object, id) in subscriptions.into_values() {
			if let Some(object) = object.upgrade() {
				DataObject::from_body(object).unsubscribe(id);
			}
		}

		tracing::debug!(reaction = %self.body.name, "reaction deactivated");
	}
}

impl<T: Data> ReactionBody<T> {
	fn resolved(&self) -> Option<&'static str> {
		*self.resolved.get_or_init(|| match resolve_field::<T>(&self.name, &self.field) {
			Ok(field) => Some(field),
			Err(err) => {
				tracing::warn!(%err, "reaction is inert");
				None
			}
		})
	}

	fn accepts(&self, object: &DataObject<T>) -> bool {
		let filter = self.filter.borrow().clone();
		filter.map_or(true, |filter| filter(object))
	}

	fn observe(&self, object: &DataObject<T>) {
		if self.inner.borrow().subscriptions.contains_key(&object.addr()) {
			return;
		}
		if !self.accepts(object) {
			return;
		}

		let this = self.this.clone();
		let id = object.subscribe(move |object, field| {
			if let Some(this) = this.upgrade() {
				if this.resolved() == Some(field) {
					this.dispatch(object);
				}
			}
		});

		self.inner
			.borrow_mut()
			.subscriptions
			.insert(object.addr(), (object.downgrade(), id));
	}

	fn forget(&self, object: &DataObject<T>) {
		let removed = self.inner.borrow_mut().subscriptions.remove(&object.addr());
		if let Some((_, id)) = removed {
			object.unsubscribe(id);
		}
	}

	/// Runs the callback under this reaction's cause. A panic is logged and
	/// contained so later subscribers still see the change.
	fn dispatch(&self, object: &DataObject<T>) {
		let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
			let _cause = CauseScope::enter(self.name.clone());
			self.invocations.set(self.invocations.get() + 1);
			(self.func)(object);
		}));
		if result.is_err() {
			tracing::error!(reaction = %self.name, object = %object.name(), "reaction callback panicked");
		}
	}
}

impl<T: Data> Drop for ReactionInner<T> {
	fn drop(&mut self) {
		if let (Some(runtime), Some(listener)) = (self.runtime.upgrade(), self.listener.take()) {
			runtime.registry.unsubscribe(listener);
		}
		for (object, id) in self.subscriptions.drain().map(|(_, v)| v) {
			if let Some(object) = object.upgrade() {
				DataObject::from_body(object).unsubscribe(id);
			}
		}
	}
}

impl<T: Data> std::fmt::Debug for Reaction<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Reaction")
			.field("name", &self.body.name)
			.field("field", &self.body.field)
			.finish()
	}
}
