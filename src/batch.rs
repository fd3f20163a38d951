use std::cell::{Cell, OnceCell, RefCell};
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};

use crate::cause::CauseScope;
use crate::object::{DataObject, ObjectBody};
use crate::parallel;
use crate::reaction::{resolve_field, FilterFn, ReactFn};
use crate::registry::{ListenerId, RegistryEventKind};
use crate::runtime::{Runtime, RuntimeInner, TickHook};
use crate::schema::Data;

/// A reaction that polls one field across many objects.
///
/// Instead of subscribing to change events it keeps a previous/current
/// hash pair per observed object, compares them in parallel at the end of
/// every tick and then runs `func` for each changed object in order.
pub struct BatchReaction<T: Data> {
	body: Rc<BatchBody<T>>,
}

impl<T: Data> Clone for BatchReaction<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

pub struct BatchBody<T: Data> {
	name: Rc<str>,
	field: String,
	resolved: OnceCell<Option<usize>>,
	filter: RefCell<Option<FilterFn<T>>>,
	func: ReactFn<T>,
	invocations: Cell<u64>,
	inner: RefCell<BatchInner<T>>,
	this: Weak<BatchBody<T>>,
}

struct BatchInner<T: Data> {
	runtime: Weak<RuntimeInner>,
	listener: Option<ListenerId>,
	hook: Option<u64>,
	objects: Vec<Weak<ObjectBody<T>>>,
	addrs: Vec<usize>,
	previous: Vec<u64>,
	current: Vec<u64>,
}

impl<T: Data> BatchReaction<T> {
	#[must_use]
	pub fn new(name: impl Into<Rc<str>>, field: impl Into<String>, func: impl Fn(&DataObject<T>) + 'static) -> Self {
		BatchReaction {
			body: Rc::new_cyclic(|this| BatchBody {
				name: name.into(),
				field: field.into(),
				resolved: OnceCell::new(),
				filter: RefCell::new(None),
				func: Rc::new(func),
				invocations: Cell::new(0),
				inner: RefCell::new(BatchInner {
					runtime: Weak::new(),
					listener: None,
					hook: None,
					objects: Vec::new(),
					addrs: Vec::new(),
					previous: Vec::new(),
					current: Vec::new(),
				}),
				this: this.clone(),
			}),
		}
	}

	#[must_use]
	pub fn with_filter(self, filter: impl Fn(&DataObject<T>) -> bool + 'static) -> Self {
		*self.body.filter.borrow_mut() = Some(Rc::new(filter));
		self
	}

	pub fn name(&self) -> &str {
		&self.body.name
	}

	pub fn is_inert(&self) -> bool {
		self.body.resolved().is_none()
	}

	pub fn is_active(&self) -> bool {
		self.body.inner.borrow().hook.is_some()
	}

	pub fn invocations(&self) -> u64 {
		self.body.invocations.get()
	}

	pub fn observed(&self) -> usize {
		self.body.inner.borrow().objects.len()
	}

	pub fn activate(&self, runtime: &Runtime) {
		if self.is_active() || self.is_inert() {
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
		let hook = runtime.add_hook(self.body.this.clone() as Weak<dyn TickHook>);

		{
			let mut inner = self.body.inner.borrow_mut();
			inner.runtime = Rc::downgrade(runtime.inner());
			inner.listener = Some(listener);
			inner.hook = Some(hook);
		}

		for object in runtime.registry().get_all::<T>() {
			self.body.observe(&object);
		}

		tracing::debug!(reaction = %self.body.name, observed = self.observed(), "batch reaction activated");
	}

	pub fn deactivate(&self) {
		let (runtime, listener, hook) = {
			let mut inner = self.body.inner.borrow_mut();
			let Some(hook) = inner.hook.take() else {
				return;
			};
			inner.objects.clear();
			inner.addrs.clear();
			inner.previous.clear();
			inner.current.clear();
			(std::mem::take(&mut inner.runtime), inner.listener.take(), hook)
		};

		if let Some(runtime) = runtime.upgrade() {
			if let Some(listener) = listener {
				runtime.registry.unsubscribe(listener);
			}
			Runtime::remove_hook(&runtime, hook);
		}

		tracing::debug!(reaction = %self.body.name, "batch reaction deactivated");
	}
}

impl<T: Data> BatchBody<T> {
	fn resolved(&self) -> Option<usize> {
		*self.resolved.get_or_init(|| match resolve_field::<T>(&self.name, &self.field) {
			Ok(field) => crate::schema::Schema::<T>::of().position(field),
			Err(err) => {
				tracing::warn!(%err, "batch reaction is inert");
				None
			}
		})
	}

	fn field_hash(object: &DataObject<T>, index: usize) -> u64 {
		object.schema().fields()[index].field(object.data()).value_hash()
	}

	fn observe(&self, object: &DataObject<T>) {
		let Some(index) = self.resolved() else {
			return;
		};
		if self.inner.borrow().addrs.contains(&object.addr()) {
			return;
		}
		let filter = self.filter.borrow().clone();
		if !filter.map_or(true, |filter| filter(object)) {
			return;
		}

		let hash = Self::field_hash(object, index);
		let mut inner = self.inner.borrow_mut();
		inner.objects.push(object.downgrade());
		inner.addrs.push(object.addr());
		inner.previous.push(hash);
		inner.current.push(hash);
	}

	fn forget(&self, object: &DataObject<T>) {
		let mut inner = self.inner.borrow_mut();
		if let Some(position) = inner.addrs.iter().position(|a| *a == object.addr()) {
			inner.objects.swap_remove(position);
			inner.addrs.swap_remove(position);
			inner.previous.swap_remove(position);
			inner.current.swap_remove(position);
		}
	}
}

impl<T: Data> TickHook for BatchBody<T> {
	fn tick(&self, runtime: &RuntimeInner) -> usize {
		let Some(index) = self.resolved() else {
			return 0;
		};

		let changed: Vec<DataObject<T>> = {
			let mut inner = self.inner.borrow_mut();
			let inner = &mut *inner;

			for (object, current) in inner.objects.iter().zip(inner.current.iter_mut()) {
				*current = object
					.upgrade()
					.map_or(0, |body| Self::field_hash(&DataObject::from_body(body), index));
			}

			let flags = parallel::changed_slots(
				&inner.previous,
				&inner.current,
				runtime.workers(),
				runtime.config.parallel_threshold,
			);

			let mut changed = Vec::new();
			for (i, _) in flags.iter().enumerate().filter(|(_, f)| **f) {
				inner.previous[i] = inner.current[i];
				if let Some(body) = inner.objects[i].upgrade() {
					changed.push(DataObject::from_body(body));
				}
			}
			changed
		};

		let mut invoked = 0;
		for object in &changed {
			let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
				let _cause = CauseScope::enter(self.name.clone());
				self.invocations.set(self.invocations.get() + 1);
				(self.func)(object);
			}));
			match result {
				Ok(()) => invoked += 1,
				Err(_) => {
					tracing::error!(reaction = %self.name, object = %object.name(), "batch callback panicked")
				}
			}
		}
		invoked
	}
}

impl<T: Data> Drop for BatchInner<T> {
	fn drop(&mut self) {
		let Some(runtime) = self.runtime.upgrade() else {
			return;
		};
		if let Some(listener) = self.listener.take() {
			runtime.registry.unsubscribe(listener);
		}
		if let Some(hook) = self.hook.take() {
			Runtime::remove_hook(&runtime, hook);
		}
	}
}

impl<T: Data> std::fmt::Debug for BatchReaction<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BatchReaction")
			.field("name", &self.body.name)
			.field("field", &self.body.field)
			.finish()
	}
}
