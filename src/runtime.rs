use std::cell::{Cell, RefCell};
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};

use crate::config::Config;
use crate::history::History;
use crate::object::guarded_hash;
use crate::parallel;
use crate::registry::Registry;
use crate::watcher::{Slot, Watched, Watcher};

/// Work run at the end of every tick, after the watcher has settled.
pub(crate) trait TickHook {
	/// Returns the number of callbacks it invoked.
	fn tick(&self, runtime: &RuntimeInner) -> usize;
}

pub(crate) struct RuntimeInner {
	pub(crate) config: Config,
	pub(crate) registry: Registry,
	pub(crate) watcher: RefCell<Watcher>,
	pub(crate) history: History,
	frame: Cell<u64>,
	pub(crate) hooks: RefCell<Vec<(u64, Weak<dyn TickHook>)>>,
	next_hook: Cell<u64>,
}

impl RuntimeInner {
	pub(crate) fn workers(&self) -> usize {
		self.config.worker_count()
	}
}

/// What one [`Runtime::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
	pub frame: u64,
	/// Queued (object, field) pairs that were diffed.
	pub diffed: usize,
	/// Queued pairs whose field actually changed.
	pub changed: usize,
	/// Queued pairs dropped because their object was released.
	pub skipped: usize,
	/// Polled objects hashed this tick.
	pub polled: usize,
	/// Polled objects whose hash changed.
	pub polled_changed: usize,
	/// Callbacks invoked by batch reactions.
	pub batch_invocations: usize,
}

/// The context every data object and reaction is attached to: registry,
/// watcher and history buffer, advanced one [`tick`](Runtime::tick) at a
/// time from a single thread.
#[derive(Clone)]
pub struct Runtime {
	inner: Rc<RuntimeInner>,
}

impl Default for Runtime {
	fn default() -> Self {
		Runtime::new(Config::default())
	}
}

impl Runtime {
	pub fn new(config: Config) -> Self {
		Runtime {
			inner: Rc::new(RuntimeInner {
				registry: Registry::new(),
				watcher: RefCell::new(Watcher::new(config.initial_capacity)),
				history: History::with_capacity(config.history_capacity),
				frame: Cell::new(0),
				hooks: RefCell::new(Vec::new()),
				next_hook: Cell::new(0),
				config,
			}),
		}
	}

	pub(crate) fn inner(&self) -> &Rc<RuntimeInner> {
		&self.inner
	}

	pub fn config(&self) -> &Config {
		&self.inner.config
	}

	pub fn registry(&self) -> &Registry {
		&self.inner.registry
	}

	pub fn history(&self) -> &History {
		&self.inner.history
	}

	pub fn frame(&self) -> u64 {
		self.inner.frame.get()
	}

	/// Diffs waiting for the next tick.
	pub fn pending(&self) -> usize {
		self.inner.watcher.borrow().pending()
	}

	/// Current slot capacity of the watcher.
	pub fn capacity(&self) -> usize {
		self.inner.watcher.borrow().capacity()
	}

	/// Objects currently watched.
	pub fn watched(&self) -> usize {
		self.inner.watcher.borrow().len()
	}

	/// Session boundary: clears the history and restarts frame numbering.
	/// Live objects stay registered.
	pub fn reset(&self) {
		self.inner.frame.set(0);
		self.inner.history.set_frame(0);
		self.inner.history.clear();
	}

	pub(crate) fn add_hook(&self, hook: Weak<dyn TickHook>) -> u64 {
		let id = self.inner.next_hook.get();
		self.inner.next_hook.set(id + 1);
		self.inner.hooks.borrow_mut().push((id, hook));
		id
	}

	pub(crate) fn remove_hook(inner: &RuntimeInner, id: u64) {
		inner.hooks.borrow_mut().retain(|(other, _)| *other != id);
	}

	/// Runs one propagation pass:
	///
	/// 1. drains queued field diffs in FIFO order,
	/// 2. rehashes every polled object,
	/// 3. compares previous and current hashes in parallel,
	/// 4. diffs every polled object whose hash moved,
	/// 5. runs batch reactions.
	///
	/// Diffs queued by callbacks during the tick run on the next one. A
	/// panicking object is logged and skipped.
	pub fn tick(&self) -> TickReport {
		let inner = &*self.inner;
		let frame = inner.frame.get() + 1;
		inner.frame.set(frame);
		inner.history.set_frame(frame);

		let _span = tracing::trace_span!("tick", frame).entered();
		let mut report = TickReport {
			frame,
			..TickReport::default()
		};

		let queue = inner.watcher.borrow_mut().drain_queue();
		for (slot, field) in queue {
			let object = inner.watcher.borrow().object(slot);
			let Some(object) = object else {
				report.skipped += 1;
				continue;
			};
			report.diffed += 1;
			if isolated(&*object, || object.diff_field(field)) == Some(true) {
				report.changed += 1;
			}
		}

		let polled = inner.watcher.borrow().polled();
		report.polled = polled.len();
		for (slot, object) in &polled {
			let hash = object.upgrade().map_or(0, |object| guarded_hash(&*object));
			inner.watcher.borrow_mut().set_current(*slot, hash);
		}

		let flags = {
			let watcher = inner.watcher.borrow();
			let (previous, current) = watcher.hashes();
			parallel::changed_slots(previous, current, inner.workers(), inner.config.parallel_threshold)
		};

		// Set away and back before the tick: nothing to diff, nothing pending.
		for (slot, object) in &polled {
			if flags.get(slot.index()) == Some(&false) {
				if let Some(object) = object.upgrade() {
					object.clear_dirty();
				}
			}
		}

		for index in flags.iter().enumerate().filter(|(_, f)| **f).map(|(i, _)| i) {
			let slot = Slot(index as u32);
			let object = {
				let mut watcher = inner.watcher.borrow_mut();
				watcher.settle(slot);
				watcher.object(slot)
			};
			report.polled_changed += 1;
			if let Some(object) = object {
				isolated(&*object, || object.diff_all_fields());
			}
		}

		let hooks: Vec<_> = inner
			.hooks
			.borrow()
			.iter()
			.filter_map(|(_, hook)| hook.upgrade())
			.collect();
		for hook in hooks {
			report.batch_invocations += hook.tick(inner);
		}

		inner.watcher.borrow_mut().end_tick();
		tracing::trace!(?report, "tick finished");
		report
	}
}

fn isolated<R>(object: &dyn Watched, func: impl FnOnce() -> R) -> Option<R> {
	match std::panic::catch_unwind(AssertUnwindSafe(func)) {
		Ok(result) => Some(result),
		Err(_) => {
			tracing::error!(object = %object.object_name(), "diff panicked, skipping object for this tick");
			None
		}
	}
}

impl std::fmt::Debug for Runtime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Runtime")
			.field("frame", &self.frame())
			.field("watched", &self.watched())
			.field("history", &self.inner.history)
			.finish()
	}
}
