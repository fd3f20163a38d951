use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use fxhash::FxHashSet;

/// How a data object's changes are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateMode {
	/// Field mutations queue an explicit (object, field) diff.
	#[default]
	EventDriven,
	/// The object's state hash is recomputed and compared every tick.
	Polled,
}

/// Index of an object in the watcher's slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(pub(crate) u32);

impl Slot {
	pub fn index(self) -> usize {
		self.0 as usize
	}
}

/// What the watcher needs from a registered data object.
pub(crate) trait Watched {
	fn diff_field(&self, field: &str) -> bool;

	fn diff_all_fields(&self) -> usize;

	/// Combined hash of every declared field, recomputed from the live
	/// values. May run user code and panic.
	fn state_hash(&self) -> u64;

	fn object_name(&self) -> Rc<str>;

	/// Drops the dirty flag of a polled object whose hash didn't move.
	fn clear_dirty(&self);
}

struct Entry {
	object: Weak<dyn Watched>,
	mode: UpdateMode,
}

/// Slot table, dirty queue and hash arrays behind [`Runtime::tick`].
///
/// Only the tick loop mutates it. The hash arrays are handed to worker
/// threads for the comparison step and are never resized while that runs.
///
/// [`Runtime::tick`]: crate::Runtime::tick
pub(crate) struct Watcher {
	objects: Vec<Option<Entry>>,
	previous: Vec<u64>,
	current: Vec<u64>,
	capacity: usize,
	queue: VecDeque<(Slot, &'static str)>,
	queued: FxHashSet<(Slot, &'static str)>,
	free: Vec<Slot>,
	retired: Vec<Slot>,
	next: u32,
}

impl Watcher {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		let mut objects = Vec::with_capacity(capacity);
		objects.resize_with(capacity, || None);
		Watcher {
			objects,
			previous: vec![0; capacity],
			current: vec![0; capacity],
			capacity,
			queue: VecDeque::new(),
			queued: FxHashSet::default(),
			free: Vec::new(),
			retired: Vec::new(),
			next: 0,
		}
	}

	pub fn register(&mut self, object: Weak<dyn Watched>, mode: UpdateMode, initial_hash: u64) -> Slot {
		let slot = match self.free.pop() {
			Some(slot) => slot,
			None => {
				let slot = Slot(self.next);
				self.next += 1;
				slot
			}
		};

		self.ensure_capacity(slot.index() + 1);

		let seed = match mode {
			UpdateMode::EventDriven => 0,
			UpdateMode::Polled => initial_hash,
		};
		self.previous[slot.index()] = seed;
		self.current[slot.index()] = seed;
		self.objects[slot.index()] = Some(Entry { object, mode });
		slot
	}

	pub fn unregister(&mut self, slot: Slot) -> bool {
		let Some(entry) = self.objects.get_mut(slot.index()) else {
			return false;
		};
		if entry.take().is_none() {
			return false;
		}

		self.previous[slot.index()] = 0;
		self.current[slot.index()] = 0;

		let before = self.queue.len();
		self.queue.retain(|(queued, _)| *queued != slot);
		self.queued.retain(|(queued, _)| *queued != slot);
		if self.queue.len() != before {
			tracing::trace!(slot = slot.0, dropped = before - self.queue.len(), "purged pending diffs");
		}

		// Not reusable until the current tick is over.
		self.retired.push(slot);
		true
	}

	fn ensure_capacity(&mut self, len: usize) {
		if len <= self.capacity {
			return;
		}

		let mut capacity = self.capacity;
		while capacity < len {
			capacity *= 2;
		}
		tracing::debug!(from = self.capacity, to = capacity, "growing watcher capacity");

		self.objects.resize_with(capacity, || None);
		self.previous.resize(capacity, 0);
		self.current.resize(capacity, 0);
		self.capacity = capacity;
	}

	/// Queues a field diff; returns `false` when the pair is already queued.
	pub fn enqueue(&mut self, slot: Slot, field: &'static str) -> bool {
		if self.objects.get(slot.index()).map_or(true, |e| e.is_none()) {
			return false;
		}
		if !self.queued.insert((slot, field)) {
			tracing::trace!(slot = slot.0, field, "diff already queued");
			return false;
		}
		self.queue.push_back((slot, field));
		true
	}

	/// Takes the current queue in FIFO order. Pairs queued afterwards wait
	/// for the next drain.
	pub fn drain_queue(&mut self) -> Vec<(Slot, &'static str)> {
		self.queued.clear();
		self.queue.drain(..).collect()
	}

	pub fn object(&self, slot: Slot) -> Option<Rc<dyn Watched>> {
		self.objects
			.get(slot.index())
			.and_then(|e| e.as_ref())
			.and_then(|e| e.object.upgrade())
	}

	pub fn polled(&self) -> Vec<(Slot, Weak<dyn Watched>)> {
		self.objects
			.iter()
			.enumerate()
			.filter_map(|(index, entry)| match entry {
				Some(entry) if entry.mode == UpdateMode::Polled => {
					Some((Slot(index as u32), entry.object.clone()))
				}
				_ => None,
			})
			.collect()
	}

	pub fn set_current(&mut self, slot: Slot, hash: u64) {
		if self.objects[slot.index()].is_some() {
			self.current[slot.index()] = hash;
		}
	}

	/// Accepts the current hash of `slot` as its new baseline.
	pub fn settle(&mut self, slot: Slot) {
		self.previous[slot.index()] = self.current[slot.index()];
	}

	/// The hash arrays over every slot ever assigned.
	pub fn hashes(&self) -> (&[u64], &[u64]) {
		let len = self.next as usize;
		(&self.previous[..len], &self.current[..len])
	}

	/// Makes slots retired during this tick available again.
	pub fn end_tick(&mut self) {
		self.free.append(&mut self.retired);
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn pending(&self) -> usize {
		self.queue.len()
	}

	pub fn len(&self) -> usize {
		self.objects.iter().filter(|e| e.is_some()).count()
	}
}
