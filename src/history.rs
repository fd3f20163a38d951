use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::value::{InlineText, Record, RecordKind};

/// One attributed field change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
	pub frame: u64,
	pub object: InlineText,
	pub field: InlineText,
	pub reactor: InlineText,
	pub old: Record,
	pub new: Record,
}

impl HistoryEntry {
	/// Kind tag of the recorded value.
	pub fn kind(&self) -> RecordKind {
		self.new.kind()
	}
}

/// Identifies a listener registered with [`History::on_updated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryListener(u64);

type UpdatedFn = Arc<dyn Fn(usize) + Send + Sync>;

struct Entries {
	ring: Option<VecDeque<HistoryEntry>>,
	capacity: usize,
}

struct HistoryInner {
	entries: Mutex<Entries>,
	frame: AtomicU64,
	listeners: Mutex<Vec<(HistoryListener, UpdatedFn)>>,
	next_listener: AtomicU64,
}

/// Append-only, fixed-capacity causal change log.
///
/// Cheap to clone; clones share the same buffer. Appends are serialized,
/// so entries may be logged from worker threads.
#[derive(Clone)]
pub struct History {
	inner: Arc<HistoryInner>,
}

impl History {
	pub fn with_capacity(capacity: usize) -> Self {
		History {
			inner: Arc::new(HistoryInner {
				entries: Mutex::new(Entries {
					ring: None,
					capacity: capacity.max(1),
				}),
				frame: AtomicU64::new(0),
				listeners: Mutex::new(Vec::new()),
				next_listener: AtomicU64::new(0),
			}),
		}
	}

	/// Appends an entry for the current frame, evicting the oldest one when
	/// full. Names and text values are stored inline and cut to
	/// [`INLINE_TEXT_CAPACITY`](crate::INLINE_TEXT_CAPACITY) bytes.
	pub fn log_change(&self, object: &str, field: &str, old: Record, new: Record, reactor: &str) {
		let entry = HistoryEntry {
			frame: self.frame(),
			object: InlineText::new(object),
			field: InlineText::new(field),
			reactor: InlineText::new(reactor),
			old,
			new,
		};

		let len = {
			let mut entries = self.inner.entries.lock();
			let capacity = entries.capacity;
			let ring = entries
				.ring
				.get_or_insert_with(|| VecDeque::with_capacity(capacity.min(1024)));
			if ring.len() == capacity {
				ring.pop_front();
			}
			ring.push_back(entry);
			ring.len()
		};

		self.notify(len);
	}

	/// Empties the buffer. Live objects and the registry are unaffected.
	pub fn clear(&self) {
		{
			let mut entries = self.inner.entries.lock();
			if let Some(ring) = entries.ring.as_mut() {
				ring.clear();
			}
		}
		tracing::debug!("history cleared");
		self.notify(0);
	}

	/// An immutable copy of the current entries, oldest first.
	pub fn snapshot(&self) -> Vec<HistoryEntry> {
		let entries = self.inner.entries.lock();
		match &entries.ring {
			Some(ring) => ring.iter().copied().collect(),
			None => Vec::new(),
		}
	}

	pub fn len(&self) -> usize {
		self.inner.entries.lock().ring.as_ref().map_or(0, |r| r.len())
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn capacity(&self) -> usize {
		self.inner.entries.lock().capacity
	}

	pub fn last(&self) -> Option<HistoryEntry> {
		self.inner
			.entries
			.lock()
			.ring
			.as_ref()
			.and_then(|r| r.back().copied())
	}

	pub fn frame(&self) -> u64 {
		self.inner.frame.load(Ordering::Acquire)
	}

	pub(crate) fn set_frame(&self, frame: u64) {
		self.inner.frame.store(frame, Ordering::Release);
	}

	/// Registers a callback fired with the new length after every append
	/// and after a clear.
	pub fn on_updated(&self, func: impl Fn(usize) + Send + Sync + 'static) -> HistoryListener {
		let id = HistoryListener(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
		self.inner.listeners.lock().push((id, Arc::new(func)));
		id
	}

	pub fn remove_listener(&self, id: HistoryListener) -> bool {
		let mut listeners = self.inner.listeners.lock();
		let before = listeners.len();
		listeners.retain(|(other, _)| *other != id);
		listeners.len() != before
	}

	fn notify(&self, len: usize) {
		let listeners: Vec<UpdatedFn> = self
			.inner
			.listeners
			.lock()
			.iter()
			.map(|(_, func)| func.clone())
			.collect();
		for func in listeners {
			func(len);
		}
	}
}

impl Default for History {
	fn default() -> Self {
		History::with_capacity(crate::Config::default().history_capacity)
	}
}

impl std::fmt::Debug for History {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("History")
			.field("len", &self.len())
			.field("capacity", &self.capacity())
			.finish()
	}
}
