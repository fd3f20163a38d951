/// Tunables for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
	/// Starting slot capacity of the watcher's hash arrays. Doubles when
	/// exceeded and never shrinks.
	pub initial_capacity: usize,
	/// Number of entries kept by the history buffer before the oldest are
	/// evicted.
	pub history_capacity: usize,
	/// Slot count below which hash comparison stays on the ticking thread.
	pub parallel_threshold: usize,
	/// Worker threads for hash comparison; `0` uses the available
	/// parallelism.
	pub workers: usize,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			initial_capacity: 64,
			history_capacity: 4096,
			parallel_threshold: 256,
			workers: 0,
		}
	}
}

impl Config {
	pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
		self.initial_capacity = capacity.max(1);
		self
	}

	pub fn with_history_capacity(mut self, capacity: usize) -> Self {
		self.history_capacity = capacity.max(1);
		self
	}

	pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
		self.parallel_threshold = threshold;
		self
	}

	pub fn with_workers(mut self, workers: usize) -> Self {
		self.workers = workers;
		self
	}

	pub(crate) fn worker_count(&self) -> usize {
		if self.workers > 0 {
			return self.workers;
		}
		std::thread::available_parallelism()
			.map(|n| n.get())
			.unwrap_or(1)
	}
}
