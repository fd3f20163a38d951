//! Data-parallel comparison of previous and current state hashes.
//!
//! Workers only read the two hash slices and each writes its own disjoint
//! chunk of the output, so no synchronization is needed.

/// Reference implementation: `out[i] = previous[i] != current[i]`.
pub fn compare_sequential(previous: &[u64], current: &[u64], out: &mut [bool]) {
	debug_assert_eq!(previous.len(), current.len());
	debug_assert_eq!(previous.len(), out.len());

	for ((out, prev), curr) in out.iter_mut().zip(previous).zip(current) {
		*out = prev != curr;
	}
}

/// Same result as [`compare_sequential`], split across `workers` scoped
/// threads.
pub fn compare_parallel(previous: &[u64], current: &[u64], out: &mut [bool], workers: usize) {
	let len = out.len().min(previous.len()).min(current.len());
	let workers = workers.clamp(1, len.max(1));
	if workers == 1 {
		return compare_sequential(&previous[..len], &current[..len], &mut out[..len]);
	}

	let chunk = len.div_ceil(workers);
	std::thread::scope(|scope| {
		for ((out, prev), curr) in out[..len]
			.chunks_mut(chunk)
			.zip(previous[..len].chunks(chunk))
			.zip(current[..len].chunks(chunk))
		{
			scope.spawn(move || compare_sequential(prev, curr, out));
		}
	});
}

/// Produces the per-slot dirty flags, going parallel only once the slot
/// count reaches `threshold`.
pub fn changed_slots(previous: &[u64], current: &[u64], workers: usize, threshold: usize) -> Vec<bool> {
	let mut out = vec![false; previous.len().min(current.len())];
	if out.len() >= threshold && workers > 1 {
		compare_parallel(previous, current, &mut out, workers);
	} else {
		let len = out.len();
		compare_sequential(&previous[..len], &current[..len], &mut out);
	}
	out
}
