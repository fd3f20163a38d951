//! Causal context: which reaction is currently running on this thread.
//!
//! Mutations performed while a [`CauseScope`] is alive are attributed to the
//! innermost scope's name in the history buffer.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

/// Name recorded for mutations that happen outside of any reaction.
pub const UNKNOWN_CAUSE: &str = "Unknown";

thread_local! {
	static ACTIVE: RefCell<Vec<Rc<str>>> = const { RefCell::new(Vec::new()) };
}

/// Marks a reaction as the active cause until dropped.
///
/// Scopes nest; dropping restores the previous cause, also during unwinding.
#[must_use]
pub struct CauseScope {
	depth: usize,
	// Scopes are tied to the thread whose stack they pushed onto.
	_not_send: PhantomData<*const ()>,
}

impl CauseScope {
	pub fn enter(name: Rc<str>) -> Self {
		let depth = ACTIVE.with(|active| {
			let mut active = active.borrow_mut();
			active.push(name);
			active.len()
		});

		CauseScope {
			depth,
			_not_send: PhantomData,
		}
	}
}

impl Drop for CauseScope {
	fn drop(&mut self) {
		ACTIVE.with(|active| {
			let mut active = active.borrow_mut();
			debug_assert_eq!(active.len(), self.depth, "cause scopes dropped out of order");
			active.truncate(self.depth.saturating_sub(1));
		});
	}
}

/// The innermost active cause, if any.
pub fn active_cause() -> Option<Rc<str>> {
	ACTIVE.with(|active| active.borrow().last().cloned())
}

/// Runs `func` with `name` as the active cause.
pub fn with_cause<R>(name: Rc<str>, func: impl FnOnce() -> R) -> R {
	let _scope = CauseScope::enter(name);
	func()
}
