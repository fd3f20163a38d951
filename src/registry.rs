use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fxhash::FxHashMap;

use crate::addr::ObjectKey;
use crate::object::DataObject;
use crate::schema::Data;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryEventKind {
	Registered,
	Unregistered,
}

/// A registration transition, as seen by tooling.
#[derive(Clone)]
pub struct RegistryEvent {
	pub kind: RegistryEventKind,
	pub type_id: TypeId,
	pub type_name: &'static str,
	pub object_name: Rc<str>,
	pub object: ObjectKey,
}

impl RegistryEvent {
	/// The typed handle, when the event concerns a `T`.
	pub fn downcast<T: Data>(&self) -> Option<DataObject<T>> {
		self.object.downcast::<T>()
	}
}

impl std::fmt::Debug for RegistryEvent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RegistryEvent")
			.field("kind", &self.kind)
			.field("type_name", &self.type_name)
			.field("object_name", &self.object_name)
			.finish()
	}
}

/// Identifies a listener registered with the [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type EventFn = Rc<dyn Fn(&RegistryEvent)>;

struct Listener {
	id: ListenerId,
	filter: Option<TypeId>,
	alive: Rc<Cell<bool>>,
	func: EventFn,
}

struct Partition {
	type_name: &'static str,
	objects: Vec<ObjectKey>,
}

/// Per-type summary for tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSummary {
	pub type_id: TypeId,
	pub type_name: &'static str,
	pub live: usize,
}

/// Type-partitioned set of live data objects.
#[derive(Default)]
pub struct Registry {
	partitions: RefCell<FxHashMap<TypeId, Partition>>,
	listeners: RefCell<Vec<Listener>>,
	next_listener: Cell<u64>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds `object` to its type's partition. Returns `false` if it was
	/// already there.
	pub fn register<T: Data>(&self, object: &DataObject<T>) -> bool {
		let key = ObjectKey::of(object);
		{
			let mut partitions = self.partitions.borrow_mut();
			let partition = partitions.entry(TypeId::of::<T>()).or_insert_with(|| Partition {
				type_name: std::any::type_name::<T>(),
				objects: Vec::new(),
			});
			if partition.objects.contains(&key) {
				return false;
			}
			partition.objects.push(key);
		}

		tracing::debug!(object = %object.name(), type_name = std::any::type_name::<T>(), "registered");
		self.emit(RegistryEventKind::Registered, object);
		true
	}

	/// Removes `object`. Returns `false` if it wasn't registered. An empty
	/// partition is dropped.
	pub fn unregister<T: Data>(&self, object: &DataObject<T>) -> bool {
		let key = ObjectKey::of(object);
		{
			let mut partitions = self.partitions.borrow_mut();
			let Some(partition) = partitions.get_mut(&TypeId::of::<T>()) else {
				return false;
			};
			let Some(index) = partition.objects.iter().position(|o| *o == key) else {
				return false;
			};
			partition.objects.swap_remove(index);
			if partition.objects.is_empty() {
				partitions.remove(&TypeId::of::<T>());
			}
		}

		tracing::debug!(object = %object.name(), type_name = std::any::type_name::<T>(), "unregistered");
		self.emit(RegistryEventKind::Unregistered, object);
		true
	}

	/// A snapshot of every live `T`. Later registrations don't affect it.
	pub fn get_all<T: Data>(&self) -> Vec<DataObject<T>> {
		let partitions = self.partitions.borrow();
		let Some(partition) = partitions.get(&TypeId::of::<T>()) else {
			return Vec::new();
		};
		partition
			.objects
			.iter()
			.filter_map(ObjectKey::downcast::<T>)
			.collect()
	}

	pub fn count<T: Data>(&self) -> usize {
		self.partitions
			.borrow()
			.get(&TypeId::of::<T>())
			.map_or(0, |p| p.objects.len())
	}

	pub fn contains<T: Data>(&self, object: &DataObject<T>) -> bool {
		let key = ObjectKey::of(object);
		self.partitions
			.borrow()
			.get(&TypeId::of::<T>())
			.map_or(false, |p| p.objects.contains(&key))
	}

	pub fn has_partition<T: Data>(&self) -> bool {
		self.partitions.borrow().contains_key(&TypeId::of::<T>())
	}

	/// Every populated type with its live count, sorted by type name.
	pub fn types(&self) -> Vec<TypeSummary> {
		let mut types: Vec<_> = self
			.partitions
			.borrow()
			.iter()
			.map(|(type_id, p)| TypeSummary {
				type_id: *type_id,
				type_name: p.type_name,
				live: p.objects.len(),
			})
			.collect();
		types.sort_by(|a, b| a.type_name.cmp(b.type_name));
		types
	}

	/// Listens to every registration transition.
	pub fn subscribe(&self, func: impl Fn(&RegistryEvent) + 'static) -> ListenerId {
		self.add_listener(None, Rc::new(func))
	}

	/// Listens to transitions of `T` objects only.
	pub fn subscribe_type<T: Data>(&self, func: impl Fn(RegistryEventKind, &DataObject<T>) + 'static) -> ListenerId {
		self.add_listener(
			Some(TypeId::of::<T>()),
			Rc::new(move |event: &RegistryEvent| {
				if let Some(object) = event.downcast::<T>() {
					func(event.kind, &object)
				}
			}),
		)
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.borrow().len()
	}

	pub fn unsubscribe(&self, id: ListenerId) -> bool {
		let mut listeners = self.listeners.borrow_mut();
		let Some(index) = listeners.iter().position(|l| l.id == id) else {
			return false;
		};
		listeners.remove(index).alive.set(false);
		true
	}

	fn add_listener(&self, filter: Option<TypeId>, func: EventFn) -> ListenerId {
		let id = ListenerId(self.next_listener.get());
		self.next_listener.set(id.0 + 1);
		self.listeners.borrow_mut().push(Listener {
			id,
			filter,
			alive: Rc::new(Cell::new(true)),
			func,
		});
		id
	}

	fn emit<T: Data>(&self, kind: RegistryEventKind, object: &DataObject<T>) {
		let type_id = TypeId::of::<T>();
		let listeners: Vec<(Rc<Cell<bool>>, EventFn)> = self
			.listeners
			.borrow()
			.iter()
			.filter(|l| l.filter.map_or(true, |f| f == type_id))
			.map(|l| (l.alive.clone(), l.func.clone()))
			.collect();
		if listeners.is_empty() {
			return;
		}

		let event = RegistryEvent {
			kind,
			type_id,
			type_name: std::any::type_name::<T>(),
			object_name: object.name(),
			object: ObjectKey::of(object),
		};
		for (alive, func) in listeners {
			if alive.get() {
				func(&event);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Field;

	struct Crate {
		weight: Field<u32>,
	}

	crate::data_fields!(Crate { weight });

	struct Door;

	crate::data_fields!(Door {});

	fn make(name: &str) -> DataObject<Crate> {
		DataObject::new(name, Crate { weight: Field::new(1) })
	}

	#[test]
	fn register_is_idempotent() {
		let registry = Registry::new();
		let obj = make("a");
		assert!(registry.register(&obj));
		assert!(!registry.register(&obj));
		assert_eq!(registry.get_all::<Crate>().len(), 1);
		assert!(registry.get_all::<Door>().is_empty());
	}

	#[test]
	fn empty_partitions_are_dropped() {
		let registry = Registry::new();
		let obj = make("a");
		assert!(!registry.unregister(&obj));
		registry.register(&obj);
		assert!(registry.has_partition::<Crate>());
		assert!(registry.unregister(&obj));
		assert!(!registry.unregister(&obj));
		assert!(!registry.has_partition::<Crate>());
	}

	#[test]
	fn events_fire_once_per_transition() {
		let registry = Registry::new();
		let events = Rc::new(RefCell::new(Vec::new()));
		registry.subscribe({
			let events = events.clone();
			move |e| events.borrow_mut().push((e.kind, e.object_name.to_string()))
		});

		let obj = make("a");
		registry.register(&obj);
		registry.register(&obj);
		registry.unregister(&obj);
		registry.unregister(&obj);

		assert_eq!(
			*events.borrow(),
			vec![
				(RegistryEventKind::Registered, "a".to_string()),
				(RegistryEventKind::Unregistered, "a".to_string()),
			]
		);
	}

	#[test]
	fn typed_listeners_only_see_their_type() {
		let registry = Registry::new();
		let seen = Rc::new(Cell::new(0));
		let id = registry.subscribe_type::<Door>({
			let seen = seen.clone();
			move |_, _| seen.set(seen.get() + 1)
		});

		registry.register(&make("a"));
		registry.register(&DataObject::new("door", Door));
		assert_eq!(seen.get(), 1);

		assert!(registry.unsubscribe(id));
		registry.register(&DataObject::new("door2", Door));
		assert_eq!(seen.get(), 1);
	}

	#[test]
	fn enumeration_snapshot_tolerates_mutation() {
		let registry = Registry::new();
		let objects: Vec<_> = (0..4).map(|i| make(&format!("c{}", i))).collect();
		for obj in &objects {
			registry.register(obj);
		}

		for obj in registry.get_all::<Crate>() {
			registry.unregister(&obj);
			registry.register(&make("late"));
		}
		assert_eq!(registry.count::<Crate>(), 4);
		assert_eq!(registry.types()[0].live, 4);
	}
}
