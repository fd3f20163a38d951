use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fieldwatch::{
	data_fields, field_value, hash_of, reaction, BatchReaction, Config, DataObject, Field, FieldValue, Reaction, Record,
	RegistryEventKind, Runtime, UpdateMode, UNKNOWN_CAUSE,
};
use mockall::predicate::eq;


use mock::Spy;

struct Health {
	value: Field<i32>,
}

data_fields!(Health { value });

struct Armor {
	points: Field<u32>,
	label: Field<String>,
}

data_fields!(Armor { points, label: transient });

struct Body {
	x: Field<f32>,
	y: Field<f32>,
}

data_fields!(Body { x, y });

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Stance {
	Idle,
	Guard,
}

field_value!(Stance);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Rank {
	Squire,
	Knight,
}

impl std::fmt::Display for Rank {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Rank::Squire => "squire",
			Rank::Knight => "knight",
		})
	}
}

impl std::str::FromStr for Rank {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"squire" => Ok(Rank::Squire),
			"knight" => Ok(Rank::Knight),
			_ => Err(()),
		}
	}
}

field_value!(parse: Rank);

struct Fighter {
	stance: Field<Stance>,
	rank: Field<Rank>,
	hp: Field<i32>,
}

data_fields!(Fighter { stance, rank, hp });

fn fighter(name: &str) -> DataObject<Fighter> {
	DataObject::new(
		name,
		Fighter {
			stance: Field::new(Stance::Idle),
			rank: Field::new(Rank::Squire),
			hp: Field::new(1),
		},
	)
}

thread_local! {
	static SENSOR_OFFLINE: Cell<bool> = Cell::new(false);
}

#[derive(Debug, Clone, PartialEq)]
struct Reading(i32);

impl FieldValue for Reading {
	fn value_hash(&self) -> u64 {
		if SENSOR_OFFLINE.with(|offline| offline.get()) {
			panic!("sensor offline");
		}
		hash_of(&self.0)
	}

	fn to_record(&self) -> Record {
		Record::Int(self.0 as i64)
	}
}

struct Station {
	reading: Field<Reading>,
}

data_fields!(Station { reading });

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn health(runtime: &Runtime, name: &str, value: i32) -> DataObject<Health> {
	let obj = DataObject::new(name, Health { value: Field::new(value) });
	obj.initialize(runtime);
	obj
}

fn counter() -> (Rc<Cell<u32>>, impl Fn(&DataObject<Health>)) {
	let count = Rc::new(Cell::new(0));
	let func = {
		let count = count.clone();
		move |_: &DataObject<Health>| count.set(count.get() + 1)
	};
	(count, func)
}

#[test]
fn end_to_end_scenario() {
	init_tracing();
	let runtime = Runtime::default();
	let hero = health(&runtime, "O", 100);

	let mock = mock::SharedMock::new();
	let r = Reaction::<Health>::new("R", "value", {
		let mock = mock.clone();
		move |obj| mock.get().reacted(obj.name().to_string(), obj.value.get() as i64)
	});
	r.activate(&runtime);

	mock.get().expect_reacted().times(0).return_const(());
	hero.value.set(100);
	runtime.tick();
	assert!(runtime.history().is_empty());
	mock.get().checkpoint();

	mock.get()
		.expect_reacted()
		.with(eq("O".to_string()), eq(42))
		.times(1)
		.return_const(());
	hero.value.set(42);
	runtime.tick();
	mock.get().checkpoint();

	let history = runtime.history().snapshot();
	assert_eq!(history.len(), 1);
	assert_eq!(history[0].object, "O");
	assert_eq!(history[0].field, "value");
	assert_eq!(history[0].old, Record::Int(100));
	assert_eq!(history[0].new, Record::Int(42));
	assert_eq!(history[0].reactor, UNKNOWN_CAUSE);
	assert_eq!(r.invocations(), 1);
}

#[test]
fn repeated_dirty_marks_diff_once() {
	let runtime = Runtime::default();
	let hero = health(&runtime, "hero", 1);
	let (count, func) = counter();
	let r = Reaction::<Health>::new("R", "value", func);
	r.activate(&runtime);

	hero.value.set(2);
	hero.value.set(3);
	hero.mark_dirty("value");
	assert_eq!(runtime.pending(), 1);

	let report = runtime.tick();
	assert_eq!(report.diffed, 1);
	assert_eq!(report.changed, 1);
	assert_eq!(count.get(), 1);

	// A field set back to its cached value before the tick is no change.
	hero.value.set(4);
	hero.value.set(3);
	let report = runtime.tick();
	assert_eq!(report.diffed, 1);
	assert_eq!(report.changed, 0);
	assert_eq!(count.get(), 1);
}

#[test]
fn released_objects_stop_propagating() {
	let runtime = Runtime::default();
	let hero = health(&runtime, "hero", 1);
	let (count, func) = counter();
	let r = Reaction::<Health>::new("R", "value", func);
	r.activate(&runtime);
	assert_eq!(r.observed(), 1);

	hero.value.set(2);
	hero.release();
	assert_eq!(r.observed(), 0);
	assert_eq!(runtime.registry().count::<Health>(), 0);

	let report = runtime.tick();
	assert_eq!(report.diffed, 0);

	hero.value.set(3);
	assert_eq!(hero.diff_field("value"), false);
	runtime.tick();
	assert_eq!(count.get(), 0);
	assert_eq!(hero.subscriber_count(), 0);
}

#[test]
fn mutations_inside_reactions_are_attributed() {
	let runtime = Runtime::default();
	let hero = health(&runtime, "hero", 10);
	let armor = DataObject::new(
		"armor",
		Armor {
			points: Field::new(5),
			label: Field::new("plate".into()),
		},
	);
	armor.initialize(&runtime);

	let r = reaction!(Health, "R", "value", (armor) obj => {
		armor.points.set(obj.value.get() as u32);
	});
	r.activate(&runtime);

	hero.value.set(20);
	runtime.tick();

	let entries = runtime.history().snapshot();
	assert_eq!(entries.len(), 2);
	assert_eq!(entries[0].reactor, UNKNOWN_CAUSE);
	assert_eq!(entries[1].object, "armor");
	assert_eq!(entries[1].reactor, "R");
	assert_eq!(entries[1].new, Record::UInt(20));

	armor.points.set(1);
	assert_eq!(runtime.history().last().map(|e| e.reactor.to_string()), Some(UNKNOWN_CAUSE.to_string()));
}

#[test]
fn reaction_cycles_settle_across_ticks() {
	let runtime = Runtime::default();
	let hero = health(&runtime, "hero", 50);

	// Clamps the value it observes, which queues another diff.
	let r = Reaction::<Health>::new("clamp", "value", |obj| {
		if obj.value.get() < 10 {
			obj.value.set(10);
		}
	});
	r.activate(&runtime);

	hero.value.set(-5);
	runtime.tick();
	assert_eq!(hero.value.get(), 10);
	assert_eq!(runtime.pending(), 1);

	runtime.tick();
	assert_eq!(r.invocations(), 2);
	assert_eq!(runtime.pending(), 0);

	runtime.tick();
	assert_eq!(r.invocations(), 2);
}

#[test]
fn polled_objects_are_detected_by_hash() {
	let runtime = Runtime::default();
	let body = DataObject::new(
		"ball",
		Body {
			x: Field::new(0.0),
			y: Field::new(0.0),
		},
	)
	.with_mode(UpdateMode::Polled);
	body.initialize(&runtime);

	let moves = Rc::new(RefCell::new(Vec::new()));
	let r = Reaction::<Body>::new("track-x", "x", {
		let moves = moves.clone();
		move |obj| moves.borrow_mut().push(obj.x.get())
	});
	r.activate(&runtime);

	body.x.set(1.5);
	body.y.set(2.0);
	assert_eq!(runtime.pending(), 0);
	assert!(body.is_dirty());

	let report = runtime.tick();
	assert_eq!(report.polled, 1);
	assert_eq!(report.polled_changed, 1);
	assert!(!body.is_dirty());
	assert_eq!(*moves.borrow(), vec![1.5]);

	let report = runtime.tick();
	assert_eq!(report.polled_changed, 0);
	assert_eq!(moves.borrow().len(), 1);
}

#[test]
fn polled_object_set_back_before_the_tick_is_clean() {
	let runtime = Runtime::default();
	let body = DataObject::new(
		"ball",
		Body {
			x: Field::new(0.0),
			y: Field::new(0.0),
		},
	)
	.with_mode(UpdateMode::Polled);
	body.initialize(&runtime);

	body.x.set(4.0);
	body.x.set(0.0);
	assert!(body.is_dirty());

	let report = runtime.tick();
	assert_eq!(report.polled_changed, 0);
	assert!(!body.is_dirty());
}

#[test]
fn failing_polled_hash_counts_as_zero_for_one_tick() {
	init_tracing();
	let runtime = Runtime::default();
	let station = DataObject::new("station", Station { reading: Field::new(Reading(1)) }).with_mode(UpdateMode::Polled);
	station.initialize(&runtime);
	let ball = DataObject::new(
		"ball",
		Body {
			x: Field::new(0.0),
			y: Field::new(0.0),
		},
	)
	.with_mode(UpdateMode::Polled);
	ball.initialize(&runtime);

	let readings = Rc::new(Cell::new(0));
	let r = Reaction::<Station>::new("log-reading", "reading", {
		let readings = readings.clone();
		move |_| readings.set(readings.get() + 1)
	});
	r.activate(&runtime);

	station.reading.set(Reading(2));
	ball.x.set(1.0);

	SENSOR_OFFLINE.with(|offline| offline.set(true));
	let report = runtime.tick();
	SENSOR_OFFLINE.with(|offline| offline.set(false));

	assert_eq!(report.polled, 2);
	assert_eq!(report.polled_changed, 2);
	assert_eq!(readings.get(), 1);
	assert!(!ball.is_dirty());

	// The real hash differs from the substituted zero, but no field moved.
	let report = runtime.tick();
	assert_eq!(report.polled_changed, 1);
	assert_eq!(readings.get(), 1);

	assert_eq!(runtime.tick().polled_changed, 0);
}

#[test]
fn polled_detection_survives_capacity_growth() {
	let runtime = Runtime::new(Config::default().with_initial_capacity(2).with_parallel_threshold(0).with_workers(3));
	let bodies: Vec<_> = (0..10)
		.map(|i| {
			let body = DataObject::new(
				format!("body{}", i),
				Body {
					x: Field::new(i as f32),
					y: Field::new(0.0),
				},
			)
			.with_mode(UpdateMode::Polled);
			body.initialize(&runtime);
			body
		})
		.collect();
	assert_eq!(runtime.capacity(), 16);
	assert_eq!(runtime.tick().polled_changed, 0);

	let changed = Rc::new(RefCell::new(Vec::new()));
	let r = Reaction::<Body>::new("watch-y", "y", {
		let changed = changed.clone();
		move |obj| changed.borrow_mut().push(obj.name().to_string())
	});
	r.activate(&runtime);

	bodies[0].y.set(1.0);
	bodies[9].y.set(1.0);
	let report = runtime.tick();
	assert_eq!(report.polled, 10);
	assert_eq!(report.polled_changed, 2);
	assert_eq!(*changed.borrow(), vec!["body0".to_string(), "body9".to_string()]);
}

#[test]
fn misconfigured_reactions_are_inert() {
	let runtime = Runtime::default();
	let hero = health(&runtime, "hero", 1);

	let (empty_count, func) = counter();
	let empty = Reaction::<Health>::new("empty", "", func);
	let (unknown_count, func) = counter();
	let unknown = Reaction::<Health>::new("unknown", "mana", func);

	empty.activate(&runtime);
	unknown.activate(&runtime);
	assert!(empty.is_inert());
	assert!(unknown.is_inert());
	assert!(!unknown.is_active());
	assert_eq!(hero.subscriber_count(), 0);

	hero.value.set(2);
	runtime.tick();
	assert_eq!(empty_count.get() + unknown_count.get(), 0);
}

#[test]
fn reactions_ignore_other_fields() {
	let runtime = Runtime::default();
	let armor = DataObject::new(
		"armor",
		Armor {
			points: Field::new(1),
			label: Field::new("a".into()),
		},
	);
	armor.initialize(&runtime);

	let calls = Rc::new(Cell::new(0));
	let r = Reaction::<Armor>::new("points", "points", {
		let calls = calls.clone();
		move |_| calls.set(calls.get() + 1)
	});
	r.activate(&runtime);

	armor.label.set("b".into());
	runtime.tick();
	assert_eq!(calls.get(), 0);

	armor.points.set(2);
	runtime.tick();
	assert_eq!(calls.get(), 1);
}

#[test]
fn filter_and_late_registration() {
	let runtime = Runtime::default();
	let early = health(&runtime, "early", 1);
	let skipped = health(&runtime, "skip-me", 1);

	let seen = Rc::new(RefCell::new(Vec::new()));
	let r = Reaction::<Health>::new("R", "value", {
		let seen = seen.clone();
		move |obj| seen.borrow_mut().push(obj.name().to_string())
	})
	.with_filter(|obj| !obj.name().starts_with("skip"));
	r.activate(&runtime);
	assert_eq!(r.observed(), 1);

	let late = health(&runtime, "late", 1);
	assert_eq!(r.observed(), 2);

	early.value.set(2);
	skipped.value.set(2);
	late.value.set(2);
	runtime.tick();
	assert_eq!(*seen.borrow(), vec!["early".to_string(), "late".to_string()]);

	r.deactivate();
	assert_eq!(early.subscriber_count(), 0);
	early.value.set(3);
	runtime.tick();
	assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn reactions_fire_in_subscription_order() {
	let runtime = Runtime::default();
	let hero = health(&runtime, "hero", 1);
	let order = Rc::new(RefCell::new(Vec::new()));

	let reactions: Vec<_> = ["first", "second", "third"]
		.into_iter()
		.map(|name| {
			let order = order.clone();
			let r = Reaction::<Health>::new(name, "value", move |_| order.borrow_mut().push(name));
			r.activate(&runtime);
			r
		})
		.collect();

	hero.value.set(5);
	runtime.tick();
	assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
	assert!(reactions.iter().all(|r| r.invocations() == 1));
}

#[test]
fn panicking_reaction_does_not_stall_the_tick() {
	let runtime = Runtime::default();
	let a = health(&runtime, "a", 1);
	let b = health(&runtime, "b", 1);

	let (count, func) = counter();
	let fragile = Reaction::<Health>::new("fragile", "value", |obj| {
		if &*obj.name() == "a" {
			panic!("bad object");
		}
	});
	let steady = Reaction::<Health>::new("steady", "value", func);
	fragile.activate(&runtime);
	steady.activate(&runtime);

	a.value.set(2);
	b.value.set(2);
	let report = runtime.tick();
	assert_eq!(report.diffed, 2);
	assert_eq!(report.changed, 2);
	assert_eq!(fragile.invocations(), 2);
	assert_eq!(count.get(), 2);
	assert_eq!(fieldwatch::active_cause(), None);
}

#[test]
fn later_reactions_see_a_change_after_an_earlier_one_panics() {
	let runtime = Runtime::default();
	let hero = health(&runtime, "hero", 1);

	let fragile = Reaction::<Health>::new("fragile", "value", |_| panic!("always"));
	let (count, func) = counter();
	let steady = Reaction::<Health>::new("steady", "value", func);
	fragile.activate(&runtime);
	steady.activate(&runtime);

	hero.value.set(2);
	runtime.tick();
	runtime.tick();
	assert_eq!(count.get(), 1);
	assert!(fragile.is_active());

	hero.value.set(3);
	runtime.tick();
	assert_eq!(count.get(), 2);
	assert_eq!(fragile.invocations(), 2);
}

#[test]
fn batch_reaction_reports_changed_objects_only() {
	let runtime = Runtime::new(Config::default().with_parallel_threshold(4).with_workers(2));
	let objects: Vec<_> = (0..12).map(|i| health(&runtime, &format!("h{}", i), 100)).collect();

	let seen = Rc::new(RefCell::new(Vec::new()));
	let batch = BatchReaction::<Health>::new("regen", "value", {
		let seen = seen.clone();
		move |obj| {
			seen.borrow_mut().push(obj.name().to_string());
			if obj.value.get() < 0 {
				obj.value.set(0);
			}
		}
	});
	batch.activate(&runtime);
	assert_eq!(batch.observed(), 12);

	assert_eq!(runtime.tick().batch_invocations, 0);

	objects[3].value.set(50);
	objects[7].value.set(-1);
	let report = runtime.tick();
	assert_eq!(report.batch_invocations, 2);
	assert_eq!(*seen.borrow(), vec!["h3".to_string(), "h7".to_string()]);

	let clamp = runtime.history().last().unwrap();
	assert_eq!(clamp.reactor, "regen");
	assert_eq!(clamp.new, Record::Int(0));

	objects[3].release();
	assert_eq!(batch.observed(), 11);

	batch.deactivate();
	objects[4].value.set(1);
	assert_eq!(runtime.tick().batch_invocations, 0);
}

#[test]
fn custom_values_are_recorded_as_text() {
	let runtime = Runtime::default();
	let fighter = fighter("f");
	fighter.initialize(&runtime);

	fighter.stance.set(Stance::Guard);
	let entry = runtime.history().last().unwrap();
	assert_eq!(entry.old, Record::text("Idle"));
	assert_eq!(entry.new, Record::text("Guard"));
}

#[test]
fn registry_events_feed_tooling() {
	let runtime = Runtime::default();
	let events = Rc::new(RefCell::new(Vec::new()));
	runtime.registry().subscribe({
		let events = events.clone();
		move |e| events.borrow_mut().push((e.kind, e.object_name.to_string()))
	});

	let hero = health(&runtime, "hero", 1);
	hero.initialize(&runtime);
	assert_eq!(runtime.registry().get_all::<Health>().len(), 1);
	assert_eq!(runtime.registry().types()[0].type_name, std::any::type_name::<Health>());

	hero.release();
	hero.release();
	assert!(runtime.registry().types().is_empty());
	assert_eq!(
		*events.borrow(),
		vec![
			(RegistryEventKind::Registered, "hero".to_string()),
			(RegistryEventKind::Unregistered, "hero".to_string()),
		]
	);
}

#[test]
fn pooled_objects_can_be_reinitialized() {
	let runtime = Runtime::default();
	let hero = health(&runtime, "hero", 1);
	let (count, func) = counter();
	let r = Reaction::<Health>::new("R", "value", func);
	r.activate(&runtime);

	hero.release();
	hero.value.set(9);
	hero.initialize(&runtime);
	assert_eq!(r.observed(), 1);
	runtime.tick();
	assert_eq!(count.get(), 0);

	hero.value.set(10);
	runtime.tick();
	assert_eq!(count.get(), 1);
}

#[test]
fn snapshot_round_trip_propagates() {
	let runtime = Runtime::default();
	let source = DataObject::new(
		"a",
		Armor {
			points: Field::new(30),
			label: Field::new("mail".into()),
		},
	);
	let target = DataObject::new(
		"b",
		Armor {
			points: Field::new(0),
			label: Field::new("none".into()),
		},
	);
	target.initialize(&runtime);

	let calls = Rc::new(Cell::new(0));
	let r = Reaction::<Armor>::new("restore", "points", {
		let calls = calls.clone();
		move |_| calls.set(calls.get() + 1)
	});
	r.activate(&runtime);

	let snapshot = source.snapshot();
	assert_eq!(snapshot.fields.len(), 1);
	assert_eq!(target.restore(&snapshot), Ok(1));
	assert_eq!(target.label.get(), "none");
	runtime.tick();
	assert_eq!(calls.get(), 1);
}

#[test]
fn reset_clears_history_but_keeps_objects() {
	let runtime = Runtime::default();
	let hero = health(&runtime, "hero", 1);
	hero.value.set(2);
	runtime.tick();
	assert_eq!(runtime.frame(), 1);

	runtime.reset();
	assert!(runtime.history().is_empty());
	assert_eq!(runtime.frame(), 0);
	assert!(hero.is_active());

	runtime.tick();
	hero.value.set(3);
	assert_eq!(runtime.history().last().map(|e| e.frame), Some(1));
}

#[test]
fn parsed_values_survive_a_snapshot_round_trip() {
	let runtime = Runtime::default();
	let source = fighter("src");
	source.stance.set(Stance::Guard);
	source.rank.set(Rank::Knight);
	source.hp.set(7);

	let snapshot = source.snapshot();
	assert_eq!(
		snapshot.fields,
		vec![("rank", Record::text("knight")), ("hp", Record::Int(7))]
	);

	let target = fighter("dst");
	target.initialize(&runtime);
	assert_eq!(target.restore(&snapshot), Ok(2));
	assert_eq!(target.rank.get(), Rank::Knight);
	assert_eq!(target.hp.get(), 7);
	assert_eq!(target.stance.get(), Stance::Idle);
	assert_eq!(runtime.history().len(), 2);
}
