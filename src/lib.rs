//! Field-level change propagation for long-lived data objects.
//!
//! A [`DataObject`] wraps a struct of [`Field`]s. Setting a field to a
//! different value marks the object dirty; the [`Runtime`] watcher diffs
//! it on the next [`tick`](Runtime::tick) and notifies every [`Reaction`]
//! declared on that field. Mutations are logged to the [`History`] buffer,
//! attributed to whichever reaction was running at the time.
//!
//! ```
//! use fieldwatch::{data_fields, DataObject, Field, Reaction, Runtime};
//!
//! struct Health {
//!     value: Field<i32>,
//! }
//!
//! data_fields!(Health { value });
//!
//! let runtime = Runtime::default();
//! let hero = DataObject::new("hero", Health { value: Field::new(100) });
//! hero.initialize(&runtime);
//!
//! let reaction = Reaction::<Health>::new("low-health", "value", |obj| {
//!     println!("{} now at {}", obj.name(), obj.value.get());
//! });
//! reaction.activate(&runtime);
//!
//! hero.value.set(42);
//! runtime.tick();
//! assert_eq!(reaction.invocations(), 1);
//! ```

pub mod macros;

mod addr;
mod batch;
mod cause;
mod config;
mod error;
mod field;
mod hashed;
mod history;
mod object;
pub mod parallel;
mod reaction;
mod registry;
mod runtime;
mod schema;
mod value;
mod watcher;

pub use addr::ObjectKey;
pub use batch::BatchReaction;
pub use cause::{active_cause, with_cause, CauseScope, UNKNOWN_CAUSE};
pub use config::Config;
pub use error::{Error, Result};
pub use field::{AnyField, Field, FieldListener, Owner};
pub use hashed::Hashed;
pub use history::{History, HistoryEntry, HistoryListener};
pub use object::{DataObject, Snapshot, SubscriptionId};
pub use reaction::Reaction;
pub use registry::{ListenerId, Registry, RegistryEvent, RegistryEventKind, TypeSummary};
pub use runtime::{Runtime, TickReport};
pub use schema::{Data, FieldDescriptor, Schema};
pub use value::{hash_of, FieldValue, InlineText, Record, RecordKind, INLINE_TEXT_CAPACITY};
pub use watcher::{Slot, UpdateMode};
