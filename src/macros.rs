pub use enclose::*;

/// Implements [`Data`](crate::Data) for a struct of [`Field`](crate::Field)s.
///
/// ```
/// use fieldwatch::{data_fields, Field};
///
/// struct Health {
///     value: Field<i32>,
///     regen: Field<f32>,
/// }
///
/// data_fields!(Health { value, regen: transient });
/// ```
///
/// Fields marked `transient` are left out of snapshots.
#[macro_export]
macro_rules! data_fields {
    ($ty:ident { $( $field:ident $(: $mode:ident)? ),* $(,)? }) => {
        impl $crate::Data for $ty {
            fn describe() -> ::std::vec::Vec<$crate::FieldDescriptor<Self>> {
                ::std::vec![ $( {
                    fn $field(data: &$ty) -> &dyn $crate::AnyField {
                        &data.$field
                    }
                    $crate::FieldDescriptor::new(
                        ::std::stringify!($field),
                        $field,
                        $crate::__persist!($($mode)?),
                    )
                } ),* ]
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __persist {
    () => {
        true
    };
    (persist) => {
        true
    };
    (transient) => {
        false
    };
}

/// Implements [`FieldValue`](crate::FieldValue) for `Hash + Debug` types,
/// recording them as text.
///
/// Plain types are history-only and stay out of snapshots. With the
/// `parse:` prefix the value is recorded with `Display` and restored with
/// `FromStr`:
///
/// ```
/// use fieldwatch::{field_value, FieldValue, Record};
///
/// #[derive(Debug, Clone, PartialEq, Hash)]
/// struct Tag(String);
///
/// impl std::fmt::Display for Tag {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str(&self.0)
///     }
/// }
///
/// impl std::str::FromStr for Tag {
///     type Err = std::convert::Infallible;
///     fn from_str(s: &str) -> Result<Self, Self::Err> {
///         Ok(Tag(s.to_string()))
///     }
/// }
///
/// field_value!(parse: Tag);
///
/// assert_eq!(Tag::from_record(&Record::text("red")), Some(Tag("red".into())));
/// ```
#[macro_export]
macro_rules! field_value {
    (parse: $($ty:ty),+ $(,)?) => {$(
        impl $crate::FieldValue for $ty {
            fn value_hash(&self) -> u64 {
                $crate::hash_of(self)
            }

            fn to_record(&self) -> $crate::Record {
                $crate::Record::text(&::std::string::ToString::to_string(self))
            }

            fn from_record(record: &$crate::Record) -> ::std::option::Option<Self> {
                match record {
                    $crate::Record::Text(text) => ::std::str::FromStr::from_str(text.as_str()).ok(),
                    _ => ::std::option::Option::None,
                }
            }
        }
    )+};
    ($($ty:ty),* $(,)?) => {$(
        impl $crate::FieldValue for $ty {
            fn value_hash(&self) -> u64 {
                $crate::hash_of(self)
            }

            fn to_record(&self) -> $crate::Record {
                $crate::Record::text(&::std::format!("{:?}", self))
            }
        }
    )*};
}

#[macro_export]
macro_rules! reaction {
    ($ty:ty, $name:expr, $field:expr, ( $($d_tt:tt)* ) $obj:ident => $($b:tt)*) => {
        $crate::Reaction::<$ty>::new($name, $field, $crate::macros::enclose!(($( $d_tt )*) move |$obj: &$crate::DataObject<$ty>| { $($b)* }))
    };
    ($ty:ty, $name:expr, $field:expr, $obj:ident => $($b:tt)*) => {
        $crate::Reaction::<$ty>::new($name, $field, move |$obj: &$crate::DataObject<$ty>| { $($b)* })
    };
}
