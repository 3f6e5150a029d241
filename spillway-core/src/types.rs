//! Strongly-typed identifiers for buffered streams and flushes.
//!
//! Stream identifiers are compared by value and are used as map keys
//! everywhere, so they derive `Eq`, `Hash` and `Ord`.

use std::fmt;

/// Maximum length of a namespace or stream name in bytes.
pub const STREAM_NAME_BYTES_MAX: usize = 1024;

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `SeqNo` with `FlushId`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the next ID in sequence.
            ///
            /// # Panics
            /// Panics if the ID would overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "ID overflow");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

define_id!(
    SeqNo,
    "seq",
    "Admission sequence number, unique and increasing across every queue of one engine."
);
define_id!(FlushId, "flush", "Identifier of one dispatched flush task, for log correlation.");

/// The namespace half of a stream identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    /// The stream has no namespace.
    Unset,
    /// An explicit namespace.
    Named(String),
    /// Synthetic namespace for global state messages.
    Global,
}

/// Identifies a stream of records: a `(namespace, name)` pair.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    namespace: Namespace,
    name: String,
}

impl StreamId {
    /// Creates a stream identifier with an explicit namespace.
    ///
    /// # Errors
    /// Returns an error if the name is empty or either part is too long.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> crate::Result<Self> {
        let namespace = namespace.into();
        check_length("namespace", &namespace)?;
        let name = name.into();
        check_name(&name)?;
        Ok(Self {
            namespace: Namespace::Named(namespace),
            name,
        })
    }

    /// Creates a stream identifier without a namespace.
    ///
    /// # Errors
    /// Returns an error if the name is empty or too long.
    pub fn unqualified(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self {
            namespace: Namespace::Unset,
            name,
        })
    }

    /// Returns the sentinel identifier that global state messages are routed to.
    #[must_use]
    pub const fn global() -> Self {
        Self {
            namespace: Namespace::Global,
            name: String::new(),
        }
    }

    /// Returns the namespace.
    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Returns the stream name. Empty for the global sentinel.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true for the global sentinel.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        matches!(self.namespace, Namespace::Global)
    }

    /// Returns the deterministic string used to order streams.
    #[must_use]
    pub fn sort_key(&self) -> String {
        self.to_string()
    }

    /// Returns the number of identifier bytes carried by each message.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let namespace_len = match &self.namespace {
            Namespace::Named(ns) => ns.len(),
            Namespace::Unset | Namespace::Global => 0,
        };
        namespace_len + self.name.len()
    }
}

fn check_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidArgument {
            name: "name",
            reason: "stream name must not be empty",
        });
    }
    check_length("name", name)
}

fn check_length(field: &'static str, value: &str) -> crate::Result<()> {
    if value.len() > STREAM_NAME_BYTES_MAX {
        return Err(crate::Error::LimitExceeded {
            limit: field,
            max: STREAM_NAME_BYTES_MAX as u64,
            actual: value.len() as u64,
        });
    }
    Ok(())
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Namespace::Unset => write!(f, "{}", self.name),
            Namespace::Named(ns) => write!(f, "{ns}.{}", self.name),
            Namespace::Global => write!(f, "<global>"),
        }
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_id_display() {
        let seq = SeqNo::new(42);
        assert_eq!(format!("{seq}"), "seq-42");
        assert_eq!(format!("{seq:?}"), "seq(42)");
    }

    #[test]
    fn test_id_next() {
        let id = FlushId::new(0);
        assert_eq!(id.next().get(), 1);
        assert_eq!(id.next().next().get(), 2);
    }

    #[test]
    #[should_panic(expected = "ID overflow")]
    fn test_id_overflow_panics() {
        let _ = SeqNo::new(u64::MAX).next();
    }

    #[test]
    fn test_stream_id_value_equality() {
        let a = StreamId::new("public", "users").unwrap();
        let b = StreamId::new(String::from("public"), String::from("users")).unwrap();
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn test_namespace_distinguishes_streams() {
        let named = StreamId::new("", "users").unwrap();
        let unset = StreamId::unqualified("users").unwrap();
        assert_ne!(named, unset);
        assert_ne!(unset, StreamId::global());
    }

    #[test]
    fn test_stream_id_display() {
        assert_eq!(
            StreamId::new("public", "users").unwrap().to_string(),
            "public.users"
        );
        assert_eq!(StreamId::unqualified("users").unwrap().to_string(), "users");
        assert_eq!(StreamId::global().to_string(), "<global>");
        assert!(StreamId::global().is_global());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(StreamId::unqualified("").is_err());
        assert!(StreamId::new("public", "").is_err());
    }

    #[test]
    fn test_long_name_rejected() {
        let long = "x".repeat(STREAM_NAME_BYTES_MAX + 1);
        assert!(matches!(
            StreamId::unqualified(long),
            Err(crate::Error::LimitExceeded { limit: "name", .. })
        ));
    }

    #[test]
    fn test_sort_key_is_stable() {
        let a = StreamId::new("a", "z").unwrap();
        let b = StreamId::new("b", "a").unwrap();
        assert!(a.sort_key() < b.sort_key());
        assert_eq!(a.sort_key(), a.clone().sort_key());
    }
}
