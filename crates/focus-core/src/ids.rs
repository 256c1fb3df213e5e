//! Branded ID newtypes.
//!
//! Sessions, tasks, users, and optimistic mutations each get a distinct ID
//! type wrapping a `String`, so a task ID cannot be passed where a user ID is
//! expected. Server-assigned IDs arrive as opaque strings; locally minted IDs
//! (mutations, placeholder tasks) are UUID v7.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a focus session.
    SessionId
}

branded_id! {
    /// Identifier of a task, unique within its session.
    TaskId
}

branded_id! {
    /// Identifier of a user / participant.
    UserId
}

branded_id! {
    /// Identifier of a locally initiated optimistic mutation.
    MutationId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(MutationId::new(), MutationId::new());
    }

    #[test]
    fn serde_is_transparent() {
        let id = TaskId::from("t1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"t1\"");
        let back: TaskId = serde_json::from_str("\"t1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn deref_and_display() {
        let id = UserId::from("u-42");
        assert_eq!(&*id, "u-42");
        assert_eq!(id.to_string(), "u-42");
        assert_eq!(id.as_str(), "u-42");
        assert_eq!(String::from(id), "u-42");
    }
}
