//! Branded ID newtypes for type safety.
//!
//! Each identity the broker hands out has its own newtype around `String`,
//! so an endpoint id can never be passed where a subscription id is
//! expected. Generated values are `<prefix>_<uuid-v7>`: time-ordered,
//! globally unique, and readable in logs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new prefixed UUID v7 string.
fn new_prefixed(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7())
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix used for freshly generated values.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new unique ID.
            #[must_use]
            pub fn new() -> Self {
                Self(new_prefixed(Self::PREFIX))
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
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
    /// Identity assigned to a connected client by the broker.
    EndpointId, "endpoint"
}

branded_id! {
    /// Handle returned by `subscribe`, used to unsubscribe.
    SubscriptionId, "sub"
}

branded_id! {
    /// Identity of one physical transport connection.
    ChannelId, "channel"
}

branded_id! {
    /// Correlates a callback invocation with its reply.
    InvocationId, "inv"
}
