//! # Service Keys and Lifetimes
//!
//! A `ServiceKey` identifies an interface in the container. Keys are built
//! from a Rust type, so trait objects (`dyn Wallet`) work as interface keys
//! just as well as concrete structs.

use serde::{Deserialize, Serialize, Serializer};
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifier for a registered interface.
///
/// Equality and hashing use the `TypeId` only; the name is carried for
/// logs and error messages.
#[derive(Clone, Copy)]
pub struct ServiceKey {
    type_id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    /// Build the key for an interface type.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Full type name of the interface.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without module path, e.g. `dyn Wallet` or `LedgerService`.
    #[must_use]
    pub fn short_name(&self) -> String {
        short_type_name(self.name)
    }

    /// The underlying type id.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKey({})", self.short_name())
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

impl Serialize for ServiceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name)
    }
}

/// Strip the module path from a type name, keeping a leading `dyn `.
///
/// Generic names are returned unchanged.
#[must_use]
pub fn short_type_name(full: &str) -> String {
    if full.contains('<') {
        return full.to_string();
    }
    let (prefix, path) = match full.strip_prefix("dyn ") {
        Some(rest) => ("dyn ", rest),
        None => ("", full),
    };
    let last = path.rsplit("::").next().unwrap_or(path);
    format!("{prefix}{last}")
}

/// Instance reuse policy for a registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Lifetime {
    /// One instance for the lifetime of the container.
    #[default]
    Singleton,
    /// A fresh instance on every resolve.
    Transient,
    /// Bound to a scope. No scope boundary exists yet, so resolving a scoped
    /// service fails with `ContainerError::ScopeUnavailable`.
    Scoped,
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singleton => write!(f, "Singleton"),
            Self::Transient => write!(f, "Transient"),
            Self::Scoped => write!(f, "Scoped"),
        }
    }
}
