//! Capability keys: the type-or-name identity a caller resolves against.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Runtime type descriptor.
///
/// Equality and hashing use only the [`TypeId`]; the name is kept for
/// diagnostics. Unsized interface types (`dyn Trait`) are valid keys.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// How an export is identified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExportKind {
    Type(TypeKey),
    Name(String),
}

/// Identity of a strategy collection: an export kind plus an optional
/// discriminator key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityKey {
    kind: ExportKind,
    key: Option<String>,
}

impl CapabilityKey {
    pub fn of_type<T: ?Sized + 'static>() -> Self {
        Self::from_type_key(TypeKey::of::<T>())
    }

    pub fn from_type_key(type_key: TypeKey) -> Self {
        Self {
            kind: ExportKind::Type(type_key),
            key: None,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            kind: ExportKind::Name(name.into()),
            key: None,
        }
    }

    /// Attach a discriminator key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_optional_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    pub fn kind(&self) -> &ExportKind {
        &self.kind
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn type_key(&self) -> Option<TypeKey> {
        match &self.kind {
            ExportKind::Type(type_key) => Some(*type_key),
            ExportKind::Name(_) => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            ExportKind::Name(name) => Some(name),
            ExportKind::Type(_) => None,
        }
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExportKind::Type(type_key) => write!(f, "type:{}", type_key)?,
            ExportKind::Name(name) => write!(f, "name:{}", name)?,
        }
        if let Some(key) = &self.key {
            write!(f, "[{}]", key)?;
        }
        Ok(())
    }
}
