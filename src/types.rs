//! # Type Descriptors
//!
//! Runtime type tags for payloads. Stage factories take their input type as an
//! explicit type parameter and record it as a [`TypeDescriptor`]; the
//! descriptor-based factory variants accept an `Option<TypeDescriptor>` from
//! the caller instead, and fail with [`FlowError::TypeResolution`] when it is
//! missing.
//!
//! [`FlowError::TypeResolution`]: crate::error::FlowError::TypeResolution

use crate::message::Payload;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A runtime descriptor of a payload type.
///
/// Two descriptors are equal when they describe the same [`TypeId`]; the
/// recorded name is only used for diagnostics.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
  id: TypeId,
  name: &'static str,
}

impl TypeDescriptor {
  /// Returns the descriptor for `T`.
  #[must_use]
  pub fn of<T: Any>() -> Self {
    Self {
      id: TypeId::of::<T>(),
      name: std::any::type_name::<T>(),
    }
  }

  /// The underlying type id.
  #[must_use]
  pub fn type_id(&self) -> TypeId {
    self.id
  }

  /// The fully qualified type name.
  #[must_use]
  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Returns true if `payload` holds a value of the described type.
  #[must_use]
  pub fn matches(&self, payload: &Payload) -> bool {
    payload.type_id() == self.id
  }
}

impl PartialEq for TypeDescriptor {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Eq for TypeDescriptor {}

impl Hash for TypeDescriptor {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.id.hash(state);
  }
}

impl fmt::Debug for TypeDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "TypeDescriptor({})", self.name)
  }
}

impl fmt::Display for TypeDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name)
  }
}
