//! Named-field snapshot registration.
//!
//! Stateful components publish their state as fields under dot-separated
//! paths (`cpu.r7`, `ram.image`). Each field carries a shape, a preferred
//! display radix and flags describing how a loader should treat it. The
//! registry holds the values; the on-disk encoding is left to the host.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::fault::SnapshotError;

/// Stable snapshot layout identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u16)]
pub enum SnapshotVersion {
    /// Initial field layout.
    #[default]
    V1 = 1,
}

impl SnapshotVersion {
    /// Converts a stored value to a known version.
    #[must_use]
    pub const fn from_u16(version: u16) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            _ => None,
        }
    }
}

/// Preferred rendering of a field's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Radix {
    /// Hexadecimal.
    Hex,
    /// Decimal.
    Decimal,
}

bitflags! {
    /// How a loader treats a field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldFlags: u8 {
        /// Must be present to restore the component.
        const MANDATORY = 1 << 0;
        /// Recorded for inspection only; never restored.
        const INFORMATIVE = 1 << 1;
        /// Only meaningful at construction; restored before anything else.
        const INIT_ONLY = 1 << 2;
    }
}

/// A field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FieldValue {
    /// One number.
    Scalar(u64),
    /// A fixed-length run of numbers.
    Array(Vec<u64>),
}

impl FieldValue {
    /// Whether both values have the same shape (and array length).
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(_), Self::Scalar(_)) => true,
            (Self::Array(a), Self::Array(b)) => a.len() == b.len(),
            _ => false,
        }
    }
}

/// One registered field.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Field {
    /// Current value.
    pub value: FieldValue,
    /// Display radix.
    pub radix: Radix,
    #[cfg_attr(feature = "serde", serde(with = "field_flags_bits"))]
    /// Loader flags.
    pub flags: FieldFlags,
}

#[cfg(feature = "serde")]
mod field_flags_bits {
    use super::FieldFlags;

    pub(super) fn serialize<S: serde::Serializer>(
        flags: &FieldFlags,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&flags.bits(), serializer)
    }

    pub(super) fn deserialize<'de, D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<FieldFlags, D::Error> {
        let bits: u8 = serde::Deserialize::deserialize(deserializer)?;
        Ok(FieldFlags::from_bits_truncate(bits))
    }
}

/// Hierarchical field namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SnapshotRegistry {
    version: SnapshotVersion,
    fields: BTreeMap<String, Field>,
}

fn validate_path(path: &str) -> Result<(), SnapshotError> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(SnapshotError::InvalidPath(path.to_owned()));
    }
    Ok(())
}

/// Joins a component prefix and a field name.
#[must_use]
pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}.{name}")
    }
}

impl SnapshotRegistry {
    /// Creates an empty registry at the current layout version.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout version.
    #[must_use]
    pub const fn version(&self) -> SnapshotVersion {
        self.version
    }

    /// Number of registered fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Registers a field.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidPath`] for an empty path or one
    /// with an empty component, and [`SnapshotError::DuplicateField`]
    /// when the path is taken.
    pub fn register(
        &mut self,
        path: &str,
        value: FieldValue,
        radix: Radix,
        flags: FieldFlags,
    ) -> Result<(), SnapshotError> {
        validate_path(path)?;
        if self.fields.contains_key(path) {
            return Err(SnapshotError::DuplicateField(path.to_owned()));
        }
        self.fields.insert(
            path.to_owned(),
            Field {
                value,
                radix,
                flags,
            },
        );
        Ok(())
    }

    /// Registers a scalar field.
    ///
    /// # Errors
    ///
    /// Same as [`SnapshotRegistry::register`].
    pub fn register_scalar(
        &mut self,
        path: &str,
        value: u64,
        radix: Radix,
        flags: FieldFlags,
    ) -> Result<(), SnapshotError> {
        self.register(path, FieldValue::Scalar(value), radix, flags)
    }

    /// Registers an array field.
    ///
    /// # Errors
    ///
    /// Same as [`SnapshotRegistry::register`].
    pub fn register_array(
        &mut self,
        path: &str,
        values: impl IntoIterator<Item = u64>,
        radix: Radix,
        flags: FieldFlags,
    ) -> Result<(), SnapshotError> {
        self.register(
            path,
            FieldValue::Array(values.into_iter().collect()),
            radix,
            flags,
        )
    }

    /// Looks up a field.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnknownField`] when nothing is registered
    /// under `path`.
    pub fn get(&self, path: &str) -> Result<&Field, SnapshotError> {
        self.fields
            .get(path)
            .ok_or_else(|| SnapshotError::UnknownField(path.to_owned()))
    }

    /// Reads a scalar field.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::UnknownField`], or [`SnapshotError::ShapeMismatch`]
    /// when the field is an array.
    pub fn scalar(&self, path: &str) -> Result<u64, SnapshotError> {
        match self.get(path)?.value {
            FieldValue::Scalar(v) => Ok(v),
            FieldValue::Array(_) => Err(SnapshotError::ShapeMismatch(path.to_owned())),
        }
    }

    /// Reads an array field.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::UnknownField`], or [`SnapshotError::ShapeMismatch`]
    /// when the field is a scalar.
    pub fn array(&self, path: &str) -> Result<&[u64], SnapshotError> {
        match &self.get(path)?.value {
            FieldValue::Array(v) => Ok(v),
            FieldValue::Scalar(_) => Err(SnapshotError::ShapeMismatch(path.to_owned())),
        }
    }

    /// Replaces a field's value, keeping its radix and flags.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::UnknownField`], or [`SnapshotError::ShapeMismatch`]
    /// when `value` differs in shape or array length.
    pub fn set(&mut self, path: &str, value: FieldValue) -> Result<(), SnapshotError> {
        let field = self
            .fields
            .get_mut(path)
            .ok_or_else(|| SnapshotError::UnknownField(path.to_owned()))?;
        if !field.value.same_shape(&value) {
            return Err(SnapshotError::ShapeMismatch(path.to_owned()));
        }
        field.value = value;
        Ok(())
    }

    /// Paths at or below `prefix`, in order.
    pub fn paths_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields.keys().map(String::as_str).filter(move |path| {
            prefix.is_empty()
                || *path == prefix
                || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'.'))
        })
    }

    /// Every field, in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(path, field)| (path.as_str(), field))
    }
}
