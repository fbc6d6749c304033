//! Composite encoding of multi-component partition keys.
//!
//! A schema with one component stores the raw value bytes. A compound schema
//! stores each component as a big-endian `u16` length prefix followed by the
//! value bytes. The encoding is canonical: equal component sequences always
//! produce identical bytes, which is what makes byte-level key comparison
//! sound.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{KeyError, KeyResult};

/// Partition-key layout: how many typed components the key serializes.
///
/// The component types themselves live with the table schema upstream; this
/// crate only needs the count to pick between the raw and compound layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySchema {
    component_count: u16,
}

impl KeySchema {
    /// Creates a schema with the given component count.
    ///
    /// # Panics
    ///
    /// Panics if `component_count` is zero.
    #[must_use]
    pub fn new(component_count: u16) -> Self {
        assert!(component_count > 0, "key schema needs at least one component");
        Self { component_count }
    }

    /// Returns the number of key components.
    #[must_use]
    pub const fn component_count(self) -> u16 {
        self.component_count
    }

    /// Returns true if the key uses the compound (length-prefixed) layout.
    #[must_use]
    pub const fn is_compound(self) -> bool {
        self.component_count > 1
    }
}

/// Serializes component values into the canonical encoding.
///
/// # Errors
///
/// Returns [`KeyError::ComponentCount`] if the value count does not match the
/// schema, or [`KeyError::OversizedComponent`] if a value cannot fit the
/// compound length prefix.
pub(crate) fn encode_components(schema: KeySchema, components: &[Bytes]) -> KeyResult<Bytes> {
    // Safe cast: validated against the u16 schema count below.
    #[allow(clippy::cast_possible_truncation)]
    let found = components.len().min(usize::from(u16::MAX)) as u16;
    if usize::from(schema.component_count()) != components.len() {
        return Err(KeyError::ComponentCount {
            expected: schema.component_count(),
            found,
        });
    }

    if !schema.is_compound() {
        return Ok(components[0].clone());
    }

    let mut buf = BytesMut::with_capacity(
        components.iter().map(|c| 2 + c.len()).sum(),
    );
    for component in components {
        let Ok(len) = u16::try_from(component.len()) else {
            return Err(KeyError::OversizedComponent {
                len: component.len(),
            });
        };
        buf.put_u16(len);
        buf.put_slice(component);
    }
    Ok(buf.freeze())
}

/// Splits a canonical encoding back into its component values.
///
/// Inverse of [`encode_components`].
///
/// # Errors
///
/// Returns [`KeyError::Truncated`] if the bytes end mid-prefix or
/// mid-component, or [`KeyError::ComponentCount`] if the component count
/// disagrees with the schema.
pub(crate) fn decode_components(schema: KeySchema, bytes: &Bytes) -> KeyResult<Vec<Bytes>> {
    if !schema.is_compound() {
        return Ok(vec![bytes.clone()]);
    }

    let mut components = Vec::with_capacity(usize::from(schema.component_count()));
    let mut offset = 0usize;
    while offset < bytes.len() {
        if bytes.len() - offset < 2 {
            return Err(KeyError::Truncated {
                offset,
                needed: 2 - (bytes.len() - offset),
            });
        }
        let len = usize::from(u16::from_be_bytes([bytes[offset], bytes[offset + 1]]));
        offset += 2;
        if bytes.len() - offset < len {
            return Err(KeyError::Truncated {
                offset,
                needed: len - (bytes.len() - offset),
            });
        }
        components.push(bytes.slice(offset..offset + len));
        offset += len;
    }

    if components.len() != usize::from(schema.component_count()) {
        // Safe cast: bounded by the loop above reading 2-byte prefixes.
        #[allow(clippy::cast_possible_truncation)]
        let found = components.len().min(usize::from(u16::MAX)) as u16;
        return Err(KeyError::ComponentCount {
            expected: schema.component_count(),
            found,
        });
    }

    Ok(components)
}
