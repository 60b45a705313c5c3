//! Component signatures.
//!
//! A signature is a fixed 64-bit set with one bit per [`ComponentId`]. Entities
//! carry one describing the components they own; systems carry one describing
//! the components they require.

use std::fmt;

use crate::component::ComponentId;

/// Number of component types a signature can address.
pub const SIGNATURE_BITS: usize = u64::BITS as usize;

/// A fixed-width component bitset.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Signature(u64);

impl Signature {
    /// The empty signature.
    pub const EMPTY: Self = Self(0);

    /// Create a signature from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Get the raw bits.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    const fn mask(id: ComponentId) -> u64 {
        1 << id.as_raw()
    }

    /// Set the bit for a component.
    pub fn set(&mut self, id: ComponentId) {
        self.0 |= Self::mask(id);
    }

    /// Clear the bit for a component.
    pub fn reset(&mut self, id: ComponentId) {
        self.0 &= !Self::mask(id);
    }

    /// Clear every bit.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Copy of this signature with `id` set.
    #[must_use]
    pub const fn with(self, id: ComponentId) -> Self {
        Self(self.0 | Self::mask(id))
    }

    /// Copy of this signature with `id` cleared.
    #[must_use]
    pub const fn without(self, id: ComponentId) -> Self {
        Self(self.0 & !Self::mask(id))
    }

    /// Check the bit for a component.
    #[must_use]
    pub const fn test(self, id: ComponentId) -> bool {
        self.0 & Self::mask(id) != 0
    }

    /// `true` if every bit of `self` is also set in `other`.
    ///
    /// A system with signature `s` matches an entity with signature `e`
    /// exactly when `s.is_subset_of(e)`.
    #[must_use]
    pub const fn is_subset_of(self, other: Self) -> bool {
        self.0 & other.0 == self.0
    }

    /// `true` if every bit of `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        other.is_subset_of(self)
    }

    /// Number of set bits.
    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the component ids present, lowest first.
    pub fn iter(self) -> impl Iterator<Item = ComponentId> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let next = bits.trailing_zeros();
            bits &= bits - 1;
            Some(ComponentId::from_raw(next))
        })
    }
}

impl FromIterator<ComponentId> for Signature {
    fn from_iter<I: IntoIterator<Item = ComponentId>>(iter: I) -> Self {
        let mut signature = Self::EMPTY;
        for id in iter {
            signature.set(id);
        }
        signature
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:#b})", self.0)
    }
}
