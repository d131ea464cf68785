//! Grow-only sets over closed enums.
//!
//! Phase completion, failure reasons and update requirements are all small closed sets
//! whose members are only ever added during a run. `FlagSet` stores them in a `u32`
//! and deliberately exposes no removal API.

use std::{fmt, marker::PhantomData};

use serde::{Serialize, Serializer, ser::SerializeSeq};

/// A member of a closed enum that can live in a [`FlagSet`].
pub trait Flag: Copy + Eq + 'static {
    /// Every variant, in a stable order.
    const ALL: &'static [Self];

    /// Bit position of the variant. Must be unique and `< 32`.
    fn bit(self) -> u32;

    /// Stable name used in logs and reports.
    fn name(self) -> &'static str;
}

pub struct FlagSet<F: Flag> {
    bits: u32,
    _marker: PhantomData<F>,
}

impl<F: Flag> FlagSet<F> {
    pub const fn empty() -> Self {
        Self {
            bits: 0,
            _marker: PhantomData,
        }
    }

    pub fn of(flags: &[F]) -> Self {
        let mut set = Self::empty();
        for flag in flags {
            set.add(*flag);
        }
        set
    }

    pub fn add(&mut self, flag: F) {
        self.bits |= 1 << flag.bit();
    }

    pub fn union(&mut self, other: Self) {
        self.bits |= other.bits;
    }

    pub fn contains(&self, flag: F) -> bool {
        self.bits & (1 << flag.bit()) != 0
    }

    pub fn contains_all(&self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    pub fn contains_any(&self, other: Self) -> bool {
        self.bits & other.bits != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = F> + '_ {
        F::ALL.iter().copied().filter(|flag| self.contains(*flag))
    }
}

impl<F: Flag> Default for FlagSet<F> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<F: Flag> Clone for FlagSet<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F: Flag> Copy for FlagSet<F> {}

impl<F: Flag> PartialEq for FlagSet<F> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<F: Flag> Eq for FlagSet<F> {}

impl<F: Flag> FromIterator<F> for FlagSet<F> {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        let mut set = Self::empty();
        for flag in iter {
            set.add(flag);
        }
        set
    }
}

impl<F: Flag> fmt::Debug for FlagSet<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Flag::name)).finish()
    }
}

impl<F: Flag> fmt::Display for FlagSet<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for flag in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str(flag.name())?;
            first = false;
        }
        Ok(())
    }
}

impl<F: Flag> Serialize for FlagSet<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        for flag in self.iter() {
            seq.serialize_element(flag.name())?;
        }
        seq.end()
    }
}
