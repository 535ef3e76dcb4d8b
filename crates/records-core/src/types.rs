use std::any::TypeId;
use std::fmt;
use std::hash::{BuildHasherDefault, Hash};

use rustc_hash::FxHasher;
use serde::Serialize;

use crate::{RecordError, Result};

/// The flat value type every relation column is made of. Record handles are
/// values of this type too, which is what lets records nest.
pub type RamDomain = i32;

/// Handle reserved for "no record". Never issued by any table.
pub const NULL_HANDLE: RamDomain = 0;

/// Fx hashing for the forward maps; keys are short runs of small integers.
pub type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// A hashbrown map keyed with the Fx hasher.
pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, FxBuildHasher>;

/// The null handle for records of shape `R`.
#[inline]
pub fn null<R: Record>() -> RamDomain {
    NULL_HANDLE
}

/// Whether `handle` encodes the absence of a nested record of shape `R`.
#[inline]
pub fn is_null<R: Record>(handle: RamDomain) -> bool {
    handle == NULL_HANDLE
}

/// A fixed-arity record value.
///
/// Equality and hashing must be structural over the fields. Every distinct
/// implementing type gets its own handle space, so a newtype around an array
/// is enough to separate two layouts that happen to share an arity.
pub trait Record: Clone + Eq + Hash + Send + Sync + 'static {
    const ARITY: usize;

    /// The ordered field values.
    fn fields(&self) -> &[RamDomain];

    /// Rebuilds a record from its field values.
    fn from_fields(fields: &[RamDomain]) -> Result<Self>;
}

impl<const N: usize> Record for [RamDomain; N] {
    const ARITY: usize = N;

    #[inline]
    fn fields(&self) -> &[RamDomain] {
        self.as_slice()
    }

    fn from_fields(fields: &[RamDomain]) -> Result<Self> {
        <[RamDomain; N]>::try_from(fields).map_err(|_| RecordError::ArityMismatch {
            expected: N,
            found: fields.len(),
        })
    }
}

/// Identifies a record shape within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(TypeId);

impl ShapeId {
    #[inline]
    pub fn of<R: Record>() -> Self {
        Self(TypeId::of::<R>())
    }
}

/// Descriptor of a record shape, used for logging and introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Shape {
    #[serde(skip)]
    pub id: ShapeId,
    pub name: &'static str,
    pub arity: usize,
}

impl Shape {
    pub fn of<R: Record>() -> Self {
        Self {
            id: ShapeId::of::<R>(),
            name: std::any::type_name::<R>(),
            arity: R::ARITY,
        }
    }
}

/// Orders by arity, then type name.
impl Ord for Shape {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.arity
            .cmp(&other.arity)
            .then_with(|| self.name.cmp(other.name))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Shape {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}
