use std::{
    fmt::{self, Debug, Display, LowerHex},
    num::{NonZeroU128, ParseIntError},
    str::FromStr,
};

use serde::{
    de::{Error, Unexpected},
    Deserialize, Deserializer, Serialize, Serializer,
};

/// 128-bit asset identifier.
/// Immutable for the life of the asset, survives moves and renames.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Guid(pub NonZeroU128);

impl Guid {
    /// Sentinel identifier of the asset root folder.
    pub const ROOT: Guid = match NonZeroU128::new(1) {
        None => unreachable!(),
        Some(value) => Guid(value),
    };

    #[inline(always)]
    pub const fn new(value: u128) -> Option<Self> {
        match NonZeroU128::new(value) {
            None => None,
            Some(value) => Some(Guid(value)),
        }
    }

    #[inline(always)]
    pub fn value(&self) -> NonZeroU128 {
        self.0
    }
}

impl From<NonZeroU128> for Guid {
    #[inline(always)]
    fn from(value: NonZeroU128) -> Self {
        Guid(value)
    }
}

impl Serialize for Guid {
    #[inline(always)]
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use std::io::Write;

        if serializer.is_human_readable() {
            let mut hex = [0u8; 32];
            write!(std::io::Cursor::new(&mut hex[..]), "{:032x}", self.0).expect("Must fit");
            let hex = std::str::from_utf8(&hex).expect("Must be UTF-8");
            serializer.serialize_str(hex)
        } else {
            serializer.serialize_u128(self.0.get())
        }
    }
}

struct GuidVisitor;

impl<'de> serde::de::Visitor<'de> for GuidVisitor {
    type Value = Guid;

    #[inline(always)]
    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a non-zero 128-bit integer or a hex string")
    }

    #[inline(always)]
    fn visit_u128<E>(self, v: u128) -> Result<Guid, E>
    where
        E: Error,
    {
        match NonZeroU128::new(v) {
            None => Err(E::invalid_value(Unexpected::Unsigned(0), &self)),
            Some(value) => Ok(Guid(value)),
        }
    }

    #[inline(always)]
    fn visit_str<E>(self, v: &str) -> Result<Guid, E>
    where
        E: Error,
    {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Guid {
    #[inline(always)]
    fn deserialize<D>(deserializer: D) -> Result<Guid, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(GuidVisitor)
        } else {
            deserializer.deserialize_u128(GuidVisitor)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseGuidError {
    #[error(transparent)]
    ParseIntError(#[from] ParseIntError),

    #[error("Guid cannot be zero")]
    ZeroGuid,
}

impl FromStr for Guid {
    type Err = ParseGuidError;

    #[inline(always)]
    fn from_str(s: &str) -> Result<Self, ParseGuidError> {
        let value = u128::from_str_radix(s, 16)?;
        match NonZeroU128::new(value) {
            None => Err(ParseGuidError::ZeroGuid),
            Some(value) => Ok(Guid(value)),
        }
    }
}

impl Debug for Guid {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        LowerHex::fmt(&self.0.get(), f)
    }
}

impl LowerHex for Guid {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        LowerHex::fmt(&self.0.get(), f)
    }
}

impl Display for Guid {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        LowerHex::fmt(&self.0.get(), f)
    }
}

/// Width of one object-kind range inside a file.
/// Persisted identifiers bake this constant in, so it must never change.
pub const MAX_OBJECTS_PER_KIND: u32 = 100_000;

/// Discriminator for the kind of object an importer produces.
/// Kinds partition the local identifier space of one file.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ObjectKind(pub u32);

impl ObjectKind {
    #[inline(always)]
    pub const fn index(&self) -> u32 {
        self.0
    }
}

impl Debug for ObjectKind {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind({})", self.0)
    }
}

/// 32-bit per-file object identifier.
///
/// Identifiers are partitioned by object kind:
/// `id = kind * MAX_OBJECTS_PER_KIND + offset`.
/// Valid identifiers are even. Odd values can only come from corrupt
/// persisted data and are rejected when a sidecar is read.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct LocalId(u32);

impl LocalId {
    /// Composes an identifier from a kind and an even offset within the kind's range.
    #[inline(always)]
    pub fn compose(kind: ObjectKind, offset: u32) -> LocalId {
        debug_assert!(offset < MAX_OBJECTS_PER_KIND);
        debug_assert!(offset % 2 == 0);
        LocalId(kind.0 * MAX_OBJECTS_PER_KIND + offset)
    }

    #[inline(always)]
    pub const fn from_raw(value: u32) -> LocalId {
        LocalId(value)
    }

    #[inline(always)]
    pub const fn get(&self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub const fn kind(&self) -> ObjectKind {
        ObjectKind(self.0 / MAX_OBJECTS_PER_KIND)
    }

    #[inline(always)]
    pub const fn offset(&self) -> u32 {
        self.0 % MAX_OBJECTS_PER_KIND
    }

    /// Odd identifiers are corrupt legacy data.
    #[inline(always)]
    pub const fn is_valid(&self) -> bool {
        self.0 % 2 == 0
    }
}

impl Serialize for LocalId {
    #[inline(always)]
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.collect_str(&self.0)
        } else {
            serializer.serialize_u32(self.0)
        }
    }
}

struct LocalIdVisitor;

impl<'de> serde::de::Visitor<'de> for LocalIdVisitor {
    type Value = LocalId;

    #[inline(always)]
    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a 32-bit integer or a decimal string")
    }

    #[inline(always)]
    fn visit_u64<E>(self, v: u64) -> Result<LocalId, E>
    where
        E: Error,
    {
        match u32::try_from(v) {
            Err(_) => Err(E::invalid_value(Unexpected::Unsigned(v), &self)),
            Ok(v) => Ok(LocalId(v)),
        }
    }

    #[inline(always)]
    fn visit_i64<E>(self, v: i64) -> Result<LocalId, E>
    where
        E: Error,
    {
        match u32::try_from(v) {
            Err(_) => Err(E::invalid_value(Unexpected::Signed(v), &self)),
            Ok(v) => Ok(LocalId(v)),
        }
    }

    #[inline(always)]
    fn visit_str<E>(self, v: &str) -> Result<LocalId, E>
    where
        E: Error,
    {
        v.parse().map(LocalId).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for LocalId {
    #[inline(always)]
    fn deserialize<D>(deserializer: D) -> Result<LocalId, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(LocalIdVisitor)
        } else {
            deserializer.deserialize_u32(LocalIdVisitor)
        }
    }
}

impl Debug for LocalId {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Display for LocalId {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_round_trip() {
        let id = LocalId::compose(ObjectKind(4), 2);
        assert_eq!(id.get(), 400_002);
        assert_eq!(id.kind(), ObjectKind(4));
        assert_eq!(id.offset(), 2);
        assert!(id.is_valid());
    }

    #[test]
    fn test_odd_is_invalid() {
        assert!(!LocalId::from_raw(400_003).is_valid());
    }

    #[test]
    fn test_guid_hex_round_trip() {
        let guid = Guid::new(0xdead_beef_0123).unwrap();
        let hex = format!("{guid}");
        assert_eq!(hex.parse::<Guid>().unwrap(), guid);
    }
}
