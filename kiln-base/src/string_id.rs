use serde::{Deserialize, Serialize};
use std::hash::Hasher;

const FNV1A_32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV1A_32_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a. Stable across processes and platforms, so it is safe to persist.
pub const fn fnv1a_32(bytes: &[u8]) -> u32 {
    fnv1a_32_continue(FNV1A_32_OFFSET_BASIS, bytes)
}

const fn fnv1a_32_continue(
    mut hash: u32,
    bytes: &[u8],
) -> u32 {
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV1A_32_PRIME);
        i += 1;
    }
    hash
}

/// `std::hash::Hasher` producing a 32-bit FNV-1a value. Used to derive content keys from types
/// that implement `Hash`.
pub struct Fnv1a32Hasher {
    hash: u32,
}

impl Default for Fnv1a32Hasher {
    fn default() -> Self {
        Fnv1a32Hasher {
            hash: FNV1A_32_OFFSET_BASIS,
        }
    }
}

impl Fnv1a32Hasher {
    pub fn hash_of<T: std::hash::Hash + ?Sized>(value: &T) -> u32 {
        let mut hasher = Fnv1a32Hasher::default();
        value.hash(&mut hasher);
        hasher.finish32()
    }

    pub fn finish32(&self) -> u32 {
        self.hash
    }
}

impl Hasher for Fnv1a32Hasher {
    fn finish(&self) -> u64 {
        self.hash as u64
    }

    fn write(
        &mut self,
        bytes: &[u8],
    ) {
        self.hash = fnv1a_32_continue(self.hash, bytes);
    }

    // Lengths are hashed as u64 so keys don't depend on the pointer width
    fn write_usize(
        &mut self,
        i: usize,
    ) {
        self.write(&(i as u64).to_le_bytes());
    }
}

/// Compile time hashed string, used for property names, format types and loader type ids
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StringId(pub u32);

impl StringId {
    pub const fn new(string: &str) -> Self {
        StringId(fnv1a_32(string.as_bytes()))
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

impl std::fmt::Debug for StringId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        write!(f, "StringId({:#010x})", self.0)
    }
}

impl From<&str> for StringId {
    fn from(string: &str) -> Self {
        StringId::new(string)
    }
}

/// Identifies an asset by the hash of its virtual path without extension, for example
/// `Example/Mesh/Character/Imrod`
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub u32);

impl AssetId {
    pub const INVALID: AssetId = AssetId(u32::MAX);

    pub fn from_virtual_path(virtual_path: &str) -> Self {
        let without_extension = match virtual_path.rfind('.') {
            Some(dot) if !virtual_path[dot..].contains('/') => &virtual_path[..dot],
            _ => virtual_path,
        };
        AssetId(fnv1a_32(without_extension.as_bytes()))
    }

    pub fn is_valid(self) -> bool {
        self != AssetId::INVALID
    }
}

impl std::fmt::Debug for AssetId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        write!(f, "AssetId({:#010x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a_32(b""), 0x811c9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9cf968);
    }

    #[test]
    fn test_string_id_is_const() {
        const ID: StringId = StringId::new("PipelineStateCache");
        assert_eq!(ID, StringId::from("PipelineStateCache"));
        assert_ne!(ID, StringId::new("PipelineStateCach"));
    }

    #[test]
    fn test_asset_id_ignores_extension() {
        assert_eq!(
            AssetId::from_virtual_path("Example/Mesh/Imrod.mesh"),
            AssetId::from_virtual_path("Example/Mesh/Imrod")
        );
        // A dot inside a directory name is not an extension
        assert_eq!(
            AssetId::from_virtual_path("Example/v1.2/Imrod"),
            AssetId(fnv1a_32(b"Example/v1.2/Imrod"))
        );
    }

    #[test]
    fn test_hasher_matches_bytes() {
        let mut hasher = Fnv1a32Hasher::default();
        hasher.write(b"foo");
        hasher.write(b"bar");
        assert_eq!(hasher.finish32(), fnv1a_32(b"foobar"));
    }
}
