pub fn round_size_up_to_alignment_u32(
    size: u32,
    required_alignment: u32,
) -> u32 {
    assert!(required_alignment > 0);
    ((size + required_alignment - 1) / required_alignment) * required_alignment
}

pub fn round_size_up_to_alignment_u64(
    size: u64,
    required_alignment: u64,
) -> u64 {
    assert!(required_alignment > 0);
    ((size + required_alignment - 1) / required_alignment) * required_alignment
}

/// Number of whole `stride` sized slots needed to cover `size` bytes
pub fn slots_to_cover(
    size: u64,
    stride: u64,
) -> u64 {
    assert!(stride > 0);
    (size + stride - 1) / stride
}

pub fn f32_slice_as_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn u32_slice_as_bytes(values: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_size_up_to_alignment_u32(0, 16), 0);
        assert_eq!(round_size_up_to_alignment_u32(1, 16), 16);
        assert_eq!(round_size_up_to_alignment_u32(16, 16), 16);
        assert_eq!(round_size_up_to_alignment_u64(17, 16), 32);
    }

    #[test]
    fn test_slots_to_cover() {
        assert_eq!(slots_to_cover(0, 64), 0);
        assert_eq!(slots_to_cover(16, 64), 1);
        assert_eq!(slots_to_cover(128, 64), 2);
        assert_eq!(slots_to_cover(129, 64), 3);
    }

    #[test]
    fn test_little_endian_bytes() {
        assert_eq!(u32_slice_as_bytes(&[1, 2]), vec![1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(f32_slice_as_bytes(&[1.0]), 1.0f32.to_le_bytes().to_vec());
    }
}
