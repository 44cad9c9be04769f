//! Pools of elements addressed by generation-checked ids

mod packed_element_pool;
pub use packed_element_pool::PackedElement;
pub use packed_element_pool::PackedElementId;
pub use packed_element_pool::PackedElementPool;
pub use packed_element_pool::MAXIMUM_NUMBER_OF_PACKED_ELEMENTS;
