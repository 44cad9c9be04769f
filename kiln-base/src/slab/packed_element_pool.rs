use std::collections::VecDeque;

/// Largest element count a pool can be configured with. The low 16 bits of an id hold the slot
/// index and 0xFFFF is reserved so that no live id can equal `PackedElementId::INVALID`.
pub const MAXIMUM_NUMBER_OF_PACKED_ELEMENTS: u32 = 0xFFFF;

const INDEX_MASK: u32 = 0xFFFF;
const GENERATION_SHIFT: u32 = 16;

/// Packed `(generation << 16) | index` id handed out by a `PackedElementPool`. An id stays valid
/// until the element is removed. After that the slot's generation changes and lookups with the
/// old id fail.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackedElementId(u32);

impl PackedElementId {
    pub const INVALID: PackedElementId = PackedElementId(u32::MAX);

    fn new(
        index: u32,
        generation: u16,
    ) -> Self {
        PackedElementId(((generation as u32) << GENERATION_SHIFT) | (index & INDEX_MASK))
    }

    pub fn from_raw(raw: u32) -> Self {
        PackedElementId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    pub fn generation(self) -> u16 {
        (self.0 >> GENERATION_SHIFT) as u16
    }

    pub fn is_valid(self) -> bool {
        self != PackedElementId::INVALID
    }
}

impl Default for PackedElementId {
    fn default() -> Self {
        PackedElementId::INVALID
    }
}

impl std::fmt::Debug for PackedElementId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        if self.is_valid() {
            write!(
                f,
                "Index: {} Generation: {}",
                self.index(),
                self.generation()
            )
        } else {
            write!(f, "Invalid")
        }
    }
}

/// Hooks called by the pool when a slot is handed out or given back
pub trait PackedElement: Default {
    fn initialize_element(
        &mut self,
        id: PackedElementId,
    );

    /// Must reset the element's identity so that a stale copy can be recognized
    fn deinitialize_element(&mut self);
}

#[derive(Clone, Copy)]
struct IndirectionEntry {
    generation: u16,
    // Position in the dense element array, None while the slot is on the free list
    element_index: Option<u32>,
}

/// Object pool with O(1) add/remove/lookup. Elements are stored densely so manager level update
/// loops can iterate them by index. An indirection table maps the stable id to the current dense
/// position, and released slots are reused in FIFO order before the table grows.
pub struct PackedElementPool<T: PackedElement> {
    elements: Vec<T>,
    // Parallel to elements, used to patch the indirection table when an element is moved
    element_ids: Vec<PackedElementId>,
    indirection: Vec<IndirectionEntry>,
    free_list: VecDeque<u32>,
    maximum_number_of_elements: u32,
    type_name: &'static str,
}

impl<T: PackedElement> PackedElementPool<T> {
    pub fn new(
        type_name: &'static str,
        maximum_number_of_elements: u32,
    ) -> Self {
        assert!(
            maximum_number_of_elements <= MAXIMUM_NUMBER_OF_PACKED_ELEMENTS,
            "a packed element pool can hold at most {} elements",
            MAXIMUM_NUMBER_OF_PACKED_ELEMENTS
        );

        PackedElementPool {
            elements: Default::default(),
            element_ids: Default::default(),
            indirection: Default::default(),
            free_list: Default::default(),
            maximum_number_of_elements,
            type_name,
        }
    }

    pub fn maximum_number_of_elements(&self) -> u32 {
        self.maximum_number_of_elements
    }

    pub fn number_of_elements(&self) -> u32 {
        self.elements.len() as u32
    }

    /// Allocate an element. Returns None if the pool is at capacity, in which case no existing
    /// element is touched.
    pub fn add_element(&mut self) -> Option<&mut T> {
        if self.elements.len() as u32 >= self.maximum_number_of_elements {
            log::error!(
                "Pool of {} is exhausted, the maximum of {} elements is reached",
                self.type_name,
                self.maximum_number_of_elements
            );
            return None;
        }

        let slot_index = match self.free_list.pop_front() {
            Some(slot_index) => slot_index,
            None => {
                self.indirection.push(IndirectionEntry {
                    generation: 0,
                    element_index: None,
                });
                self.indirection.len() as u32 - 1
            }
        };

        let element_index = self.elements.len() as u32;
        let entry = &mut self.indirection[slot_index as usize];
        assert!(entry.element_index.is_none());
        entry.element_index = Some(element_index);

        let id = PackedElementId::new(slot_index, entry.generation);
        self.element_ids.push(id);
        self.elements.push(T::default());

        let element = &mut self.elements[element_index as usize];
        element.initialize_element(id);
        Some(element)
    }

    fn element_index(
        &self,
        id: PackedElementId,
    ) -> Option<usize> {
        if !id.is_valid() {
            return None;
        }

        let entry = self.indirection.get(id.index() as usize)?;
        if entry.generation != id.generation() {
            return None;
        }

        entry.element_index.map(|index| index as usize)
    }

    pub fn is_element_id_valid(
        &self,
        id: PackedElementId,
    ) -> bool {
        self.element_index(id).is_some()
    }

    /// Fatal if the id is invalid or stale
    pub fn get_element_by_id(
        &self,
        id: PackedElementId,
    ) -> &T {
        match self.try_get_element_by_id(id) {
            Some(element) => element,
            None => panic!("{} {:?} is not a live element", self.type_name, id),
        }
    }

    /// Fatal if the id is invalid or stale
    pub fn get_element_by_id_mut(
        &mut self,
        id: PackedElementId,
    ) -> &mut T {
        let type_name = self.type_name;
        match self.try_get_element_by_id_mut(id) {
            Some(element) => element,
            None => panic!("{} {:?} is not a live element", type_name, id),
        }
    }

    pub fn try_get_element_by_id(
        &self,
        id: PackedElementId,
    ) -> Option<&T> {
        let index = self.element_index(id)?;
        Some(&self.elements[index])
    }

    pub fn try_get_element_by_id_mut(
        &mut self,
        id: PackedElementId,
    ) -> Option<&mut T> {
        let index = self.element_index(id)?;
        Some(&mut self.elements[index])
    }

    /// Dense access, index must be less than `number_of_elements()`
    pub fn get_element_by_index(
        &self,
        index: u32,
    ) -> &T {
        &self.elements[index as usize]
    }

    pub fn get_element_id_by_index(
        &self,
        index: u32,
    ) -> PackedElementId {
        self.element_ids[index as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.elements.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.elements.iter_mut()
    }

    /// Remove the element and return it deinitialized. The last element is moved into the hole
    /// so storage stays dense. Fatal if the id is invalid or stale.
    pub fn remove_element(
        &mut self,
        id: PackedElementId,
    ) -> T {
        let element_index = match self.element_index(id) {
            Some(element_index) => element_index,
            None => panic!(
                "tried to remove {} {:?} which is not a live element",
                self.type_name, id
            ),
        };

        let mut element = self.elements.swap_remove(element_index);
        self.element_ids.swap_remove(element_index);
        if element_index < self.elements.len() {
            let moved_id = self.element_ids[element_index];
            self.indirection[moved_id.index() as usize].element_index = Some(element_index as u32);
        }

        let entry = &mut self.indirection[id.index() as usize];
        entry.element_index = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free_list.push_back(id.index());

        element.deinitialize_element();
        element
    }
}
