use kiln_base::StringId;
use serde::{Deserialize, Serialize};

/// Named integer values that drive `@property` and `@value` directives while building shader
/// source. Kept sorted by id so equal property sets hash and serialize identically.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderProperties {
    properties: Vec<(StringId, i32)>,
}

impl ShaderProperties {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_property(
        mut self,
        property_id: StringId,
        value: i32,
    ) -> Self {
        self.set_property_value(property_id, value);
        self
    }

    pub fn set_property_value(
        &mut self,
        property_id: StringId,
        value: i32,
    ) {
        match self
            .properties
            .binary_search_by_key(&property_id, |(id, _)| *id)
        {
            Ok(index) => self.properties[index].1 = value,
            Err(index) => self.properties.insert(index, (property_id, value)),
        }
    }

    /// Missing properties read as zero, which `@property` treats as false
    pub fn get_property_value(
        &self,
        property_id: StringId,
    ) -> i32 {
        self.properties
            .binary_search_by_key(&property_id, |(id, _)| *id)
            .map(|index| self.properties[index].1)
            .unwrap_or(0)
    }

    pub fn has_property(
        &self,
        property_id: StringId,
    ) -> bool {
        self.properties
            .binary_search_by_key(&property_id, |(id, _)| *id)
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(StringId, i32)> {
        self.properties.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_base::Fnv1a32Hasher;

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a = ShaderProperties::new()
            .with_property(StringId::new("UseSkinning"), 1)
            .with_property(StringId::new("NumberOfLights"), 4);
        let b = ShaderProperties::new()
            .with_property(StringId::new("NumberOfLights"), 4)
            .with_property(StringId::new("UseSkinning"), 1);
        assert_eq!(a, b);
        assert_eq!(Fnv1a32Hasher::hash_of(&a), Fnv1a32Hasher::hash_of(&b));
    }

    #[test]
    fn test_get_and_overwrite() {
        let mut properties = ShaderProperties::new();
        assert_eq!(properties.get_property_value(StringId::new("Missing")), 0);
        assert!(!properties.has_property(StringId::new("Missing")));

        properties.set_property_value(StringId::new("Quality"), 2);
        properties.set_property_value(StringId::new("Quality"), 3);
        assert_eq!(properties.len(), 1);
        assert_eq!(properties.get_property_value(StringId::new("Quality")), 3);
    }
}
