use crate::null::RhiResourceGroupNull;
use crate::{RhiGroupResource, RhiObjectId};

/// A set of resources bound together to one root parameter of a root signature
#[derive(Debug)]
pub enum RhiResourceGroup {
    Null(RhiResourceGroupNull),
}

impl RhiResourceGroup {
    pub fn object_id(&self) -> RhiObjectId {
        match self {
            RhiResourceGroup::Null(inner) => inner.object_id(),
        }
    }

    pub fn root_parameter_index(&self) -> u32 {
        match self {
            RhiResourceGroup::Null(inner) => inner.root_parameter_index(),
        }
    }

    pub fn resources(&self) -> &[RhiGroupResource] {
        match self {
            RhiResourceGroup::Null(inner) => inner.resources(),
        }
    }
}
