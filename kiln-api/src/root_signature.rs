use crate::null::RhiRootSignatureNull;
use crate::{RhiObjectId, RhiRootSignatureDef};

/// Layout of the resources a pipeline binds
#[derive(Debug)]
pub enum RhiRootSignature {
    Null(RhiRootSignatureNull),
}

impl RhiRootSignature {
    pub fn object_id(&self) -> RhiObjectId {
        match self {
            RhiRootSignature::Null(inner) => inner.object_id(),
        }
    }

    pub fn root_signature_def(&self) -> &RhiRootSignatureDef {
        match self {
            RhiRootSignature::Null(inner) => inner.root_signature_def(),
        }
    }
}
