use crate::null::RhiPipelineNull;
use crate::RhiObjectId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RhiPipelineType {
    Graphics,
    Compute,
}

/// A fully baked graphics or compute pipeline state object
#[derive(Debug)]
pub enum RhiPipeline {
    Null(RhiPipelineNull),
}

impl RhiPipeline {
    pub fn object_id(&self) -> RhiObjectId {
        match self {
            RhiPipeline::Null(inner) => inner.object_id(),
        }
    }

    pub fn pipeline_type(&self) -> RhiPipelineType {
        match self {
            RhiPipeline::Null(inner) => inner.pipeline_type(),
        }
    }

    pub fn root_signature_object_id(&self) -> RhiObjectId {
        match self {
            RhiPipeline::Null(inner) => inner.root_signature_object_id(),
        }
    }
}
