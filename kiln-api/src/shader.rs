use crate::null::RhiShaderNull;
use crate::{RhiObjectId, RhiShaderStage};

/// A single compiled shader stage
#[derive(Debug)]
pub enum RhiShader {
    Null(RhiShaderNull),
}

impl RhiShader {
    pub fn object_id(&self) -> RhiObjectId {
        match self {
            RhiShader::Null(inner) => inner.object_id(),
        }
    }

    pub fn stage(&self) -> RhiShaderStage {
        match self {
            RhiShader::Null(inner) => inner.stage(),
        }
    }
}
