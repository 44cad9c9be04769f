use crate::null::RhiTextureNull;
use crate::{RhiObjectId, RhiTextureDef};

/// An image that can be sampled by shaders
#[derive(Debug)]
pub enum RhiTexture {
    Null(RhiTextureNull),
}

impl RhiTexture {
    pub fn object_id(&self) -> RhiObjectId {
        match self {
            RhiTexture::Null(inner) => inner.object_id(),
        }
    }

    pub fn texture_def(&self) -> &RhiTextureDef {
        match self {
            RhiTexture::Null(inner) => inner.texture_def(),
        }
    }
}
