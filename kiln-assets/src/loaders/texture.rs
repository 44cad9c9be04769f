use super::{LoaderDispatchContext, LoaderTarget, ResourceLoader};
use crate::ResourcePayload;
use kiln_api::{RhiFormat, RhiResult, RhiTexture, RhiTextureDef};
use kiln_base::file_format::{write_header, BinaryReader, FileFormatHeader};
use kiln_base::StringId;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;

pub const TEXTURE_FORMAT_TYPE: u32 = StringId::new("Texture").0;
pub const TEXTURE_FORMAT_VERSION: u32 = 1;

// Stored as an index into this table
const TEXTURE_FILE_FORMATS: [RhiFormat; 7] = [
    RhiFormat::R8_UNORM,
    RhiFormat::R8G8B8A8_UNORM,
    RhiFormat::R8G8B8A8_SRGB,
    RhiFormat::BC1_RGBA_UNORM_BLOCK,
    RhiFormat::BC3_UNORM_BLOCK,
    RhiFormat::R16G16B16A16_SFLOAT,
    RhiFormat::R32G32B32A32_SFLOAT,
];

#[derive(Serialize, Deserialize)]
struct TextureHeader {
    width: u32,
    height: u32,
    mip_count: u32,
    format: u32,
}

/// ```text
/// FileFormatHeader
/// TextureHeader { width: u32, height: u32, mip_count: u32, format: u32 }
/// data[..]: u8, every mip level tightly packed, largest first
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct TextureFile {
    pub texture_def: RhiTextureDef,
    pub data: Vec<u8>,
}

impl TextureFile {
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let format_index = TEXTURE_FILE_FORMATS
            .iter()
            .position(|x| *x == self.texture_def.format)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "{:?} can't be stored in a texture file",
                        self.texture_def.format
                    ),
                )
            })?;

        let mut bytes = Vec::with_capacity(24 + self.data.len());
        FileFormatHeader::new(TEXTURE_FORMAT_TYPE, TEXTURE_FORMAT_VERSION).write_to(&mut bytes)?;
        write_header(
            &mut bytes,
            &TextureHeader {
                width: self.texture_def.width,
                height: self.texture_def.height,
                mip_count: self.texture_def.mip_count,
                format: format_index as u32,
            },
        )?;
        bytes.extend_from_slice(&self.data);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        FileFormatHeader::read_expected(&mut reader, TEXTURE_FORMAT_TYPE, TEXTURE_FORMAT_VERSION)?;

        let header: TextureHeader = reader.read_header()?;
        let format = *TEXTURE_FILE_FORMATS
            .get(header.format as usize)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Invalid texture format {}", header.format),
                )
            })?;

        Ok(TextureFile {
            texture_def: RhiTextureDef {
                width: header.width,
                height: header.height,
                mip_count: header.mip_count,
                format,
            },
            data: reader.remaining().to_vec(),
        })
    }
}

#[derive(Default)]
pub struct TextureResource {
    pub texture: Option<Arc<RhiTexture>>,
}

impl ResourcePayload for TextureResource {
    const RESOURCE_TYPE_NAME: &'static str = "texture";
    const DEFAULT_LOADER_TYPE_ID: StringId = TextureResourceLoader::TYPE_ID;

    fn create_resource_loader(
        loader_type_id: StringId,
        target: LoaderTarget<Self>,
    ) -> Option<ResourceLoader> {
        if loader_type_id == TextureResourceLoader::TYPE_ID {
            Some(ResourceLoader::Texture(TextureResourceLoader::new(target)))
        } else {
            None
        }
    }
}

pub struct TextureResourceLoader {
    pub(super) target: LoaderTarget<TextureResource>,
    pub(super) resource: TextureResource,
    texture_file: Option<TextureFile>,
}

impl TextureResourceLoader {
    pub const TYPE_ID: StringId = StringId::new("TextureResourceLoader");

    fn new(target: LoaderTarget<TextureResource>) -> Self {
        TextureResourceLoader {
            target,
            resource: Default::default(),
            texture_file: None,
        }
    }

    pub(super) fn on_deserialization(
        &mut self,
        bytes: &[u8],
    ) -> RhiResult<()> {
        self.texture_file = Some(TextureFile::from_bytes(bytes)?);
        Ok(())
    }

    pub(super) fn on_processing(&mut self) -> RhiResult<()> {
        let texture_file = self
            .texture_file
            .as_ref()
            .ok_or("Texture processed without being deserialized")?;
        let texture_def = &texture_file.texture_def;
        if texture_def.width == 0 || texture_def.height == 0 || texture_def.mip_count == 0 {
            return Err(format!("Invalid texture dimensions {:?}", texture_def).into());
        }

        let expected_size = texture_def.data_size_in_bytes();
        if texture_file.data.len() as u64 != expected_size {
            return Err(format!(
                "Texture data is {} bytes, {:?} needs {}",
                texture_file.data.len(),
                texture_def,
                expected_size
            )
            .into());
        }
        Ok(())
    }

    pub(super) fn on_dispatch(
        &mut self,
        context: &LoaderDispatchContext,
    ) -> RhiResult<()> {
        let texture_file = self
            .texture_file
            .take()
            .ok_or("Texture dispatched without being deserialized")?;
        let texture = context
            .device_context
            .create_texture(&texture_file.texture_def, &texture_file.data)?;
        self.resource.texture = Some(Arc::new(texture));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn checkerboard() -> TextureFile {
        let texture_def = RhiTextureDef {
            width: 2,
            height: 2,
            mip_count: 2,
            format: RhiFormat::R8G8B8A8_UNORM,
        };
        // 2x2 + 1x1 pixels
        let data = vec![0xFF; 5 * 4];
        TextureFile { texture_def, data }
    }

    #[test]
    fn test_texture_file() {
        let texture_file = checkerboard();
        let bytes = texture_file.to_bytes().unwrap();
        assert_eq!(TextureFile::from_bytes(&bytes).unwrap(), texture_file);

        let mut depth = texture_file.clone();
        depth.texture_def.format = RhiFormat::D32_SFLOAT;
        assert!(depth.to_bytes().is_err());
    }
}
