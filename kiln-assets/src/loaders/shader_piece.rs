use super::{LoaderTarget, ResourceLoader};
use crate::ResourcePayload;
use kiln_api::RhiResult;
use kiln_base::file_format::{BinaryReader, FileFormatHeader};
use kiln_base::StringId;
use std::io;

pub const SHADER_PIECE_FORMAT_TYPE: u32 = StringId::new("ShaderPiece").0;
pub const SHADER_PIECE_FORMAT_VERSION: u32 = 1;

pub(super) fn write_string(
    bytes: &mut Vec<u8>,
    string: &str,
) {
    bytes.extend_from_slice(&(string.len() as u32).to_le_bytes());
    bytes.extend_from_slice(string.as_bytes());
}

pub(super) fn read_string(reader: &mut BinaryReader) -> io::Result<String> {
    let size = reader.read_u32()? as usize;
    let bytes = reader.read_bytes(size)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// ```text
/// FileFormatHeader
/// source_code_size: u32
/// source_code[source_code_size]: u8, UTF-8
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderPieceFile {
    pub source_code: String,
}

impl ShaderPieceFile {
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        FileFormatHeader::new(SHADER_PIECE_FORMAT_TYPE, SHADER_PIECE_FORMAT_VERSION)
            .write_to(&mut bytes)?;
        write_string(&mut bytes, &self.source_code);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        FileFormatHeader::read_expected(
            &mut reader,
            SHADER_PIECE_FORMAT_TYPE,
            SHADER_PIECE_FORMAT_VERSION,
        )?;
        Ok(ShaderPieceFile {
            source_code: read_string(&mut reader)?,
        })
    }
}

#[derive(Default)]
pub struct ShaderPieceResource {
    pub source_code: String,
}

impl ResourcePayload for ShaderPieceResource {
    const RESOURCE_TYPE_NAME: &'static str = "shader piece";
    const DEFAULT_LOADER_TYPE_ID: StringId = ShaderPieceResourceLoader::TYPE_ID;

    fn create_resource_loader(
        loader_type_id: StringId,
        target: LoaderTarget<Self>,
    ) -> Option<ResourceLoader> {
        if loader_type_id == ShaderPieceResourceLoader::TYPE_ID {
            Some(ResourceLoader::ShaderPiece(ShaderPieceResourceLoader {
                target,
                resource: Default::default(),
            }))
        } else {
            None
        }
    }
}

pub struct ShaderPieceResourceLoader {
    pub(super) target: LoaderTarget<ShaderPieceResource>,
    pub(super) resource: ShaderPieceResource,
}

impl ShaderPieceResourceLoader {
    pub const TYPE_ID: StringId = StringId::new("ShaderPieceResourceLoader");

    pub(super) fn on_deserialization(
        &mut self,
        bytes: &[u8],
    ) -> RhiResult<()> {
        self.resource.source_code = ShaderPieceFile::from_bytes(bytes)?.source_code;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_utf8() {
        let mut bytes = Vec::new();
        FileFormatHeader::new(SHADER_PIECE_FORMAT_TYPE, SHADER_PIECE_FORMAT_VERSION)
            .write_to(&mut bytes)
            .unwrap();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0xC3, 0x28]);
        assert_eq!(
            ShaderPieceFile::from_bytes(&bytes).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );

        let piece = ShaderPieceFile {
            source_code: "float4 white() { return 1.0; }".to_string(),
        };
        assert_eq!(ShaderPieceFile::from_bytes(&piece.to_bytes().unwrap()).unwrap(), piece);
    }
}
