use super::{is_dependency_settled, LoaderDispatchContext, LoaderTarget, ResourceLoader};
use crate::{ResourceId, ResourcePayload};
use kiln_api::{RhiBuffer, RhiBufferDef, RhiBufferKind, RhiIndexType, RhiResult};
use kiln_base::file_format::{write_header, BinaryReader, FileFormatHeader};
use kiln_base::{AssetId, StringId};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;

pub const MESH_FORMAT_TYPE: u32 = StringId::new("Mesh").0;
pub const MESH_FORMAT_VERSION: u32 = 1;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SubMesh {
    pub material_asset_id: AssetId,
    pub start_index_location: u32,
    pub number_of_indices: u32,
}

#[derive(Serialize, Deserialize)]
struct MeshHeader {
    number_of_bytes_per_vertex: u32,
    number_of_vertices: u32,
    number_of_indices: u32,
    bytes_per_index: u32,
    skeleton_asset_id: AssetId,
    number_of_sub_meshes: u32,
}

/// ```text
/// FileFormatHeader
/// MeshHeader { number_of_bytes_per_vertex: u32, number_of_vertices: u32, number_of_indices: u32,
///              bytes_per_index: u32, skeleton_asset_id: u32, number_of_sub_meshes: u32 }
/// sub_meshes[number_of_sub_meshes]: { material_asset_id: u32, start_index_location: u32,
///                                     number_of_indices: u32 }
/// vertex_data[number_of_bytes_per_vertex * number_of_vertices]: u8
/// index_data[bytes_per_index * number_of_indices]: u8
/// ```
/// A skeleton asset id of `u32::MAX` means the mesh isn't skinned.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshFile {
    pub number_of_bytes_per_vertex: u32,
    pub number_of_vertices: u32,
    pub index_type: RhiIndexType,
    pub skeleton_asset_id: AssetId,
    pub sub_meshes: Vec<SubMesh>,
    pub vertex_data: Vec<u8>,
    pub index_data: Vec<u8>,
}

impl MeshFile {
    pub fn number_of_indices(&self) -> u32 {
        self.index_data.len() as u32 / self.index_type.size_in_bytes()
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        FileFormatHeader::new(MESH_FORMAT_TYPE, MESH_FORMAT_VERSION).write_to(&mut bytes)?;
        write_header(
            &mut bytes,
            &MeshHeader {
                number_of_bytes_per_vertex: self.number_of_bytes_per_vertex,
                number_of_vertices: self.number_of_vertices,
                number_of_indices: self.number_of_indices(),
                bytes_per_index: self.index_type.size_in_bytes(),
                skeleton_asset_id: self.skeleton_asset_id,
                number_of_sub_meshes: self.sub_meshes.len() as u32,
            },
        )?;
        for sub_mesh in &self.sub_meshes {
            bytes.extend_from_slice(&sub_mesh.material_asset_id.0.to_le_bytes());
            bytes.extend_from_slice(&sub_mesh.start_index_location.to_le_bytes());
            bytes.extend_from_slice(&sub_mesh.number_of_indices.to_le_bytes());
        }
        bytes.extend_from_slice(&self.vertex_data);
        bytes.extend_from_slice(&self.index_data);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        FileFormatHeader::read_expected(&mut reader, MESH_FORMAT_TYPE, MESH_FORMAT_VERSION)?;

        let header: MeshHeader = reader.read_header()?;
        let number_of_bytes_per_vertex = header.number_of_bytes_per_vertex;
        let number_of_vertices = header.number_of_vertices;
        let number_of_indices = header.number_of_indices;
        let index_type = match header.bytes_per_index {
            2 => RhiIndexType::Uint16,
            4 => RhiIndexType::Uint32,
            bytes_per_index => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Invalid number of bytes per index {}", bytes_per_index),
                ))
            }
        };
        let skeleton_asset_id = header.skeleton_asset_id;
        let number_of_sub_meshes = header.number_of_sub_meshes;

        let mut sub_meshes = Vec::with_capacity(number_of_sub_meshes.min(1024) as usize);
        for _ in 0..number_of_sub_meshes {
            sub_meshes.push(SubMesh {
                material_asset_id: AssetId(reader.read_u32()?),
                start_index_location: reader.read_u32()?,
                number_of_indices: reader.read_u32()?,
            });
        }

        let vertex_data_size = number_of_bytes_per_vertex as usize * number_of_vertices as usize;
        let vertex_data = reader.read_bytes(vertex_data_size)?.to_vec();
        let index_data_size = index_type.size_in_bytes() as usize * number_of_indices as usize;
        let index_data = reader.read_bytes(index_data_size)?.to_vec();

        for sub_mesh in &sub_meshes {
            if sub_mesh.start_index_location as u64 + sub_mesh.number_of_indices as u64
                > number_of_indices as u64
            {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Sub mesh index range exceeds the index data",
                ));
            }
        }

        Ok(MeshFile {
            number_of_bytes_per_vertex,
            number_of_vertices,
            index_type,
            skeleton_asset_id,
            sub_meshes,
            vertex_data,
            index_data,
        })
    }
}

#[derive(Default)]
pub struct MeshResource {
    pub vertex_buffer: Option<Arc<RhiBuffer>>,
    pub index_buffer: Option<Arc<RhiBuffer>>,
    pub number_of_vertices: u32,
    pub number_of_indices: u32,
    pub index_type: Option<RhiIndexType>,
    pub sub_meshes: Vec<SubMesh>,
    /// Invalid if the mesh isn't skinned
    pub skeleton_resource_id: ResourceId,
}

impl ResourcePayload for MeshResource {
    const RESOURCE_TYPE_NAME: &'static str = "mesh";
    const DEFAULT_LOADER_TYPE_ID: StringId = MeshResourceLoader::TYPE_ID;

    fn create_resource_loader(
        loader_type_id: StringId,
        target: LoaderTarget<Self>,
    ) -> Option<ResourceLoader> {
        if loader_type_id == MeshResourceLoader::TYPE_ID {
            Some(ResourceLoader::Mesh(MeshResourceLoader::new(target)))
        } else {
            None
        }
    }
}

pub struct MeshResourceLoader {
    pub(super) target: LoaderTarget<MeshResource>,
    pub(super) resource: MeshResource,
    mesh_file: Option<MeshFile>,
}

impl MeshResourceLoader {
    pub const TYPE_ID: StringId = StringId::new("MeshResourceLoader");

    fn new(target: LoaderTarget<MeshResource>) -> Self {
        MeshResourceLoader {
            target,
            resource: Default::default(),
            mesh_file: None,
        }
    }

    pub(super) fn on_deserialization(
        &mut self,
        bytes: &[u8],
    ) -> RhiResult<()> {
        self.mesh_file = Some(MeshFile::from_bytes(bytes)?);
        Ok(())
    }

    pub(super) fn on_dispatch(
        &mut self,
        context: &LoaderDispatchContext,
    ) -> RhiResult<()> {
        let mesh_file = self
            .mesh_file
            .take()
            .ok_or("Mesh dispatched without being deserialized")?;

        if !mesh_file.vertex_data.is_empty() {
            let vertex_buffer = context.device_context.create_buffer_with_data(
                &RhiBufferDef::for_static_buffer(
                    mesh_file.vertex_data.len() as u64,
                    RhiBufferKind::VertexBuffer,
                ),
                &mesh_file.vertex_data,
            )?;
            self.resource.vertex_buffer = Some(Arc::new(vertex_buffer));
        }

        if !mesh_file.index_data.is_empty() {
            let index_buffer = context.device_context.create_buffer_with_data(
                &RhiBufferDef::for_static_buffer(
                    mesh_file.index_data.len() as u64,
                    RhiBufferKind::IndexBuffer,
                ),
                &mesh_file.index_data,
            )?;
            self.resource.index_buffer = Some(Arc::new(index_buffer));
        }

        self.resource.number_of_vertices = mesh_file.number_of_vertices;
        self.resource.number_of_indices = mesh_file.number_of_indices();
        self.resource.index_type = Some(mesh_file.index_type);
        self.resource.sub_meshes = mesh_file.sub_meshes;

        if mesh_file.skeleton_asset_id.is_valid() {
            let skeleton_resource_id = context
                .resource_managers
                .skeleton_manager
                .load_resource_by_asset_id(mesh_file.skeleton_asset_id, None, false, None);
            if !skeleton_resource_id.is_valid() {
                log::warn!(
                    "Mesh {:?} references skeleton {:?} which can't be loaded, using it unskinned",
                    self.target.asset_id(),
                    mesh_file.skeleton_asset_id
                );
            }
            self.resource.skeleton_resource_id = skeleton_resource_id;
        }

        Ok(())
    }

    pub(super) fn is_fully_loaded(
        &self,
        context: &LoaderDispatchContext,
    ) -> bool {
        is_dependency_settled(
            &context.resource_managers.skeleton_manager,
            self.resource.skeleton_resource_id,
        )
    }
}
