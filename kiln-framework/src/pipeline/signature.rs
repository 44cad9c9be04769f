use super::ShaderProperties;
use kiln_api::{
    RhiComputePipelineDef, RhiDeviceContext, RhiFixedFunctionState, RhiGraphicsPipelineDef,
    RhiPipeline, RhiPrimitiveTopology, RhiRenderPassFormat, RhiResult, RhiRootSignature,
    RhiRootSignatureDef, RhiShader, RhiShaderStage,
};
use kiln_base::{fnv1a_32, AssetId, Fnv1a32Hasher};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

pub type PipelineStateSignatureId = u32;

/// Everything that determines a pipeline state object. Two equal signatures always produce the
/// same pipeline, so the signature id is the cache key in memory and on disk.
pub trait PipelineStateSignature:
    Clone + Debug + Hash + Eq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Used in logs and thread names
    const PIPELINE_TYPE_NAME: &'static str;

    /// FNV-1a of the bincode encoding, stable across runs
    fn signature_id(&self) -> PipelineStateSignatureId {
        match bincode::serialize(self) {
            Ok(bytes) => fnv1a_32(&bytes),
            Err(error) => {
                log::warn!(
                    "Could not encode {} signature, hashing it in memory instead: {}",
                    Self::PIPELINE_TYPE_NAME,
                    error
                );
                Fnv1a32Hasher::hash_of(self)
            }
        }
    }

    fn material_blueprint_asset_id(&self) -> AssetId;

    fn root_signature_def(&self) -> &RhiRootSignatureDef;

    fn shader_properties(&self) -> &ShaderProperties;

    /// Blueprint per stage, in the order shaders are handed to `create_pipeline`
    fn shader_blueprints(&self) -> Vec<(RhiShaderStage, AssetId)>;

    /// Signatures with the same fallback key can stand in for each other while one of them is
    /// still compiling
    fn fallback_key(&self) -> u32;

    fn create_pipeline(
        &self,
        device_context: &RhiDeviceContext,
        root_signature: &RhiRootSignature,
        shaders: &[&RhiShader],
    ) -> RhiResult<RhiPipeline>;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphicsPipelineStateSignature {
    pub material_blueprint_asset_id: AssetId,
    pub root_signature: RhiRootSignatureDef,
    pub shader_blueprints: Vec<(RhiShaderStage, AssetId)>,
    pub shader_properties: ShaderProperties,
    pub fixed_function_state: RhiFixedFunctionState,
    pub render_pass_format: RhiRenderPassFormat,
    pub primitive_topology: RhiPrimitiveTopology,
}

impl PipelineStateSignature for GraphicsPipelineStateSignature {
    const PIPELINE_TYPE_NAME: &'static str = "graphics";

    fn material_blueprint_asset_id(&self) -> AssetId {
        self.material_blueprint_asset_id
    }

    fn root_signature_def(&self) -> &RhiRootSignatureDef {
        &self.root_signature
    }

    fn shader_properties(&self) -> &ShaderProperties {
        &self.shader_properties
    }

    fn shader_blueprints(&self) -> Vec<(RhiShaderStage, AssetId)> {
        self.shader_blueprints.clone()
    }

    fn fallback_key(&self) -> u32 {
        Fnv1a32Hasher::hash_of(&(
            self.material_blueprint_asset_id,
            &self.render_pass_format,
            self.primitive_topology,
        ))
    }

    fn create_pipeline(
        &self,
        device_context: &RhiDeviceContext,
        root_signature: &RhiRootSignature,
        shaders: &[&RhiShader],
    ) -> RhiResult<RhiPipeline> {
        device_context.create_graphics_pipeline(&RhiGraphicsPipelineDef {
            root_signature,
            shaders,
            fixed_function_state: &self.fixed_function_state,
            render_pass_format: &self.render_pass_format,
            primitive_topology: self.primitive_topology,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputePipelineStateSignature {
    pub material_blueprint_asset_id: AssetId,
    pub root_signature: RhiRootSignatureDef,
    pub compute_shader_blueprint: AssetId,
    pub shader_properties: ShaderProperties,
}

impl PipelineStateSignature for ComputePipelineStateSignature {
    const PIPELINE_TYPE_NAME: &'static str = "compute";

    fn material_blueprint_asset_id(&self) -> AssetId {
        self.material_blueprint_asset_id
    }

    fn root_signature_def(&self) -> &RhiRootSignatureDef {
        &self.root_signature
    }

    fn shader_properties(&self) -> &ShaderProperties {
        &self.shader_properties
    }

    fn shader_blueprints(&self) -> Vec<(RhiShaderStage, AssetId)> {
        vec![(RhiShaderStage::Compute, self.compute_shader_blueprint)]
    }

    fn fallback_key(&self) -> u32 {
        self.material_blueprint_asset_id.0
    }

    fn create_pipeline(
        &self,
        device_context: &RhiDeviceContext,
        root_signature: &RhiRootSignature,
        shaders: &[&RhiShader],
    ) -> RhiResult<RhiPipeline> {
        let shader = shaders
            .first()
            .ok_or("A compute pipeline state needs a compute shader")?;
        device_context.create_compute_pipeline(&RhiComputePipelineDef {
            root_signature,
            shader: *shader,
        })
    }
}
