use std::sync::Arc;

use generational_arena::Index;

use crate::skeleton::AnimationData;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(Index);
impl ResourceId {
    pub fn index(&self) -> Index {
        self.0
    }
}
impl From<Index> for ResourceId {
    fn from(idx: Index) -> Self {
        Self(idx)
    }
}

/// Summary of the geometry that came with a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshInfo {
    pub primitive_count: u32,
    pub vertex_count: u32,
    pub index_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelData {
    pub mesh: MeshInfo,
    /// None for static meshes
    pub animation_data: Option<AnimationData>,
}

/// Asynchronous model loading as seen by model components. Loads are polled, never awaited.
pub trait MeshResourceLoader {
    fn add_model(&mut self, path: &str) -> ResourceId;
    fn is_model_loaded(&self, id: ResourceId) -> bool;
    fn get_model_data(&self, id: ResourceId) -> Option<Arc<ModelData>>;
    /// Gives back a handle from [`MeshResourceLoader::add_model`].
    fn release_model(&mut self, id: ResourceId);
}
