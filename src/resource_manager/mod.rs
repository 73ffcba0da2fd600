pub mod gltf_import;
pub mod loader;
pub mod registry;
pub mod resource_manager;

pub use gltf_import::GltfImporter;
pub use loader::{MeshInfo, MeshResourceLoader, ModelData, ResourceId};
pub use resource_manager::{ModelImporter, ResourceManager};
