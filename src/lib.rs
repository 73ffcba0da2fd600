pub mod animated_model;
pub mod error;
pub mod params;
pub mod renderer;
pub mod resource_manager;
pub mod skeleton;

pub use animated_model::{AnimatedModel, LifecycleState, MeshToRender};
pub use params::AnimatedModelParams;
