use crate::renderer::gpu::BufferHandle;

#[derive(Debug, thiserror::Error)]
pub enum GraphicsError {
    #[error("Cannot create buffer '{label}' of {size} bytes")]
    InvalidBufferSize { label: String, size: u64 },

    #[error("Unknown buffer {0:?}")]
    UnknownBuffer(BufferHandle),

    #[error("Write of {size} bytes at offset {offset} does not fit in a buffer of {buffer_size} bytes")]
    WriteOutOfBounds { offset: u64, size: u64, buffer_size: u64 },

    #[error("No graphics adapter available")]
    NoAdapter,

    #[error(transparent)]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error(transparent)]
    Gltf(#[from] gltf::Error),

    #[error("Invalid skeleton: {reason}")]
    InvalidSkeleton { reason: String },

    /// For importers that are not backed by the glTF loader.
    #[error("Failed to load '{path}': {message}")]
    LoadFailed { path: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnimationError {
    #[error("At most {max} animations can be added")]
    TooManyAnimations { max: usize },

    #[error("Animation {index} does not exist ({count} available)")]
    AnimationOutOfRange { index: usize, count: usize },

    #[error("Bone {index} does not exist ({count} bones)")]
    BoneOutOfRange { index: usize, count: usize },
}
