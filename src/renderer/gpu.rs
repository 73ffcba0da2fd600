use crossbeam_queue::SegQueue;
use generational_arena::Index;

use crate::error::GraphicsError;

/// Binding slot of the bones storage buffer in its descriptor set.
pub const BONES_BINDING: u32 = 0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) Index);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSetHandle(pub(crate) Index);

/// Creates and destroys the GPU objects backing a skeleton.
pub trait GraphicsResourceFactory {
    /// Device-local storage buffer that can be written by uploads.
    fn create_storage_buffer(&mut self, label: &str, size: u64) -> Result<BufferHandle, GraphicsError>;
    /// Descriptor set exposing `buffer` to the vertex stage at [`BONES_BINDING`].
    fn create_bones_descriptor_set(&mut self, buffer: BufferHandle) -> Result<DescriptorSetHandle, GraphicsError>;
    fn destroy_descriptor_set(&mut self, descriptor_set: DescriptorSetHandle);
    fn destroy_buffer(&mut self, buffer: BufferHandle);
}

/// Consumer side of [`UploadRequest`]s.
pub trait GpuBufferWriter {
    fn write_buffer(&mut self, target: BufferHandle, offset: u64, data: &[u8]) -> Result<(), GraphicsError>;
}

pub struct UploadRequest {
    pub data: Vec<u8>,
    pub target: BufferHandle,
    pub offset: u64,
}
impl UploadRequest {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Fire-and-forget buffer updates, filled during the frame update and drained by
/// [`super::update_gpu_buffers_pass::UpdateGpuBuffersPass`].
#[derive(Default)]
pub struct UploadQueue {
    requests: SegQueue<UploadRequest>,
}
impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, request: UploadRequest) {
        self.requests.push(request);
    }

    pub fn pop(&self) -> Option<UploadRequest> {
        self.requests.pop()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
