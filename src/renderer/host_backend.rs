use generational_arena::Arena;
use glam::Mat4;

use super::gpu::{BufferHandle, DescriptorSetHandle, GpuBufferWriter, GraphicsResourceFactory, BONES_BINDING};
use crate::error::GraphicsError;

struct HostBuffer {
    label: String,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostDescriptorSet {
    pub buffer: BufferHandle,
    pub binding: u32,
}

/// Keeps "GPU" buffers in host memory. Used headless and as the device stand-in in tests.
#[derive(Default)]
pub struct HostBackend {
    buffers: Arena<HostBuffer>,
    descriptor_sets: Arena<HostDescriptorSet>,
}
impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(buffer.0).map(|b| b.data.as_slice())
    }

    pub fn buffer_label(&self, buffer: BufferHandle) -> Option<&str> {
        self.buffers.get(buffer.0).map(|b| b.label.as_str())
    }

    /// Reads the buffer back as bone matrices.
    pub fn read_matrices(&self, buffer: BufferHandle) -> Option<Vec<Mat4>> {
        let data = self.buffer_data(buffer)?;
        Some(
            data.chunks_exact(std::mem::size_of::<Mat4>())
                .map(bytemuck::pod_read_unaligned::<Mat4>)
                .collect(),
        )
    }

    pub fn descriptor_set(&self, descriptor_set: DescriptorSetHandle) -> Option<&HostDescriptorSet> {
        self.descriptor_sets.get(descriptor_set.0)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn descriptor_set_count(&self) -> usize {
        self.descriptor_sets.len()
    }
}

impl GraphicsResourceFactory for HostBackend {
    fn create_storage_buffer(&mut self, label: &str, size: u64) -> Result<BufferHandle, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::InvalidBufferSize { label: label.to_string(), size });
        }
        let idx = self.buffers.insert(HostBuffer {
            label: label.to_string(),
            data: vec![0u8; size as usize],
        });
        Ok(BufferHandle(idx))
    }

    fn create_bones_descriptor_set(&mut self, buffer: BufferHandle) -> Result<DescriptorSetHandle, GraphicsError> {
        if !self.buffers.contains(buffer.0) {
            return Err(GraphicsError::UnknownBuffer(buffer));
        }
        let idx = self.descriptor_sets.insert(HostDescriptorSet { buffer, binding: BONES_BINDING });
        Ok(DescriptorSetHandle(idx))
    }

    fn destroy_descriptor_set(&mut self, descriptor_set: DescriptorSetHandle) {
        self.descriptor_sets.remove(descriptor_set.0);
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(buffer.0);
    }
}

impl GpuBufferWriter for HostBackend {
    fn write_buffer(&mut self, target: BufferHandle, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let buffer = self.buffers.get_mut(target.0).ok_or(GraphicsError::UnknownBuffer(target))?;
        let buffer_size = buffer.data.len() as u64;
        let size = data.len() as u64;
        if offset + size > buffer_size {
            return Err(GraphicsError::WriteOutOfBounds { offset, size, buffer_size });
        }
        let start = offset as usize;
        buffer.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    #[test]
    fn descriptor_set_binds_buffer_at_bones_slot() {
        let mut backend = HostBackend::new();
        let buffer = backend.create_storage_buffer("Bones SSBO", 128).unwrap();
        let set = backend.create_bones_descriptor_set(buffer).unwrap();

        assert_eq!(backend.buffer_data(buffer).unwrap().len(), 128);
        assert_eq!(backend.descriptor_set(set), Some(&HostDescriptorSet { buffer, binding: BONES_BINDING }));
    }

    #[test]
    fn writes_are_bounds_checked() {
        let mut backend = HostBackend::new();
        let buffer = backend.create_storage_buffer("Bones SSBO", 64).unwrap();

        let matrix = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        backend.write_buffer(buffer, 0, bytemuck::bytes_of(&matrix)).unwrap();
        assert_eq!(backend.read_matrices(buffer).unwrap(), vec![matrix]);

        let err = backend.write_buffer(buffer, 16, bytemuck::bytes_of(&matrix)).unwrap_err();
        assert!(matches!(err, GraphicsError::WriteOutOfBounds { offset: 16, size: 64, buffer_size: 64 }));
    }

    #[test]
    fn destroyed_buffers_reject_writes() {
        let mut backend = HostBackend::new();
        let buffer = backend.create_storage_buffer("Bones SSBO", 64).unwrap();
        backend.destroy_buffer(buffer);

        assert_eq!(backend.buffer_count(), 0);
        assert!(matches!(backend.write_buffer(buffer, 0, &[0; 4]), Err(GraphicsError::UnknownBuffer(_))));
        assert!(backend.create_storage_buffer("empty", 0).is_err());
    }
}
