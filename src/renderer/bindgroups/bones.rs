use generational_arena::Arena;
use pollster::FutureExt as _;

use crate::{
    error::GraphicsError,
    renderer::gpu::{BufferHandle, DescriptorSetHandle, GpuBufferWriter, GraphicsResourceFactory, BONES_BINDING},
};

/// Bones storage buffers and their bind groups on a wgpu device.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: wgpu::BindGroupLayout,
    buffers: Arena<wgpu::Buffer>,
    bind_groups: Arena<wgpu::BindGroup>,
}
impl WgpuBackend {
    pub fn desc() -> wgpu::BindGroupLayoutDescriptor<'static> {
        wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: BONES_BINDING,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
            label: Some("Bones Bind Group Layout"),
        }
    }

    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let layout = device.create_bind_group_layout(&Self::desc());
        Self {
            device,
            queue,
            layout,
            buffers: Arena::new(),
            bind_groups: Arena::new(),
        }
    }

    /// Opens a device without a surface, for offline evaluation.
    pub fn request_headless() -> Result<Self, GraphicsError> {
        async {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::default(),
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or(GraphicsError::NoAdapter)?;
            let (device, queue) = adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("Bones device"),
                        required_features: wgpu::Features::empty(),
                        required_limits: wgpu::Limits::downlevel_defaults(),
                    },
                    None,
                )
                .await?;
            log::info!("Using adapter {}", adapter.get_info().name);
            Ok::<Self, GraphicsError>(Self::new(device, queue))
        }
        .block_on()
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn bind_group(&self, descriptor_set: DescriptorSetHandle) -> Option<&wgpu::BindGroup> {
        self.bind_groups.get(descriptor_set.0)
    }

    /// Waits until queued writes reached the device.
    pub fn flush(&self) {
        self.queue.submit(std::iter::empty());
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }

    fn create_bind_group(&self, buffer: &wgpu::Buffer) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bones Bind Group"),
            layout: &self.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: BONES_BINDING,
                resource: buffer.as_entire_binding(),
            }],
        })
    }
}

impl GraphicsResourceFactory for WgpuBackend {
    fn create_storage_buffer(&mut self, label: &str, size: u64) -> Result<BufferHandle, GraphicsError> {
        if size == 0 || size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(GraphicsError::InvalidBufferSize { label: label.to_string(), size });
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(BufferHandle(self.buffers.insert(buffer)))
    }

    fn create_bones_descriptor_set(&mut self, buffer: BufferHandle) -> Result<DescriptorSetHandle, GraphicsError> {
        let storage_buffer = self.buffers.get(buffer.0).ok_or(GraphicsError::UnknownBuffer(buffer))?;
        let bind_group = self.create_bind_group(storage_buffer);
        Ok(DescriptorSetHandle(self.bind_groups.insert(bind_group)))
    }

    fn destroy_descriptor_set(&mut self, descriptor_set: DescriptorSetHandle) {
        self.bind_groups.remove(descriptor_set.0);
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(storage_buffer) = self.buffers.remove(buffer.0) {
            storage_buffer.destroy();
        }
    }
}

impl GpuBufferWriter for WgpuBackend {
    fn write_buffer(&mut self, target: BufferHandle, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let buffer = self.buffers.get(target.0).ok_or(GraphicsError::UnknownBuffer(target))?;
        let size = data.len() as u64;
        if offset + size > buffer.size() {
            return Err(GraphicsError::WriteOutOfBounds { offset, size, buffer_size: buffer.size() });
        }
        self.queue.write_buffer(buffer, offset, data);
        Ok(())
    }
}
