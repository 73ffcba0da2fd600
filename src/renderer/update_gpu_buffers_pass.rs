use super::gpu::{GpuBufferWriter, UploadQueue};

/// Applies every pending [`super::gpu::UploadRequest`] once per frame, before submission.
#[derive(Default)]
pub struct UpdateGpuBuffersPass {
    uploaded_bytes: u64,
    failed_requests: u32,
}
impl UpdateGpuBuffersPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many requests were written.
    pub fn execute(&mut self, queue: &UploadQueue, writer: &mut dyn GpuBufferWriter) -> usize {
        let mut written = 0;
        while let Some(request) = queue.pop() {
            match writer.write_buffer(request.target, request.offset, &request.data) {
                Ok(()) => {
                    self.uploaded_bytes += request.size();
                    written += 1;
                }
                Err(e) => {
                    // target may have been released while the request was queued
                    log::error!("Dropping buffer upload of {} bytes: {}", request.size(), e);
                    self.failed_requests += 1;
                }
            }
        }
        written
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    pub fn failed_requests(&self) -> u32 {
        self.failed_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{
        gpu::{GraphicsResourceFactory, UploadRequest},
        host_backend::HostBackend,
    };

    #[test]
    fn drains_requests_in_order() {
        let mut backend = HostBackend::new();
        let buffer = backend.create_storage_buffer("Bones SSBO", 8).unwrap();
        let queue = UploadQueue::new();
        queue.enqueue(UploadRequest { data: vec![1; 8], target: buffer, offset: 0 });
        queue.enqueue(UploadRequest { data: vec![2; 4], target: buffer, offset: 4 });

        let mut pass = UpdateGpuBuffersPass::new();
        assert_eq!(pass.execute(&queue, &mut backend), 2);

        assert!(queue.is_empty());
        assert_eq!(backend.buffer_data(buffer).unwrap(), &[1, 1, 1, 1, 2, 2, 2, 2]);
        assert_eq!(pass.uploaded_bytes(), 12);
    }

    #[test]
    fn failed_writes_are_dropped() {
        let mut backend = HostBackend::new();
        let buffer = backend.create_storage_buffer("Bones SSBO", 4).unwrap();
        backend.destroy_buffer(buffer);

        let queue = UploadQueue::new();
        queue.enqueue(UploadRequest { data: vec![0; 4], target: buffer, offset: 0 });

        let mut pass = UpdateGpuBuffersPass::new();
        assert_eq!(pass.execute(&queue, &mut backend), 0);
        assert!(queue.is_empty());
        assert_eq!(pass.failed_requests(), 1);
    }
}
