pub mod bindgroups;
pub mod debug_draw;
pub mod gpu;
pub mod host_backend;
pub mod update_gpu_buffers_pass;
