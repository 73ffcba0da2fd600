use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugSphere {
    pub center: Vec3,
    pub radius: f32,
    pub color: Vec3,
}

/// Debug shapes collected during a frame, rendered and cleared by the debug pass.
#[derive(Default)]
pub struct DebugRenderingManager {
    spheres: Vec<DebugSphere>,
}
impl DebugRenderingManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sphere(&mut self, center: Vec3, radius: f32, color: Vec3) {
        self.spheres.push(DebugSphere { center, radius, color });
    }

    pub fn spheres(&self) -> &[DebugSphere] {
        &self.spheres
    }

    pub fn clear(&mut self) {
        self.spheres.clear();
    }
}
