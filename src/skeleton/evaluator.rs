use glam::{Mat4, Vec3, Vec4};

use super::{bone::Bone, pose_sampler};

/// Per-bone skinning matrix, laid out the way the vertex shader reads the bones storage buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BoneInfoGpu {
    pub transform: Mat4,
}
impl Default for BoneInfoGpu {
    fn default() -> Self {
        Self { transform: Mat4::IDENTITY }
    }
}

/// World-space pivot of a bone, kept on the CPU for debug drawing and bone queries.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BoneInfoCpu {
    pub position: Vec3,
}

/// Both output arrays of a skeleton, sized once to the bone count and rewritten every frame.
#[derive(Debug, Default, Clone)]
pub struct EvaluationOutput {
    pub bones_gpu: Vec<BoneInfoGpu>,
    pub bones_cpu: Vec<BoneInfoCpu>,
}
impl EvaluationOutput {
    pub fn new(bone_count: u32) -> Self {
        Self {
            bones_gpu: vec![BoneInfoGpu::default(); bone_count as usize],
            bones_cpu: vec![BoneInfoCpu::default(); bone_count as usize],
        }
    }

    pub fn bone_count(&self) -> u32 {
        self.bones_gpu.len() as u32
    }

    pub fn reset_to_identity(&mut self) {
        for bone_info in &mut self.bones_gpu {
            bone_info.transform = Mat4::IDENTITY;
        }
    }

    pub fn clear_positions(&mut self) {
        for bone_info in &mut self.bones_cpu {
            bone_info.position = Vec3::ZERO;
        }
    }

    pub fn gpu_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.bones_gpu)
    }

    pub fn evaluate(&mut self, root_bones: &[Bone], time: f32, model_transform: &Mat4) {
        evaluate(root_bones, time, model_transform, &mut self.bones_gpu, &mut self.bones_cpu);
    }
}

/// Poses every tree in `root_bones` at `time`. Outputs are addressed by `Bone::index`.
pub fn evaluate(
    root_bones: &[Bone],
    time: f32,
    model_transform: &Mat4,
    out_gpu: &mut [BoneInfoGpu],
    out_cpu: &mut [BoneInfoCpu],
) {
    for root in root_bones {
        evaluate_bone(root, Mat4::IDENTITY, time, model_transform, out_gpu, out_cpu);
    }
}

fn evaluate_bone(
    bone: &Bone,
    parent_transform: Mat4,
    time: f32,
    model_transform: &Mat4,
    out_gpu: &mut [BoneInfoGpu],
    out_cpu: &mut [BoneInfoCpu],
) {
    let current_transform = parent_transform * pose_sampler::sample(bone, time);
    let idx = bone.index as usize;
    let skinning = current_transform * bone.offset_matrix;
    out_gpu[idx].transform = skinning;

    // fixed corner of the bone's local space, not its true origin
    let offset = (bone.offset_matrix.inverse() * Vec4::ONE).truncate();
    out_cpu[idx].position = (*model_transform * (skinning * offset.extend(1.0))).truncate();

    for child in &bone.children {
        evaluate_bone(child, current_transform, time, model_transform, out_gpu, out_cpu);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use glam::Quat;

    use super::*;
    use crate::skeleton::bone::Keyframe;

    #[test]
    fn child_accumulates_parent_transform() {
        let child = Bone::new("child", 1, Mat4::IDENTITY).with_poses(vec![Keyframe::from_translation(0.0, Vec3::new(1.0, 0.0, 0.0))]);
        let root = Bone::new("root", 0, Mat4::IDENTITY).with_child(child);

        let mut output = EvaluationOutput::new(2);
        output.evaluate(&[root], 0.42, &Mat4::IDENTITY);

        assert_eq!(output.bones_gpu[0].transform, Mat4::IDENTITY);
        assert_abs_diff_eq!(output.bones_gpu[1].transform, Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)), epsilon = 1e-6);
    }

    #[test]
    fn outputs_are_addressed_by_bone_index() {
        // pre-order visits 2, 0, 1 but slots are written by index
        let root = Bone::new("root", 2, Mat4::IDENTITY)
            .with_poses(vec![Keyframe::from_translation(0.0, Vec3::Y)])
            .with_child(Bone::new("first", 0, Mat4::IDENTITY).with_poses(vec![Keyframe::from_translation(0.0, Vec3::X)]))
            .with_child(Bone::new("second", 1, Mat4::IDENTITY).with_poses(vec![Keyframe::from_translation(0.0, Vec3::Z)]));

        let mut output = EvaluationOutput::new(3);
        output.evaluate(&[root], 0.0, &Mat4::IDENTITY);

        assert_abs_diff_eq!(output.bones_gpu[2].transform, Mat4::from_translation(Vec3::Y), epsilon = 1e-6);
        assert_abs_diff_eq!(output.bones_gpu[0].transform, Mat4::from_translation(Vec3::new(1.0, 1.0, 0.0)), epsilon = 1e-6);
        assert_abs_diff_eq!(output.bones_gpu[1].transform, Mat4::from_translation(Vec3::new(0.0, 1.0, 1.0)), epsilon = 1e-6);

        assert_abs_diff_eq!(output.bones_cpu[2].position, Vec3::new(1.0, 2.0, 1.0), epsilon = 1e-6);
        assert_abs_diff_eq!(output.bones_cpu[0].position, Vec3::new(2.0, 2.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn offset_matrix_is_applied_after_pose() {
        let bind = Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0));
        let bone = Bone::new("bone", 0, bind.inverse())
            .with_poses(vec![Keyframe::new(0.0, Vec3::new(0.0, 2.0, 0.0), Quat::from_rotation_z(0.5), Vec3::ONE)]);

        let mut output = EvaluationOutput::new(1);
        output.evaluate(&[bone], 0.0, &Mat4::IDENTITY);

        let expected = Mat4::from_rotation_translation(Quat::from_rotation_z(0.5), Vec3::new(0.0, 2.0, 0.0)) * bind.inverse();
        assert_abs_diff_eq!(output.bones_gpu[0].transform, expected, epsilon = 1e-5);
    }

    #[test]
    fn positions_include_model_transform() {
        let bone = Bone::new("bone", 0, Mat4::IDENTITY);
        let model = Mat4::from_translation(Vec3::new(10.0, 0.0, -5.0));

        let mut output = EvaluationOutput::new(1);
        output.evaluate(&[bone], 0.0, &model);

        assert_abs_diff_eq!(output.bones_cpu[0].position, Vec3::new(11.0, 1.0, -4.0), epsilon = 1e-6);
    }

    #[test]
    fn every_root_is_evaluated() {
        let a = Bone::new("a", 0, Mat4::IDENTITY).with_poses(vec![Keyframe::from_translation(0.0, Vec3::X)]);
        let b = Bone::new("b", 1, Mat4::IDENTITY).with_poses(vec![Keyframe::from_translation(0.0, Vec3::Z)]);

        let mut output = EvaluationOutput::new(2);
        output.evaluate(&[a, b], 0.0, &Mat4::IDENTITY);

        assert_abs_diff_eq!(output.bones_gpu[1].transform, Mat4::from_translation(Vec3::Z), epsilon = 1e-6);
    }

    #[test]
    fn identity_reset_and_gpu_layout() {
        let mut output = EvaluationOutput::new(3);
        output.bones_gpu[1].transform = Mat4::from_translation(Vec3::ONE);
        output.reset_to_identity();

        assert!(output.bones_gpu.iter().all(|b| b.transform == Mat4::IDENTITY));
        assert_eq!(output.gpu_bytes().len(), 3 * 64);
    }
}
