use glam::Mat4;

use super::bone::{Bone, Keyframe};

/// Finds the keyframe pair bracketing `time`. Returns the index of the second keyframe and
/// the blend factor between it and its predecessor.
///
/// Past the last keyframe the first segment is used with a blend factor of 0, callers wrap
/// `time` into the clip range beforehand.
fn find_segment(poses: &[Keyframe], time: f32) -> (usize, f32) {
    for pose_idx in 1..poses.len() {
        if time < poses[pose_idx].time {
            let prev = &poses[pose_idx - 1];
            let lerp_value = (time - prev.time) / (poses[pose_idx].time - prev.time);
            return (pose_idx, lerp_value);
        }
    }
    (1, 0.0)
}

/// Interpolated local transform (translate * rotate * scale) of `bone` at `time`.
pub fn sample(bone: &Bone, time: f32) -> Mat4 {
    let poses = &bone.poses;
    match poses.len() {
        0 => return Mat4::IDENTITY,
        1 => {
            let pose = &poses[0];
            return Mat4::from_scale_rotation_translation(pose.scale, pose.rotation, pose.translation);
        }
        _ => {}
    }

    let (pose_idx, mut lerp_value) = find_segment(poses, time);
    if !(0.0..=1.0).contains(&lerp_value) {
        log::error!("Wrong lerp value {} for bone '{}' at time {}", lerp_value, bone.name, time);
        lerp_value = lerp_value.clamp(0.0, 1.0);
    }

    let from = &poses[pose_idx - 1];
    let to = &poses[pose_idx];
    let translation = from.translation.lerp(to.translation, lerp_value);
    let rotation = from.rotation.slerp(to.rotation, lerp_value);
    let scale = from.scale.lerp(to.scale, lerp_value);

    Mat4::from_scale_rotation_translation(scale, rotation, translation)
}
