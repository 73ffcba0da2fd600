use std::collections::HashSet;

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::ResourceError;

/// Local transform of a bone at one point on the clip timeline.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}
impl Keyframe {
    pub fn new(time: f32, translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self { time, translation, rotation, scale }
    }

    pub fn from_translation(time: f32, translation: Vec3) -> Self {
        Self::new(time, translation, Quat::IDENTITY, Vec3::ONE)
    }

    pub fn from_rotation(time: f32, rotation: Quat) -> Self {
        Self::new(time, Vec3::ZERO, rotation, Vec3::ONE)
    }
}

/// Node of the skeleton tree. Children are owned, there is no link back to the parent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    /// slot in the flat bone matrix array, assigned at import time
    pub index: u32,
    /// inverse bind pose
    pub offset_matrix: Mat4,
    /// ascending by time, empty for bones that only follow their parent
    pub poses: Vec<Keyframe>,
    pub children: Vec<Bone>,
}
impl Bone {
    pub fn new(name: impl Into<String>, index: u32, offset_matrix: Mat4) -> Self {
        Self {
            name: name.into(),
            index,
            offset_matrix,
            poses: vec![],
            children: vec![],
        }
    }

    pub fn with_poses(mut self, poses: Vec<Keyframe>) -> Self {
        self.poses = poses;
        self
    }

    pub fn with_child(mut self, child: Bone) -> Self {
        self.children.push(child);
        self
    }

    pub fn last_pose_time(&self) -> Option<f32> {
        self.poses.last().map(|pose| pose.time)
    }
}

/// Skeleton and keyframes of one loaded model or animation file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnimationData {
    pub bone_count: u32,
    pub root_bones: Vec<Bone>,
}
impl AnimationData {
    pub fn new(bone_count: u32, root_bones: Vec<Bone>) -> Self {
        Self { bone_count, root_bones }
    }

    /// Depth-first, parents before children.
    pub fn visit_pre_order<F: FnMut(&Bone)>(&self, mut f: F) {
        fn visit<F: FnMut(&Bone)>(bone: &Bone, f: &mut F) {
            f(bone);
            for child in &bone.children {
                visit(child, f);
            }
        }
        for root in &self.root_bones {
            visit(root, &mut f);
        }
    }

    /// Latest keyframe time over the whole tree, 0 when nothing is animated.
    pub fn max_timer(&self) -> f32 {
        let mut max_timer = 0.0;
        for root in &self.root_bones {
            find_max_timer(root, &mut max_timer);
        }
        max_timer
    }

    pub fn bone_names_and_indices(&self) -> Vec<(String, u32)> {
        let mut out = Vec::with_capacity(self.bone_count as usize);
        self.visit_pre_order(|bone| out.push((bone.name.clone(), bone.index)));
        out
    }

    /// Checks that every bone index is unique and addresses a slot below `bone_count`.
    pub fn validate(&self) -> Result<(), ResourceError> {
        let mut seen = HashSet::new();
        let mut problem = None;
        self.visit_pre_order(|bone| {
            if problem.is_some() {
                return;
            }
            if bone.index >= self.bone_count {
                problem = Some(format!("bone '{}' has index {} but the skeleton only has {} bones", bone.name, bone.index, self.bone_count));
            } else if !seen.insert(bone.index) {
                problem = Some(format!("bone '{}' reuses index {}", bone.name, bone.index));
            }
        });
        match problem {
            Some(reason) => Err(ResourceError::InvalidSkeleton { reason }),
            None => Ok(()),
        }
    }
}

pub fn find_max_timer(bone: &Bone, max_timer: &mut f32) {
    if let Some(last) = bone.last_pose_time() {
        if last > *max_timer {
            *max_timer = last;
        }
    }

    for child in &bone.children {
        find_max_timer(child, max_timer);
    }
}
