pub mod bone;
pub mod pose_sampler;
pub mod evaluator;

pub use bone::{AnimationData, Bone, Keyframe};
pub use evaluator::{evaluate, BoneInfoCpu, BoneInfoGpu, EvaluationOutput};
