use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use glam::{Mat4, Quat, Vec3};
use gltf::{
    animation::{util::ReadOutputs, Interpolation},
    Document,
};

use super::{
    loader::{MeshInfo, ModelData},
    resource_manager::ModelImporter,
};
use crate::{
    error::ResourceError,
    skeleton::{AnimationData, Bone, Keyframe},
};

/// Imports `.gltf`/`.glb` files. The first skin becomes the skeleton and the first animation its keyframes.
#[derive(Default)]
pub struct GltfImporter;

impl ModelImporter for GltfImporter {
    fn import(&self, path: &str) -> Result<ModelData, ResourceError> {
        let (document, buffers, _images) = gltf::import(path)?;
        import_document(&document, &buffers)
    }
}

pub fn import_document(document: &Document, buffers: &[gltf::buffer::Data]) -> Result<ModelData, ResourceError> {
    Ok(ModelData {
        mesh: mesh_info(document),
        animation_data: import_skeleton(document, buffers)?,
    })
}

fn mesh_info(document: &Document) -> MeshInfo {
    let mut info = MeshInfo::default();
    for mesh in document.meshes() {
        for primitive in mesh.primitives() {
            info.primitive_count += 1;
            if let Some(positions) = primitive.get(&gltf::Semantic::Positions) {
                info.vertex_count += positions.count() as u32;
            }
            if let Some(indices) = primitive.indices() {
                info.index_count += indices.count() as u32;
            }
        }
    }
    info
}

struct Channel<T> {
    times: Vec<f32>,
    values: Vec<T>,
    interpolation: Interpolation,
}
impl<T: Copy> Channel<T> {
    fn new(times: Vec<f32>, values: Vec<T>, interpolation: Interpolation) -> Option<Self> {
        let values: Vec<T> = match interpolation {
            // in-tangent, value, out-tangent
            Interpolation::CubicSpline => values.chunks_exact(3).map(|c| c[1]).collect(),
            _ => values,
        };
        if times.is_empty() || times.len() != values.len() {
            return None;
        }
        Some(Self { times, values, interpolation })
    }

    fn sample(&self, t: f32, mix: impl Fn(T, T, f32) -> T) -> T {
        let (i0, i1) = keyframe_indices(&self.times, t);
        let (t0, t1) = (self.times[i0], self.times[i1]);
        let (v0, v1) = (self.values[i0], self.values[i1]);
        let alpha = if i0 == i1 || (t1 - t0).abs() < f32::EPSILON {
            0.0
        } else {
            (t - t0) / (t1 - t0)
        };
        match self.interpolation {
            Interpolation::Step => v0,
            _ => mix(v0, v1, alpha),
        }
    }
}

fn keyframe_indices(times: &[f32], val: f32) -> (usize, usize) {
    let n = times.len();
    if n <= 1 {
        return (0, 0);
    }

    match times.binary_search_by(|x| x.partial_cmp(&val).unwrap_or(Ordering::Greater)) {
        Ok(i) => (i, i),
        Err(0) => (0, 0),
        Err(i) if i >= n => (n - 1, n - 1),
        Err(i) => (i - 1, i),
    }
}

#[derive(Default)]
struct JointTracks {
    translation: Option<Channel<Vec3>>,
    rotation: Option<Channel<Quat>>,
    scale: Option<Channel<Vec3>>,
}
impl JointTracks {
    fn keyframe_times(&self) -> Vec<f32> {
        let mut times: Vec<f32> = self.translation.iter().flat_map(|c| c.times.iter().copied())
            .chain(self.rotation.iter().flat_map(|c| c.times.iter().copied()))
            .chain(self.scale.iter().flat_map(|c| c.times.iter().copied()))
            .collect();
        times.sort_by(|a, b| a.total_cmp(b));
        times.dedup_by(|a, b| (*a - *b).abs() < f32::EPSILON);
        times
    }

    fn keyframes(&self, rest: &Keyframe) -> Vec<Keyframe> {
        let times = self.keyframe_times();
        if times.is_empty() {
            return vec![*rest];
        }
        times
            .into_iter()
            .map(|t| Keyframe {
                time: t,
                translation: self.translation.as_ref().map_or(rest.translation, |c| c.sample(t, Vec3::lerp)),
                rotation: self.rotation.as_ref().map_or(rest.rotation, |c| c.sample(t, Quat::slerp)),
                scale: self.scale.as_ref().map_or(rest.scale, |c| c.sample(t, Vec3::lerp)),
            })
            .collect()
    }
}

fn read_joint_tracks(
    animation: &gltf::Animation,
    buffers: &[gltf::buffer::Data],
    joints: &HashSet<usize>,
) -> HashMap<usize, JointTracks> {
    let mut tracks = HashMap::<usize, JointTracks>::new();
    for channel in animation.channels() {
        let target = channel.target().node().index();
        if !joints.contains(&target) {
            continue;
        }
        let reader = channel.reader(|b| buffers.get(b.index()).map(|d| d.0.as_slice()));
        let Some(inputs) = reader.read_inputs() else {
            log::warn!("Animation channel targeting node {} has no input times", target);
            continue;
        };
        let times: Vec<f32> = inputs.collect();
        let interpolation = channel.sampler().interpolation();
        let entry = tracks.entry(target).or_default();
        match reader.read_outputs() {
            Some(ReadOutputs::Translations(values)) => {
                entry.translation = Channel::new(times, values.map(Vec3::from).collect(), interpolation);
            }
            Some(ReadOutputs::Rotations(values)) => {
                entry.rotation = Channel::new(times, values.into_f32().map(Quat::from_array).collect(), interpolation);
            }
            Some(ReadOutputs::Scales(values)) => {
                entry.scale = Channel::new(times, values.map(Vec3::from).collect(), interpolation);
            }
            Some(ReadOutputs::MorphTargetWeights(_)) | None => {}
        }
    }
    tracks
}

fn rest_keyframe(node: &gltf::Node) -> Keyframe {
    let (translation, rotation, scale) = node.transform().decomposed();
    Keyframe::new(0.0, Vec3::from(translation), Quat::from_array(rotation), Vec3::from(scale))
}

/// Nearest ancestor of every node that is itself a joint.
fn joint_parents(document: &Document, joints: &HashSet<usize>) -> HashMap<usize, usize> {
    let mut parent = HashMap::<usize, usize>::new();
    for node in document.nodes() {
        for child in node.children() {
            parent.insert(child.index(), node.index());
        }
    }

    let node_count = document.nodes().len();
    let mut joint_parent = HashMap::new();
    for &joint in joints {
        let mut current = joint;
        // bounded walk, malformed files may contain cycles
        for _ in 0..node_count {
            let Some(&p) = parent.get(&current) else { break };
            if joints.contains(&p) {
                joint_parent.insert(joint, p);
                break;
            }
            current = p;
        }
    }
    joint_parent
}

fn import_skeleton(document: &Document, buffers: &[gltf::buffer::Data]) -> Result<Option<AnimationData>, ResourceError> {
    let Some(skin) = document.skins().next() else {
        return Ok(None);
    };
    let joints: Vec<gltf::Node> = skin.joints().collect();
    if joints.is_empty() {
        return Ok(None);
    }

    let reader = skin.reader(|b| buffers.get(b.index()).map(|d| d.0.as_slice()));
    let inverse_bind_matrices: Vec<Mat4> = match reader.read_inverse_bind_matrices() {
        Some(matrices) => matrices.map(|m| Mat4::from_cols_array_2d(&m)).collect(),
        None => vec![Mat4::IDENTITY; joints.len()],
    };
    if inverse_bind_matrices.len() != joints.len() {
        return Err(ResourceError::InvalidSkeleton {
            reason: format!(
                "inverseBindMatrices count ({}) does not match joint count ({}) for skin {}",
                inverse_bind_matrices.len(),
                joints.len(),
                skin.index()
            ),
        });
    }

    let joint_set: HashSet<usize> = joints.iter().map(|j| j.index()).collect();
    let tracks = match document.animations().next() {
        Some(animation) => read_joint_tracks(&animation, buffers, &joint_set),
        None => HashMap::new(),
    };
    let joint_parent = joint_parents(document, &joint_set);

    // bone index is the position in the skin's joint list, which is what JOINTS_0 refers to
    let mut bones: HashMap<usize, Bone> = HashMap::new();
    for (index, (joint, ibm)) in joints.iter().zip(inverse_bind_matrices.iter()).enumerate() {
        let name = joint.name().map(str::to_string).unwrap_or_else(|| format!("joint_{}", index));
        let rest = rest_keyframe(joint);
        let poses = tracks.get(&joint.index()).map_or_else(|| vec![rest], |t| t.keyframes(&rest));
        bones.insert(joint.index(), Bone::new(name, index as u32, *ibm).with_poses(poses));
    }

    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();
    for joint in &joints {
        match joint_parent.get(&joint.index()) {
            Some(&p) => children.entry(p).or_default().push(joint.index()),
            None => roots.push(joint.index()),
        }
    }

    let root_bones: Vec<Bone> = roots
        .into_iter()
        .filter_map(|root| assemble(root, &mut bones, &children))
        .collect();
    let animation_data = AnimationData::new(joints.len() as u32, root_bones);
    animation_data.validate()?;
    log::debug!(
        "Imported skeleton with {} bones, animation length {}s",
        animation_data.bone_count,
        animation_data.max_timer()
    );
    Ok(Some(animation_data))
}

fn assemble(node: usize, bones: &mut HashMap<usize, Bone>, children: &HashMap<usize, Vec<usize>>) -> Option<Bone> {
    let mut bone = bones.remove(&node)?;
    for &child in children.get(&node).map(Vec::as_slice).unwrap_or_default() {
        if let Some(child_bone) = assemble(child, bones, children) {
            bone.children.push(child_bone);
        }
    }
    Some(bone)
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::assert_relative_eq;

    use super::*;

    const SKINNED: &str = r#"{
        "asset": { "version": "2.0" },
        "buffers": [{ "byteLength": 168 }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 128 },
            { "buffer": 0, "byteOffset": 128, "byteLength": 8 },
            { "buffer": 0, "byteOffset": 136, "byteLength": 32 }
        ],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 2, "type": "MAT4" },
            { "bufferView": 1, "componentType": 5126, "count": 2, "type": "SCALAR", "min": [0.0], "max": [1.0] },
            { "bufferView": 2, "componentType": 5126, "count": 2, "type": "VEC4" }
        ],
        "nodes": [
            { "name": "root", "children": [1] },
            { "name": "child", "translation": [0.0, 1.0, 0.0] }
        ],
        "skins": [{ "joints": [0, 1], "inverseBindMatrices": 0 }],
        "animations": [{
            "channels": [{ "sampler": 0, "target": { "node": 1, "path": "rotation" } }],
            "samplers": [{ "input": 1, "output": 2, "interpolation": "LINEAR" }]
        }],
        "scenes": [{ "nodes": [0] }]
    }"#;

    fn skinned_buffer() -> gltf::buffer::Data {
        let quarter_turn = Quat::from_rotation_z(FRAC_PI_2);
        let mut floats: Vec<f32> = Vec::new();
        floats.extend_from_slice(&Mat4::IDENTITY.to_cols_array());
        floats.extend_from_slice(&Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0)).to_cols_array());
        floats.extend_from_slice(&[0.0, 1.0]);
        floats.extend_from_slice(&Quat::IDENTITY.to_array());
        floats.extend_from_slice(&quarter_turn.to_array());
        gltf::buffer::Data(bytemuck::cast_slice(&floats).to_vec())
    }

    #[test]
    fn imports_first_skin_and_animation() {
        let gltf = gltf::Gltf::from_slice(SKINNED.as_bytes()).unwrap();
        let model = import_document(&gltf.document, &[skinned_buffer()]).unwrap();
        let data = model.animation_data.unwrap();

        assert_eq!(data.bone_count, 2);
        assert_eq!(data.max_timer(), 1.0);
        assert_eq!(
            data.bone_names_and_indices(),
            vec![("root".to_string(), 0), ("child".to_string(), 1)]
        );

        let root = &data.root_bones[0];
        assert_eq!(root.poses.len(), 1);
        let child = &root.children[0];
        assert_eq!(child.offset_matrix, Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0)));
        assert_eq!(child.poses.len(), 2);
        // translation falls back to the rest pose
        assert_eq!(child.poses[1].translation, Vec3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(child.poses[1].rotation, Quat::from_rotation_z(FRAC_PI_2), epsilon = 1e-6);
    }

    #[test]
    fn document_without_skin_has_no_animation() {
        let gltf = gltf::Gltf::from_slice(br#"{ "asset": { "version": "2.0" } }"#).unwrap();
        let model = import_document(&gltf.document, &[]).unwrap();

        assert!(model.animation_data.is_none());
        assert_eq!(model.mesh, MeshInfo::default());
    }

    #[test]
    fn keyframe_indices_clamp_and_bracket() {
        let times = [0.0, 1.0, 2.0];
        assert_eq!(keyframe_indices(&times, -1.0), (0, 0));
        assert_eq!(keyframe_indices(&times, 1.0), (1, 1));
        assert_eq!(keyframe_indices(&times, 1.5), (1, 2));
        assert_eq!(keyframe_indices(&times, 3.0), (2, 2));
        assert_eq!(keyframe_indices(&[], 3.0), (0, 0));
    }

    #[test]
    fn cubic_spline_keeps_values_only() {
        let channel = Channel::new(
            vec![0.0, 1.0],
            vec![Vec3::ZERO, Vec3::X, Vec3::ZERO, Vec3::ZERO, Vec3::Y, Vec3::ZERO],
            Interpolation::CubicSpline,
        )
        .unwrap();
        assert_eq!(channel.values, vec![Vec3::X, Vec3::Y]);
        assert_relative_eq!(channel.sample(0.5, Vec3::lerp), Vec3::new(0.5, 0.5, 0.0));
    }
}
