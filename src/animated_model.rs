use std::{cell::RefCell, rc::Rc, sync::Arc, time::Duration};

use glam::{Mat4, Vec3};

use crate::{
    error::{AnimationError, GraphicsError},
    params::{AnimatedModelParams, AnimationEntry, DEFAULT_LOAD_GRACE_FRAMES},
    renderer::{
        debug_draw::DebugRenderingManager,
        gpu::{BufferHandle, DescriptorSetHandle, GraphicsResourceFactory, UploadQueue, UploadRequest},
    },
    resource_manager::{MeshResourceLoader, ModelData, ResourceId},
    skeleton::{BoneInfoGpu, EvaluationOutput},
};

pub const MAX_ANIMATIONS: usize = 8;
pub const DEBUG_SPHERE_RADIUS: f32 = 0.05;
pub const DEFAULT_ANIMATION_NAME: &str = "Default";

const HIGHLIGHT_COLOR: Vec3 = Vec3::new(1.0, 0.0, 0.0);
const BONE_COLOR: Vec3 = Vec3::ONE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    /// Polls the loader once `frames_remaining` reaches zero. The countdown is a grace period for
    /// in-flight bone uploads, it does not prove the previous buffer is idle.
    WaitingForLoad { frames_remaining: u32 },
    Ready,
}

#[derive(Debug, Clone)]
struct AnimationClip {
    name: String,
    file: String,
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Clone, Copy)]
struct BoneResources {
    buffer: BufferHandle,
    descriptor_set: DescriptorSetHandle,
}

/// What the draw manager needs to render the skinned mesh this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshToRender {
    pub mesh: ResourceId,
    /// None for meshes without a skeleton
    pub bones: Option<DescriptorSetHandle>,
    pub transform: Mat4,
}

/// Position on the clip timeline in seconds. The global time is read at millisecond precision.
pub fn wrap_timer(global_time: Duration, max_timer: f32) -> f32 {
    if max_timer <= 0.0 {
        return 0.0;
    }
    let timer = global_time.as_millis() as f32 / 1000.0;
    timer % max_timer
}

/// Skinned model component. Connects asynchronous mesh loading to per-frame skeleton evaluation
/// and the upload of the bone matrices.
pub struct AnimatedModel {
    loader: Rc<RefCell<dyn MeshResourceLoader>>,
    graphics: Rc<RefCell<dyn GraphicsResourceFactory>>,
    uploads: Arc<UploadQueue>,

    state: LifecycleState,
    mesh_path: String,
    mesh_resource: Option<ResourceId>,
    bone_resources: Option<BoneResources>,
    output: EvaluationOutput,
    bone_names_and_indices: Vec<(String, u32)>,
    transform: Mat4,

    animations: Vec<AnimationClip>,
    animation_select: usize,
    max_timer: f32,
    update_max_timer_requested: bool,
    reload_requested: bool,

    force_timer: Option<f32>,
    force_t_pose: bool,
    show_bones: bool,
    highlight_bone: usize,
    hide_model: bool,
    load_grace_frames: u32,
}

impl AnimatedModel {
    pub fn new(
        loader: Rc<RefCell<dyn MeshResourceLoader>>,
        graphics: Rc<RefCell<dyn GraphicsResourceFactory>>,
        uploads: Arc<UploadQueue>,
    ) -> Self {
        Self {
            loader,
            graphics,
            uploads,
            state: LifecycleState::Idle,
            mesh_path: String::new(),
            mesh_resource: None,
            bone_resources: None,
            output: EvaluationOutput::default(),
            bone_names_and_indices: vec![],
            transform: Mat4::IDENTITY,
            animations: vec![],
            animation_select: 0,
            max_timer: 0.0,
            update_max_timer_requested: false,
            reload_requested: false,
            force_timer: None,
            force_t_pose: false,
            show_bones: false,
            highlight_bone: 0,
            hide_model: false,
            load_grace_frames: DEFAULT_LOAD_GRACE_FRAMES,
        }
    }

    /// Starts loading `path`. A request still waiting for its mesh is abandoned.
    pub fn request_model_loading(&mut self, path: &str) {
        if path.is_empty() {
            return;
        }
        self.mesh_path = path.to_string();
        let mut loader = self.loader.borrow_mut();
        if let Some(previous) = self.mesh_resource.replace(loader.add_model(path)) {
            loader.release_model(previous);
        }
        drop(loader);
        self.output.clear_positions();
        self.bone_names_and_indices.clear();
        self.state = LifecycleState::WaitingForLoad { frames_remaining: self.load_grace_frames.max(1) };
        log::debug!("Waiting for mesh {}", path);
    }

    /// Advances the component by one frame. `global_time` is the time since the application started.
    pub fn update_before_frame(&mut self, global_time: Duration) {
        match self.state {
            LifecycleState::Idle => {}
            LifecycleState::WaitingForLoad { frames_remaining } => self.poll_mesh_loading(frames_remaining),
            LifecycleState::Ready => self.update_animation(global_time),
        }
    }

    fn poll_mesh_loading(&mut self, frames_remaining: u32) {
        let frames_remaining = frames_remaining.saturating_sub(1);
        if frames_remaining > 0 {
            self.state = LifecycleState::WaitingForLoad { frames_remaining };
            return;
        }

        let Some(model) = self.loaded_mesh_data() else {
            self.state = LifecycleState::WaitingForLoad { frames_remaining: 1 };
            return;
        };
        match self.on_mesh_loaded(&model) {
            Ok(()) => {
                log::debug!("Mesh {} ready with {} bones", self.mesh_path, self.output.bone_count());
                self.state = LifecycleState::Ready;
            }
            Err(e) => {
                log::error!("Failed to create bone resources for {}: {}", self.mesh_path, e);
                self.state = LifecycleState::WaitingForLoad { frames_remaining: 1 };
            }
        }
    }

    fn on_mesh_loaded(&mut self, model: &ModelData) -> Result<(), GraphicsError> {
        self.release_bone_resources();

        match model.animation_data.as_ref().filter(|data| data.bone_count > 0) {
            Some(data) => {
                let size = data.bone_count as u64 * std::mem::size_of::<BoneInfoGpu>() as u64;
                let mut graphics = self.graphics.borrow_mut();
                let buffer = graphics.create_storage_buffer("Bones SSBO", size)?;
                let descriptor_set = match graphics.create_bones_descriptor_set(buffer) {
                    Ok(descriptor_set) => descriptor_set,
                    Err(e) => {
                        graphics.destroy_buffer(buffer);
                        return Err(e);
                    }
                };
                self.bone_resources = Some(BoneResources { buffer, descriptor_set });
                self.output = EvaluationOutput::new(data.bone_count);
                self.bone_names_and_indices = data.bone_names_and_indices();
            }
            None => {
                log::info!("Mesh {} has no animation data", self.mesh_path);
                self.output = EvaluationOutput::default();
                self.bone_names_and_indices.clear();
            }
        }

        if self.highlight_bone >= self.bone_names_and_indices.len() {
            self.highlight_bone = 0;
        }
        self.update_max_timer_requested = true;
        self.reload_requested = true;
        Ok(())
    }

    fn update_animation(&mut self, global_time: Duration) {
        if let Some(resources) = self.bone_resources {
            self.pose_bones(global_time);
            self.uploads.enqueue(UploadRequest {
                data: self.output.gpu_bytes().to_vec(),
                target: resources.buffer,
                offset: 0,
            });
        }

        if self.update_max_timer_requested {
            self.update_max_timer();
        }
    }

    fn pose_bones(&mut self, global_time: Duration) {
        if self.force_t_pose {
            self.output.reset_to_identity();
            return;
        }
        let Some((model, _)) = self.find_animation_data() else {
            return;
        };
        let Some(data) = &model.animation_data else {
            return;
        };

        // slots the clip does not drive must not keep the previous clip's pose
        if data.bone_count < self.output.bone_count() {
            self.output.reset_to_identity();
            self.output.clear_positions();
        }
        let timer = self.force_timer.unwrap_or_else(|| wrap_timer(global_time, self.max_timer));
        self.output.evaluate(&data.root_bones, timer, &self.transform);
    }

    fn loaded_mesh_data(&self) -> Option<Arc<ModelData>> {
        let id = self.mesh_resource?;
        let loader = self.loader.borrow();
        if !loader.is_model_loaded(id) {
            return None;
        }
        loader.get_model_data(id)
    }

    /// Model whose animation drives the skeleton. The flag is false when the selected clip is not
    /// usable yet and the mesh's own animation is returned instead.
    fn find_animation_data(&self) -> Option<(Arc<ModelData>, bool)> {
        let mesh = self.loaded_mesh_data()?;
        if self.animation_select == 0 {
            return Some((mesh, true));
        }

        let clip = self
            .animations
            .get(self.animation_select - 1)
            .and_then(|clip| clip.resource_id)
            .and_then(|id| {
                let loader = self.loader.borrow();
                if loader.is_model_loaded(id) {
                    loader.get_model_data(id)
                } else {
                    None
                }
            })
            .filter(|clip| fits_skeleton(clip, &mesh));
        match clip {
            Some(clip) => Some((clip, true)),
            None => Some((mesh, false)),
        }
    }

    fn update_max_timer(&mut self) {
        self.max_timer = 0.0;

        let Some((model, success)) = self.find_animation_data() else {
            return;
        };
        if let Some(data) = &model.animation_data {
            self.max_timer = data.max_timer();
        }
        if let Some(timer) = self.force_timer {
            self.force_timer = Some(timer.clamp(0.0, self.max_timer));
        }
        self.reload_requested = true;

        if success {
            self.update_max_timer_requested = false;
        }
    }

    fn release_clips(&mut self) {
        for clip in std::mem::take(&mut self.animations) {
            if let Some(id) = clip.resource_id {
                self.release_model(id);
            }
        }
    }

    fn release_model(&self, id: ResourceId) {
        match self.loader.try_borrow_mut() {
            Ok(mut loader) => loader.release_model(id),
            Err(_) => log::error!("Mesh loader is busy, model of {} not released", self.mesh_path),
        }
    }

    fn release_bone_resources(&mut self) {
        let Some(resources) = self.bone_resources.take() else {
            return;
        };
        match self.graphics.try_borrow_mut() {
            Ok(mut graphics) => {
                graphics.destroy_descriptor_set(resources.descriptor_set);
                graphics.destroy_buffer(resources.buffer);
            }
            Err(_) => log::error!("Graphics resource factory is busy, bone buffer of {} leaked", self.mesh_path),
        }
    }

    /// Appends a clip and starts loading its file. Returns the clip's position in the list, its
    /// animation option is one higher.
    pub fn add_animation(&mut self, name: &str, file: &str) -> Result<usize, AnimationError> {
        if self.animations.len() >= MAX_ANIMATIONS {
            return Err(AnimationError::TooManyAnimations { max: MAX_ANIMATIONS });
        }
        self.animations.push(AnimationClip {
            name: name.to_string(),
            file: String::new(),
            resource_id: None,
        });
        let index = self.animations.len() - 1;
        if !file.is_empty() {
            self.set_animation_file(index, file)?;
        }
        self.update_animation_options();
        Ok(index)
    }

    pub fn set_animation_file(&mut self, index: usize, file: &str) -> Result<(), AnimationError> {
        let count = self.animations.len();
        let clip = self
            .animations
            .get_mut(index)
            .ok_or(AnimationError::AnimationOutOfRange { index, count })?;
        clip.file = file.to_string();
        let mut loader = self.loader.borrow_mut();
        let previous = std::mem::replace(
            &mut clip.resource_id,
            (!file.is_empty()).then(|| loader.add_model(file)),
        );
        if let Some(previous) = previous {
            loader.release_model(previous);
        }
        drop(loader);
        self.update_max_timer_requested = true;
        self.update_animation_options();
        Ok(())
    }

    pub fn rename_animation(&mut self, index: usize, name: &str) -> Result<(), AnimationError> {
        let count = self.animations.len();
        let clip = self
            .animations
            .get_mut(index)
            .ok_or(AnimationError::AnimationOutOfRange { index, count })?;
        clip.name = name.to_string();
        self.update_animation_options();
        Ok(())
    }

    /// "Default" followed by the name of every added clip.
    pub fn animation_options(&self) -> Vec<String> {
        std::iter::once(DEFAULT_ANIMATION_NAME.to_string())
            .chain(self.animations.iter().map(|clip| clip.name.clone()))
            .collect()
    }

    fn update_animation_options(&mut self) {
        if self.animation_select > self.animations.len() {
            self.animation_select = 0;
        }
        self.reload_requested = true;
    }

    pub fn set_animation(&mut self, index: usize) -> Result<(), AnimationError> {
        let count = self.animations.len() + 1;
        if index >= count {
            return Err(AnimationError::AnimationOutOfRange { index, count });
        }
        self.animation_select = index;
        self.update_max_timer_requested = true;
        Ok(())
    }

    pub fn selected_animation(&self) -> usize {
        self.animation_select
    }

    pub fn max_timer(&self) -> f32 {
        self.max_timer
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn mesh_resource(&self) -> Option<ResourceId> {
        self.mesh_resource
    }

    pub fn bone_count(&self) -> u32 {
        self.output.bone_count()
    }

    /// Pre-order list of the loaded skeleton's bones.
    pub fn bone_names_and_indices(&self) -> &[(String, u32)] {
        &self.bone_names_and_indices
    }

    pub fn highlight_bone_options(&self) -> Vec<String> {
        self.bone_names_and_indices.iter().map(|(name, _)| name.clone()).collect()
    }

    /// `option` indexes [`Self::highlight_bone_options`].
    pub fn set_highlight_bone(&mut self, option: usize) -> Result<(), AnimationError> {
        let count = self.bone_names_and_indices.len();
        if option >= count {
            return Err(AnimationError::BoneOutOfRange { index: option, count });
        }
        self.highlight_bone = option;
        Ok(())
    }

    pub fn highlighted_bone(&self) -> Option<u32> {
        self.bone_names_and_indices.get(self.highlight_bone).map(|(_, index)| *index)
    }

    pub fn bone_position(&self, bone_index: u32) -> Option<Vec3> {
        self.output.bones_cpu.get(bone_index as usize).map(|bone| bone.position)
    }

    pub fn bone_matrices(&self) -> &[BoneInfoGpu] {
        &self.output.bones_gpu
    }

    pub fn bones_buffer(&self) -> Option<BufferHandle> {
        self.bone_resources.map(|resources| resources.buffer)
    }

    pub fn bones_descriptor_set(&self) -> Option<DescriptorSetHandle> {
        self.bone_resources.map(|resources| resources.descriptor_set)
    }

    /// One sphere per bone when bones are shown, the highlighted bone bigger and red.
    pub fn add_debug_info(&self, debug_rendering_manager: &mut DebugRenderingManager) {
        if !self.show_bones || self.state != LifecycleState::Ready || self.output.bone_count() == 0 {
            return;
        }
        let Some(model) = self.loaded_mesh_data() else {
            return;
        };
        let Some(data) = &model.animation_data else {
            return;
        };

        let highlighted = self.highlighted_bone();
        data.visit_pre_order(|bone| {
            let Some(info) = self.output.bones_cpu.get(bone.index as usize) else {
                return;
            };
            if highlighted == Some(bone.index) {
                debug_rendering_manager.add_sphere(info.position, DEBUG_SPHERE_RADIUS * 1.5, HIGHLIGHT_COLOR);
            } else {
                debug_rendering_manager.add_sphere(info.position, DEBUG_SPHERE_RADIUS, BONE_COLOR);
            }
        });
    }

    pub fn mesh_to_render(&self) -> Option<MeshToRender> {
        if self.state != LifecycleState::Ready || self.hide_model {
            return None;
        }
        let mesh = self.mesh_resource?;
        if !self.loader.borrow().is_model_loaded(mesh) {
            return None;
        }
        Some(MeshToRender {
            mesh,
            bones: self.bones_descriptor_set(),
            transform: self.transform,
        })
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_force_t_pose(&mut self, force_t_pose: bool) {
        self.force_t_pose = force_t_pose;
    }

    pub fn set_show_bones(&mut self, show_bones: bool) {
        self.show_bones = show_bones;
    }

    pub fn set_hide_model(&mut self, hide_model: bool) {
        self.hide_model = hide_model;
    }

    /// Pins the timeline to `timer` seconds instead of following the global time.
    pub fn set_force_timer(&mut self, timer: Option<f32>) {
        self.force_timer = timer;
    }

    pub fn force_timer(&self) -> Option<f32> {
        self.force_timer
    }

    /// True once after the parameter surface changed and should be rebuilt.
    pub fn take_reload_requested(&mut self) -> bool {
        std::mem::take(&mut self.reload_requested)
    }

    /// Applies `params`. Nothing changes when they are rejected.
    pub fn load_params(&mut self, params: &AnimatedModelParams) -> Result<(), AnimationError> {
        if params.animations.len() > MAX_ANIMATIONS {
            return Err(AnimationError::TooManyAnimations { max: MAX_ANIMATIONS });
        }
        let count = params.animations.len() + 1;
        if params.animation_select >= count {
            return Err(AnimationError::AnimationOutOfRange { index: params.animation_select, count });
        }

        self.load_grace_frames = params.load_grace_frames;
        self.show_bones = params.show_bones;
        self.hide_model = params.hide_model;
        self.force_timer = params.force_timer;
        self.force_t_pose = params.force_t_pose;

        // new clips are requested before the old handles go so shared files stay loaded
        let previous = std::mem::take(&mut self.animations);
        self.animation_select = 0;
        for entry in &params.animations {
            self.add_animation(&entry.name, &entry.file)?;
        }
        for id in previous.into_iter().filter_map(|clip| clip.resource_id) {
            self.release_model(id);
        }
        self.set_animation(params.animation_select)?;
        self.highlight_bone = params.highlight_bone;

        if params.mesh != self.mesh_path {
            self.request_model_loading(&params.mesh);
        }
        Ok(())
    }

    pub fn params(&self) -> AnimatedModelParams {
        AnimatedModelParams {
            mesh: self.mesh_path.clone(),
            animations: self
                .animations
                .iter()
                .map(|clip| AnimationEntry { name: clip.name.clone(), file: clip.file.clone() })
                .collect(),
            animation_select: self.animation_select,
            show_bones: self.show_bones,
            highlight_bone: self.highlight_bone,
            hide_model: self.hide_model,
            force_timer: self.force_timer,
            force_t_pose: self.force_t_pose,
            load_grace_frames: self.load_grace_frames,
        }
    }
}

impl Drop for AnimatedModel {
    fn drop(&mut self) {
        self.release_bone_resources();
        self.release_clips();
        if let Some(id) = self.mesh_resource.take() {
            self.release_model(id);
        }
    }
}

/// A clip can only drive the skeleton if all of its bone indices exist in the mesh's bone buffer.
fn fits_skeleton(clip: &ModelData, mesh: &ModelData) -> bool {
    match (&clip.animation_data, &mesh.animation_data) {
        (Some(clip), Some(mesh)) => clip.bone_count <= mesh.bone_count,
        _ => false,
    }
}
