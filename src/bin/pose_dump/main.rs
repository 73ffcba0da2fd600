use std::{cell::RefCell, path::Path, process::ExitCode, rc::Rc, sync::Arc, time::Duration};

use clap::Parser;
use glam::Vec3;
use serde::Serialize;
use wolf_animation::{
    animated_model::wrap_timer,
    params::AnimationEntry,
    renderer::{
        bindgroups::bones::WgpuBackend,
        gpu::{GpuBufferWriter, GraphicsResourceFactory, UploadQueue},
        host_backend::HostBackend,
        update_gpu_buffers_pass::UpdateGpuBuffersPass,
    },
    resource_manager::{GltfImporter, ResourceManager},
    AnimatedModel, AnimatedModelParams, LifecycleState,
};

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(about = "Plays a skinned glTF model for a number of frames and prints the final bone positions as JSON")]
struct CliArgs {
    /// Model to load, overrides the mesh of --params
    model: Option<String>,

    /// Additional animation file, can be repeated
    #[arg(long = "animation")]
    animations: Vec<String>,

    /// Animation option to play, 0 is the model's own animation
    #[arg(long)]
    select: Option<usize>,

    #[arg(long, default_value_t = 60)]
    frames: u32,

    #[arg(long, default_value_t = 60.0)]
    fps: f32,

    /// Pin the timeline to this many seconds
    #[arg(long)]
    force_timer: Option<f32>,

    #[arg(long)]
    t_pose: bool,

    /// Component parameters as JSON
    #[arg(long)]
    params: Option<String>,

    /// Upload bone matrices to a headless wgpu device instead of host memory
    #[arg(long)]
    wgpu: bool,

    #[arg(long, default_value_t = log::LevelFilter::Info)]
    log_level: log::LevelFilter,
}

#[derive(Serialize)]
struct BoneDump {
    name: String,
    index: u32,
    position: Vec3,
}

#[derive(Serialize)]
struct PoseDump {
    mesh: String,
    animation: String,
    frames: u32,
    time: f32,
    max_timer: f32,
    uploaded_bytes: u64,
    bones: Vec<BoneDump>,
}

fn build_params(args: &CliArgs) -> Result<AnimatedModelParams, Box<dyn std::error::Error>> {
    let mut params = match &args.params {
        Some(path) => AnimatedModelParams::load(path)?,
        None => AnimatedModelParams::default(),
    };
    if let Some(model) = &args.model {
        params.mesh = model.clone();
    }
    for file in &args.animations {
        let name = Path::new(file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file)
            .to_string();
        params.animations.push(AnimationEntry { name, file: file.clone() });
    }
    if let Some(select) = args.select {
        params.animation_select = select;
    }
    if args.force_timer.is_some() {
        params.force_timer = args.force_timer;
    }
    params.force_t_pose |= args.t_pose;

    if params.mesh.is_empty() {
        return Err("no model given".into());
    }
    Ok(params)
}

fn run_frames<B>(
    backend: Rc<RefCell<B>>,
    params: &AnimatedModelParams,
    args: &CliArgs,
) -> Result<PoseDump, Box<dyn std::error::Error>>
where
    B: GraphicsResourceFactory + GpuBufferWriter + 'static,
{
    let resource_manager = Rc::new(RefCell::new(ResourceManager::new(GltfImporter)));
    let uploads = Arc::new(UploadQueue::new());
    let mut model = AnimatedModel::new(resource_manager.clone(), backend.clone(), uploads.clone());
    model.load_params(params)?;

    // load everything up front so the frame count alone decides the result
    if !resource_manager.borrow_mut().wait_for_pending(LOAD_TIMEOUT) {
        log::warn!("Loading did not finish within {:?}", LOAD_TIMEOUT);
    }

    let frame_time = Duration::from_secs_f32(1.0 / args.fps.max(1.0));
    let mut pass = UpdateGpuBuffersPass::new();
    let mut now = Duration::ZERO;
    let mut last_frame_time = now;
    for _ in 0..args.frames {
        resource_manager.borrow_mut().process_responses();
        model.update_before_frame(now);
        pass.execute(&uploads, &mut *backend.borrow_mut());
        last_frame_time = now;
        now += frame_time;
    }

    if model.state() != LifecycleState::Ready {
        let reason = model
            .mesh_resource()
            .and_then(|id| resource_manager.borrow().load_error(id).map(str::to_string))
            .unwrap_or_else(|| format!("not ready after {} frames", args.frames));
        return Err(format!("{}: {}", params.mesh, reason).into());
    }

    let animation = model
        .animation_options()
        .get(model.selected_animation())
        .cloned()
        .unwrap_or_default();
    let time = match model.force_timer() {
        Some(timer) => timer,
        None => wrap_timer(last_frame_time, model.max_timer()),
    };
    let bones = model
        .bone_names_and_indices()
        .iter()
        .map(|(name, index)| BoneDump {
            name: name.clone(),
            index: *index,
            position: model.bone_position(*index).unwrap_or(Vec3::ZERO),
        })
        .collect();

    Ok(PoseDump {
        mesh: params.mesh.clone(),
        animation,
        frames: args.frames,
        time,
        max_timer: model.max_timer(),
        uploaded_bytes: pass.uploaded_bytes(),
        bones,
    })
}

fn run(args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let params = build_params(args)?;

    let dump = if args.wgpu {
        let backend = Rc::new(RefCell::new(WgpuBackend::request_headless()?));
        let dump = run_frames(backend.clone(), &params, args)?;
        backend.borrow().flush();
        dump
    } else {
        run_frames(Rc::new(RefCell::new(HostBackend::new())), &params, args)?
    };

    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    colog::basic_builder()
        .filter_level(args.log_level)
        .parse_default_env()
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
