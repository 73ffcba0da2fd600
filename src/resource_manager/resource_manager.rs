use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, Sender};
use generational_arena::Index;

use super::{
    loader::{MeshResourceLoader, ModelData, ResourceId},
    registry::{CpuState, ResourceRegistry},
};
use crate::error::ResourceError;

const IO_WORKER_COUNT: usize = 2;

/// Parses a model file on an io worker thread.
pub trait ModelImporter: Send + Sync + 'static {
    fn import(&self, path: &str) -> Result<ModelData, ResourceError>;
}

pub enum IoRequest {
    LoadModel { id: Index, path: String },
}

pub enum IoResponse {
    ModelLoaded { id: Index, model: ModelData },
    Error { id: Index, path: String, message: String },
}

fn io_worker_loop(
    importer: Arc<dyn ModelImporter>,
    rx: Receiver<IoRequest>,
    tx: Sender<IoResponse>,
) {
    while let Ok(req) = rx.recv() {
        let result = match req {
            IoRequest::LoadModel { id, path } => importer.import(&path).map_or_else(
                |e| IoResponse::Error { id, path: path.clone(), message: e.to_string() },
                |model| IoResponse::ModelLoaded { id, model },
            ),
        };

        // ignore send errors on shutdown
        let _ = tx.send(result);
    }
}

/// Loads models on background threads. Results become visible after [`ResourceManager::process_responses`].
pub struct ResourceManager {
    registry: ResourceRegistry,
    req_tx: Option<Sender<IoRequest>>,
    res_rx: Receiver<IoResponse>,
    workers: Vec<JoinHandle<()>>,
}
impl ResourceManager {
    pub fn new<I: ModelImporter>(importer: I) -> Self {
        let importer: Arc<dyn ModelImporter> = Arc::new(importer);
        let (req_tx, req_rx) = crossbeam::channel::unbounded();
        let (res_tx, res_rx) = crossbeam::channel::unbounded();

        let workers = (0..IO_WORKER_COUNT)
            .map(|_| {
                let importer = importer.clone();
                let rx = req_rx.clone();
                let tx = res_tx.clone();
                std::thread::spawn(move || {
                    io_worker_loop(importer, rx, tx);
                })
            })
            .collect();

        Self {
            registry: ResourceRegistry::new(),
            req_tx: Some(req_tx),
            res_rx,
            workers,
        }
    }

    /// Moves finished loads into the registry. Returns the number of responses handled.
    pub fn process_responses(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(res) = self.res_rx.try_recv() {
            self.handle_response(res);
            handled += 1;
        }
        handled
    }

    fn handle_response(&mut self, res: IoResponse) {
        match res {
            IoResponse::ModelLoaded { id, model } => {
                if let Some(entry) = self.registry.get(id) {
                    log::debug!("Loaded model {}", entry.path);
                }
                self.registry.set_cpu_state(id, CpuState::Ready(Arc::new(model)));
            }
            IoResponse::Error { id, path, message } => {
                log::error!("IO Error: path: {}, message: {}", path, message);
                self.registry.set_cpu_state(id, CpuState::Failed(message));
            }
        }
    }

    /// Blocks until no load is pending or `timeout` passed. Returns true if everything settled.
    pub fn wait_for_pending(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.registry.pending_count() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.res_rx.recv_timeout(remaining) {
                Ok(res) => self.handle_response(res),
                Err(_) => return false,
            }
        }
        true
    }

    pub fn load_failed(&self, id: ResourceId) -> bool {
        self.load_error(id).is_some()
    }

    pub fn load_error(&self, id: ResourceId) -> Option<&str> {
        match &self.registry.get(id.index())?.cpu_state {
            CpuState::Failed(message) => Some(message.as_str()),
            _ => None,
        }
    }

    pub fn path(&self, id: ResourceId) -> Option<&str> {
        self.registry.get(id.index()).map(|e| e.path.as_str())
    }

    fn make_io_request(&mut self, req: IoRequest) {
        let sent = self.req_tx.as_ref().map(|tx| tx.send(req));
        if let Some(Err(err)) = sent {
            let IoRequest::LoadModel { id, path } = err.into_inner();
            log::error!("IO workers gone, cannot load {}", path);
            self.registry.set_cpu_state(id, CpuState::Failed("io workers stopped".to_string()));
        }
    }
}

impl MeshResourceLoader for ResourceManager {
    fn add_model(&mut self, path: &str) -> ResourceId {
        let (idx, needs_load) = self.registry.request(path);
        if needs_load {
            self.make_io_request(IoRequest::LoadModel { id: idx, path: path.to_string() });
        }
        ResourceId::from(idx)
    }

    fn is_model_loaded(&self, id: ResourceId) -> bool {
        matches!(
            self.registry.get(id.index()).map(|e| &e.cpu_state),
            Some(CpuState::Ready(_))
        )
    }

    fn get_model_data(&self, id: ResourceId) -> Option<Arc<ModelData>> {
        match &self.registry.get(id.index())?.cpu_state {
            CpuState::Ready(model) => Some(model.clone()),
            _ => None,
        }
    }

    fn release_model(&mut self, id: ResourceId) {
        if let Some(entry) = self.registry.release(id.index()) {
            log::debug!("Unloaded model {}", entry.path);
        }
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        // closing the request channel ends the worker loops
        self.req_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use glam::Mat4;

    use super::*;
    use crate::{
        resource_manager::loader::MeshInfo,
        skeleton::{AnimationData, Bone},
    };

    struct FakeImporter {
        calls: Arc<AtomicUsize>,
    }
    impl ModelImporter for FakeImporter {
        fn import(&self, path: &str) -> Result<ModelData, ResourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path.starts_with("missing") {
                return Err(ResourceError::LoadFailed { path: path.to_string(), message: "no such file".to_string() });
            }
            Ok(ModelData {
                mesh: MeshInfo { primitive_count: 1, vertex_count: 3, index_count: 3 },
                animation_data: Some(AnimationData::new(1, vec![Bone::new("root", 0, Mat4::IDENTITY)])),
            })
        }
    }

    fn manager() -> (ResourceManager, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (ResourceManager::new(FakeImporter { calls: calls.clone() }), calls)
    }

    #[test]
    fn loads_in_background() {
        let (mut rm, _) = manager();
        let id = rm.add_model("fox.glb");

        assert!(rm.wait_for_pending(Duration::from_secs(5)));
        assert!(rm.is_model_loaded(id));
        let data = rm.get_model_data(id).unwrap();
        assert_eq!(data.mesh.vertex_count, 3);
        assert_eq!(data.animation_data.as_ref().unwrap().bone_count, 1);
    }

    #[test]
    fn same_path_is_loaded_once() {
        let (mut rm, calls) = manager();
        let a = rm.add_model("fox.glb");
        let b = rm.add_model("fox.glb");

        assert_eq!(a, b);
        assert!(rm.wait_for_pending(Duration::from_secs(5)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(rm.path(a), Some("fox.glb"));
    }

    #[test]
    fn failures_are_recorded() {
        let (mut rm, _) = manager();
        let id = rm.add_model("missing.glb");

        assert!(rm.wait_for_pending(Duration::from_secs(5)));
        assert!(!rm.is_model_loaded(id));
        assert!(rm.load_failed(id));
        assert!(rm.get_model_data(id).is_none());
        assert!(rm.load_error(id).unwrap().contains("no such file"));
    }

    #[test]
    fn released_model_is_unloaded() {
        let (mut rm, calls) = manager();
        let a = rm.add_model("fox.glb");
        rm.add_model("fox.glb");
        assert!(rm.wait_for_pending(Duration::from_secs(5)));

        rm.release_model(a);
        assert!(rm.is_model_loaded(a));
        rm.release_model(a);
        assert!(!rm.is_model_loaded(a));
        assert_eq!(rm.path(a), None);

        let b = rm.add_model("fox.glb");
        assert!(rm.wait_for_pending(Duration::from_secs(5)));
        assert!(rm.is_model_loaded(b));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
