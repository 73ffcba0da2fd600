use std::{collections::HashMap, sync::Arc};

use generational_arena::{Arena, Index};

use super::loader::ModelData;

pub enum CpuState {
    Loading,
    Ready(Arc<ModelData>),
    Failed(String),
}

pub struct Entry {
    pub path: String,
    pub ref_count: u32,
    pub cpu_state: CpuState,
}
impl Entry {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ref_count: 0,
            cpu_state: CpuState::Loading,
        }
    }
}

pub struct ResourceRegistry {
    pub entries: Arena<Entry>,
    pub by_path: HashMap<String, Index>,
}
impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arena::new(),
            by_path: HashMap::new(),
        }
    }

    /// Looks up or creates the entry for `path` and takes a reference on it.
    /// The flag is true when the caller has to issue the load.
    pub fn request(&mut self, path: &str) -> (Index, bool) {
        if let Some(&idx) = self.by_path.get(path) {
            if let Some(entry) = self.entries.get_mut(idx) {
                entry.ref_count += 1;
                // failed loads are retried
                let needs_load = matches!(entry.cpu_state, CpuState::Failed(_));
                if needs_load {
                    entry.cpu_state = CpuState::Loading;
                }
                return (idx, needs_load);
            }
        }

        let mut entry = Entry::new(path);
        entry.ref_count = 1;
        let idx = self.entries.insert(entry);
        self.by_path.insert(path.to_string(), idx);
        (idx, true)
    }

    /// Drops one reference. The entry is removed once nobody holds it and is returned.
    pub fn release(&mut self, idx: Index) -> Option<Entry> {
        let entry = self.entries.get_mut(idx)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count > 0 {
            return None;
        }

        let entry = self.entries.remove(idx)?;
        self.by_path.remove(&entry.path);
        Some(entry)
    }

    pub fn get(&self, idx: Index) -> Option<&Entry> {
        self.entries.get(idx)
    }

    pub fn set_cpu_state(&mut self, idx: Index, cpu_state: CpuState) {
        if let Some(entry) = self.entries.get_mut(idx) {
            entry.cpu_state = cpu_state;
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, e)| matches!(e.cpu_state, CpuState::Loading))
            .count()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_manager::loader::MeshInfo;

    #[test]
    fn same_path_shares_entry() {
        let mut reg = ResourceRegistry::new();
        let (a, load_a) = reg.request("models/fox.glb");
        let (b, load_b) = reg.request("models/fox.glb");

        assert_eq!(a, b);
        assert!(load_a);
        assert!(!load_b);
        assert_eq!(reg.get(a).unwrap().ref_count, 2);
        assert_eq!(reg.pending_count(), 1);
    }

    #[test]
    fn last_release_removes_entry() {
        let mut reg = ResourceRegistry::new();
        let (idx, _) = reg.request("models/fox.glb");
        reg.request("models/fox.glb");

        assert!(reg.release(idx).is_none());
        assert_eq!(reg.get(idx).unwrap().ref_count, 1);

        let removed = reg.release(idx).unwrap();
        assert_eq!(removed.path, "models/fox.glb");
        assert!(reg.get(idx).is_none());
        assert!(reg.release(idx).is_none());

        let (again, needs_load) = reg.request("models/fox.glb");
        assert_ne!(idx, again);
        assert!(needs_load);
    }

    #[test]
    fn failed_entry_is_reloaded_on_next_request() {
        let mut reg = ResourceRegistry::new();
        let (idx, _) = reg.request("missing.glb");
        reg.set_cpu_state(idx, CpuState::Failed("not found".to_string()));
        assert_eq!(reg.pending_count(), 0);

        let (again, needs_load) = reg.request("missing.glb");
        assert_eq!(idx, again);
        assert!(needs_load);

        reg.set_cpu_state(
            idx,
            CpuState::Ready(Arc::new(ModelData { mesh: MeshInfo::default(), animation_data: None })),
        );
        assert_eq!(reg.pending_count(), 0);
    }
}
