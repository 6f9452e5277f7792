// User processes: the per-process tables the VM core works against, the
// process registry, and exit teardown.
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;
use x86_64::structures::paging::Page;

use crate::fs::fd::FdTable;
use crate::fs::File;
use crate::kctx::Kernel;
use crate::memory::page::{self, PageMap};
use crate::memory::pagedir::PageDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u32);

// Opaque identifier for one mmap region, allocated per process. The
// region's base address is looked up through the map table, never derived
// from the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MapId(pub u32);

pub struct Mapping {
    pub base: Page,
    pub pages: usize,
    pub file: Arc<dyn File>,
}

pub struct MapTable {
    regions: BTreeMap<MapId, Mapping>,
    next: u32,
}

impl MapTable {
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
            next: 1,
        }
    }

    pub fn next_id(&mut self) -> MapId {
        let id = MapId(self.next);
        self.next += 1;
        id
    }

    pub fn insert(&mut self, id: MapId, mapping: Mapping) {
        self.regions.insert(id, mapping);
    }

    pub fn get(&self, id: MapId) -> Option<&Mapping> {
        self.regions.get(&id)
    }

    pub fn remove(&mut self, id: MapId) -> Option<Mapping> {
        self.regions.remove(&id)
    }

    pub fn ids(&self) -> Vec<MapId> {
        self.regions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl Default for MapTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Process {
    pub pid: Pid,
    pub name: String,
    pub pagedir: Mutex<PageDir>,
    pub page_map: Mutex<PageMap>,
    pub fds: Mutex<FdTable>,
    pub maps: Mutex<MapTable>,
}

impl Process {
    fn new(pid: Pid, name: &str) -> Self {
        Self {
            pid,
            name: name.to_string(),
            pagedir: Mutex::new(PageDir::new()),
            page_map: Mutex::new(PageMap::new()),
            fds: Mutex::new(FdTable::new()),
            maps: Mutex::new(MapTable::new()),
        }
    }
}

struct RegistryState {
    procs: BTreeMap<Pid, Arc<Process>>,
    // Exit statuses held for a later WAIT, reaped on delivery
    exited: BTreeMap<Pid, i32>,
    next_pid: u32,
}

pub struct ProcessTable {
    state: Mutex<RegistryState>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                procs: BTreeMap::new(),
                exited: BTreeMap::new(),
                next_pid: 1,
            }),
        }
    }

    pub fn spawn(&self, name: &str) -> Arc<Process> {
        let mut state = self.state.lock();
        let pid = Pid(state.next_pid);
        state.next_pid += 1;
        let proc = Arc::new(Process::new(pid, name));
        state.procs.insert(pid, proc.clone());
        proc
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.state.lock().procs.get(&pid).cloned()
    }

    pub fn running(&self) -> usize {
        self.state.lock().procs.len()
    }

    fn record_exit(&self, pid: Pid, status: i32) {
        let mut state = self.state.lock();
        state.procs.remove(&pid);
        state.exited.insert(pid, status);
    }

    // Reap the exit status of a dead child. Each status is delivered once;
    // an unknown or still-running pid yields None.
    pub fn wait(&self, pid: Pid) -> Option<i32> {
        self.state.lock().exited.remove(&pid)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

// Terminate `proc`, releasing everything it holds: mmap regions are
// flushed and unmapped, the page table is destroyed (frames, swap slots
// and hardware mappings go with it), descriptors close, and the status is
// recorded for a waiting parent.
pub fn exit(kernel: &Kernel, proc: &Arc<Process>, status: i32) {
    let ids = proc.maps.lock().ids();
    for id in ids {
        let _ = page::munmap(kernel, proc, id);
    }
    page::destroy_page_map(kernel, proc);
    proc.fds.lock().clear();
    kernel.procs.record_exit(proc.pid, status);
    crate::kprintln!("{}: exit({})", proc.name, status);
}
