// Per-process file-descriptor table. Descriptors 0 and 1 are the console
// and never appear here.
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use super::File;

pub const STDIN_FILENO: u32 = 0;
pub const STDOUT_FILENO: u32 = 1;

const FIRST_FD: u32 = 2;

pub struct FdTable {
    open: BTreeMap<u32, Arc<dyn File>>,
    next_fd: u32,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            open: BTreeMap::new(),
            next_fd: FIRST_FD,
        }
    }

    pub fn install(&mut self, file: Arc<dyn File>) -> u32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.open.insert(fd, file);
        fd
    }

    pub fn get(&self, fd: u32) -> Option<Arc<dyn File>> {
        self.open.get(&fd).cloned()
    }

    pub fn close(&mut self, fd: u32) -> bool {
        self.open.remove(&fd).is_some()
    }

    pub fn clear(&mut self) {
        self.open.clear();
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
