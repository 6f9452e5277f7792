// Filesystem interface consumed by the VM core and the syscall gate. The
// real on-disk filesystem lives behind these traits; one global lock
// serialises every call into it.
pub mod fd;
pub mod ramfs;

use alloc::boxed::Box;
use alloc::sync::Arc;
use spin::{Mutex, MutexGuard};

// An open file. Positioned reads and writes carry their own cursor so the
// VM paths can touch file contents without disturbing the fd's position.
pub trait File: Send + Sync {
    fn length(&self) -> u32;
    fn read(&self, buf: &mut [u8]) -> u32;
    fn write(&self, buf: &[u8]) -> u32;
    fn seek(&self, pos: u32);
    fn tell(&self) -> u32;
    fn read_at(&self, buf: &mut [u8], offset: u32) -> u32;
    fn write_at(&self, buf: &[u8], offset: u32) -> u32;
    // Independent handle to the same file, cursor reset to zero.
    fn reopen(&self) -> Arc<dyn File>;
}

pub trait FileSys: Send + Sync {
    fn create(&mut self, name: &str, initial_size: u32) -> bool;
    fn remove(&mut self, name: &str) -> bool;
    fn open(&self, name: &str) -> Option<Arc<dyn File>>;
}

// The global filesystem lock. Holding the guard is what serialises
// filesystem calls; keep the critical section narrow and never demand-load
// or allocate frames under it, since eviction write-back takes this lock.
pub struct FsRoot {
    inner: Mutex<Box<dyn FileSys>>,
}

impl FsRoot {
    pub fn new(fs: Box<dyn FileSys>) -> Self {
        Self {
            inner: Mutex::new(fs),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<dyn FileSys>> {
        self.inner.lock()
    }
}
