// Kernel context: the boot-time singletons (user pool, frame table, swap,
// filesystem lock, console, process registry) gathered into one struct
// that every core operation receives instead of reaching for globals.
use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::console::Console;
use crate::drivers::disk::DiskDriver;
use crate::fs::{FileSys, FsRoot};
use crate::memory::frame::FrameTable;
use crate::memory::pool::UserPool;
use crate::memory::swap::SwapTable;
use crate::process::{Pid, ProcessTable};

// Loads and runs a user program on behalf of EXEC. Process images and the
// scheduler live outside the VM core.
pub trait ProgramLoader: Send + Sync {
    fn execute(&self, kernel: &Kernel, cmd: &str) -> Option<Pid>;
}

pub struct KernelConfig {
    // Frames in the user pool, the hard ceiling on resident user pages
    pub user_frames: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { user_frames: 64 }
    }
}

pub struct Kernel {
    pub pool: UserPool,
    pub frames: FrameTable,
    pub swap: SwapTable,
    pub filesys: FsRoot,
    pub console: Arc<dyn Console>,
    pub procs: ProcessTable,
    pub loader: Option<Box<dyn ProgramLoader>>,
}

impl Kernel {
    pub fn new(
        config: KernelConfig,
        swap_device: Box<dyn DiskDriver>,
        filesys: Box<dyn FileSys>,
        console: Arc<dyn Console>,
        loader: Option<Box<dyn ProgramLoader>>,
    ) -> Self {
        let pool = UserPool::new(config.user_frames);
        let swap = SwapTable::new(swap_device);

        let (_, swap_slots) = swap.stats();
        crate::kprintln!(
            "vm: {} user frames, {} swap slots",
            config.user_frames,
            swap_slots
        );

        Self {
            pool,
            frames: FrameTable::new(),
            swap,
            filesys: FsRoot::new(filesys),
            console,
            procs: ProcessTable::new(),
            loader,
        }
    }
}
