// In-memory filesystem with fixed-size files. Files are created at their
// final length and reads/writes clamp to it, which is all the VM core and
// its workloads ask of the real filesystem.
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use super::{File, FileSys};

struct Inode {
    data: Mutex<Vec<u8>>,
}

pub struct RamFile {
    inode: Arc<Inode>,
    pos: Mutex<u32>,
}

impl File for RamFile {
    fn length(&self) -> u32 {
        self.inode.data.lock().len() as u32
    }

    fn read(&self, buf: &mut [u8]) -> u32 {
        let mut pos = self.pos.lock();
        let n = self.read_at(buf, *pos);
        *pos += n;
        n
    }

    fn write(&self, buf: &[u8]) -> u32 {
        let mut pos = self.pos.lock();
        let n = self.write_at(buf, *pos);
        *pos += n;
        n
    }

    fn seek(&self, pos: u32) {
        *self.pos.lock() = pos;
    }

    fn tell(&self) -> u32 {
        *self.pos.lock()
    }

    fn read_at(&self, buf: &mut [u8], offset: u32) -> u32 {
        let data = self.inode.data.lock();
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        n as u32
    }

    fn write_at(&self, buf: &[u8], offset: u32) -> u32 {
        let mut data = self.inode.data.lock();
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        data[start..start + n].copy_from_slice(&buf[..n]);
        n as u32
    }

    fn reopen(&self) -> Arc<dyn File> {
        Arc::new(RamFile {
            inode: self.inode.clone(),
            pos: Mutex::new(0),
        })
    }
}

pub struct RamFs {
    files: BTreeMap<String, Arc<Inode>>,
}

impl RamFs {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
        }
    }
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSys for RamFs {
    fn create(&mut self, name: &str, initial_size: u32) -> bool {
        if name.is_empty() || self.files.contains_key(name) {
            return false;
        }
        let mut data = Vec::new();
        data.resize(initial_size as usize, 0);
        self.files.insert(
            name.to_string(),
            Arc::new(Inode {
                data: Mutex::new(data),
            }),
        );
        true
    }

    fn remove(&mut self, name: &str) -> bool {
        // Open handles keep the inode alive; only the name goes away.
        self.files.remove(name).is_some()
    }

    fn open(&self, name: &str) -> Option<Arc<dyn File>> {
        let inode = self.files.get(name)?.clone();
        Some(Arc::new(RamFile {
            inode,
            pos: Mutex::new(0),
        }))
    }
}
