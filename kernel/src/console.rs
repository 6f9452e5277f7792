// Console collaborator: byte output for WRITE to stdout, keystrokes for
// READ from stdin.
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use spin::Mutex;

pub trait Console: Send + Sync {
    fn putbuf(&self, buf: &[u8]);
    fn getc(&self) -> u8;
}

// Console backed by in-memory buffers. The platform layer drains the
// output to the real terminal; tests inspect it directly.
pub struct BufferedConsole {
    output: Mutex<Vec<u8>>,
    input: Mutex<VecDeque<u8>>,
}

impl BufferedConsole {
    pub fn new() -> Self {
        Self {
            output: Mutex::new(Vec::new()),
            input: Mutex::new(VecDeque::new()),
        }
    }

    pub fn feed_input(&self, bytes: &[u8]) {
        let mut input = self.input.lock();
        for &b in bytes {
            input.push_back(b);
        }
    }

    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.output.lock())
    }
}

impl Default for BufferedConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for BufferedConsole {
    fn putbuf(&self, buf: &[u8]) {
        self.output.lock().extend_from_slice(buf);
    }

    fn getc(&self) -> u8 {
        self.input.lock().pop_front().unwrap_or(0)
    }
}
