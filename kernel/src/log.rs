// Kernel log sink. The macros mirror the usual serial console pair; the
// backing store is a bounded line buffer so diagnostics survive until a
// debugger (or a test) drains them.
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use lazy_static::lazy_static;
use spin::Mutex;

const LOG_LINES: usize = 256;

pub struct LogBuffer {
    lines: VecDeque<String>,
    current: String,
}

impl LogBuffer {
    fn new() -> Self {
        Self {
            lines: VecDeque::new(),
            current: String::new(),
        }
    }

    fn push_line(&mut self) {
        if self.lines.len() == LOG_LINES {
            self.lines.pop_front();
        }
        let line = core::mem::take(&mut self.current);
        self.lines.push_back(line);
    }

    pub fn drain(&mut self) -> Vec<String> {
        self.lines.drain(..).collect()
    }
}

impl fmt::Write for LogBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if ch == '\n' {
                self.push_line();
            } else {
                self.current.push(ch);
            }
        }
        Ok(())
    }
}

lazy_static! {
    pub static ref KLOG: Mutex<LogBuffer> = Mutex::new(LogBuffer::new());
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    KLOG.lock()
        .write_fmt(args)
        .expect("writing to the kernel log failed");
}

// Take every complete line logged so far.
pub fn take_lines() -> Vec<String> {
    KLOG.lock().drain()
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::log::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($fmt:expr) => ($crate::kprint!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::kprint!(
        concat!($fmt, "\n"), $($arg)*));
}
