//! The print target scripts write to.
//!
//! Output goes to stdout until an [`OutputCapture`] redirects it into a
//! buffer. The capture restores the previous target when it is finished or
//! dropped, so a failing or panicking script can never leave the console
//! redirected.

use std::io::Write;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
enum Target {
    Stdout,
    Buffer(String),
}

/// Shared, cloneable print target.
#[derive(Debug, Clone)]
pub struct Console {
    target: Arc<Mutex<Target>>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            target: Arc::new(Mutex::new(Target::Stdout)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Target> {
        // A script that panicked mid-print must not wedge the console.
        self.target.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write_str(&self, text: &str) {
        match &mut *self.lock() {
            Target::Stdout => {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
            Target::Buffer(buf) => buf.push_str(text),
        }
    }

    /// Redirect output into a fresh buffer until the capture ends.
    pub fn capture(&self) -> OutputCapture<'_> {
        let previous = mem::replace(&mut *self.lock(), Target::Buffer(String::new()));
        OutputCapture {
            console: self,
            previous: Some(previous),
        }
    }

    pub fn is_capturing(&self) -> bool {
        matches!(&*self.lock(), Target::Buffer(_))
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped redirection of a [`Console`].
pub struct OutputCapture<'a> {
    console: &'a Console,
    previous: Option<Target>,
}

impl OutputCapture<'_> {
    /// Stop capturing and return everything written meanwhile.
    pub fn finish(mut self) -> String {
        self.restore()
    }

    fn restore(&mut self) -> String {
        let Some(previous) = self.previous.take() else {
            return String::new();
        };
        match mem::replace(&mut *self.console.lock(), previous) {
            Target::Buffer(buf) => buf,
            Target::Stdout => String::new(),
        }
    }
}

impl Drop for OutputCapture<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_collects_and_restores() {
        let console = Console::new();
        let capture = console.capture();
        console.write_str("hello ");
        console.write_str("world\n");
        assert!(console.is_capturing());

        assert_eq!(capture.finish(), "hello world\n");
        assert!(!console.is_capturing());
    }

    #[test]
    fn test_drop_restores_without_finish() {
        let console = Console::new();
        {
            let _capture = console.capture();
            console.write_str("lost");
        }
        assert!(!console.is_capturing());
    }

    #[test]
    fn test_nested_captures_restore_outer_buffer() {
        let console = Console::new();
        let outer = console.capture();
        console.write_str("outer-before ");

        let inner = console.capture();
        console.write_str("inner");
        assert_eq!(inner.finish(), "inner");

        console.write_str("outer-after");
        assert_eq!(outer.finish(), "outer-before outer-after");
    }

    #[test]
    fn test_restored_after_panic() {
        let console = Console::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _capture = console.capture();
            console.write_str("partial");
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!console.is_capturing());
    }
}
