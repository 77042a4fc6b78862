//! Console writer whose output tests can inspect.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone)]
pub(crate) struct SharedConsole {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedConsole {
    pub(crate) fn contents(&self) -> String {
        let buffer = self.buffer.lock().expect("console mutex poisoned");
        String::from_utf8(buffer.clone()).expect("console output is utf8")
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for SharedConsole {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .expect("console mutex poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
