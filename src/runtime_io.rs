/// Output sink for the `Print` opcode, so the VM stays pure w.r.t. the environment.
pub trait RuntimeIo {
    fn write(&mut self, s: &str);
}

impl<T: RuntimeIo + ?Sized> RuntimeIo for &mut T {
    fn write(&mut self, s: &str) {
        (**self).write(s);
    }
}

/// Default sink that talks to process stdout.
#[derive(Debug, Default)]
pub struct StdIo;

impl RuntimeIo for StdIo {
    fn write(&mut self, s: &str) {
        use std::io::Write;
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(s.as_bytes());
        let _ = out.flush();
    }
}

/// Buffer-based sink for tests and embedders: output is accumulated in memory.
#[derive(Debug, Default)]
pub struct BufferIo {
    output: String,
}

impl BufferIo {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn take_output(self) -> String {
        self.output
    }
    pub fn get_output(&self) -> &str {
        &self.output
    }
    pub fn drain_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl RuntimeIo for BufferIo {
    fn write(&mut self, s: &str) {
        self.output.push_str(s);
    }
}
