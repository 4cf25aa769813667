use std::{
    cell::RefCell,
    io::{self, Write},
    rc::Rc,
};

use log::warn;

/// A shared text sink for program output, diagnostics or dumps.
pub type Sink = Rc<RefCell<dyn Write>>;

/// Default limit on nested function calls.
pub const MAX_CALL_DEPTH: usize = 200;

/// Execution settings shared by both executors.
#[derive(Clone)]
pub struct Options {
    /// Receives everything `print` writes.
    pub out: Sink,
    /// Receives diagnostics.
    pub err: Sink,
    pub only_first_error: bool,
    pub max_call_depth: usize,
    /// Print the active call stack below a runtime error.
    pub dump_stack_on_error: bool,
    /// Receives one line per executed VM instruction when set.
    pub dump: Option<Sink>,
    /// Invoked when a native reports a state change to the host.
    pub on_state_change: Option<Rc<dyn Fn(&str)>>,
    /// Polled before every statement; returning `true` stops the run.
    pub cancel: Option<Rc<dyn Fn() -> bool>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            out: Rc::new(RefCell::new(io::stdout())),
            err: Rc::new(RefCell::new(io::stderr())),
            only_first_error: false,
            max_call_depth: MAX_CALL_DEPTH,
            dump_stack_on_error: true,
            dump: None,
            on_state_change: None,
            cancel: None,
        }
    }
}

impl Options {
    pub fn write_out(&self, text: &str) {
        write_line(&self.out, text);
    }

    pub fn write_err(&self, text: &str) {
        write_line(&self.err, text);
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |cancel| cancel())
    }

    pub fn notify(&self, what: &str) {
        if let Some(hook) = &self.on_state_change {
            hook(what);
        }
    }

    pub fn write_dump(&self, text: &str) {
        if let Some(dump) = &self.dump {
            write_line(dump, text);
        }
    }
}

fn write_line(sink: &Sink, text: &str) {
    if let Err(e) = writeln!(sink.borrow_mut(), "{text}") {
        warn!("Failed to write to sink: {e}");
    }
}

/// A sink that collects everything written into a string buffer.
#[derive(Clone, Debug, Default)]
pub struct Capture(Rc<RefCell<Vec<u8>>>);

impl Capture {
    pub fn sink(&self) -> Sink {
        Rc::new(RefCell::new(self.clone()))
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
