//! Logging sinks for builders and optimization passes.
//!
//! A `Logger` is a cheap cloneable handle. Messages always go to the `log`
//! facade; when a `LogHandler` is attached they are forwarded there too, so
//! embedders (and tests) can observe exactly what was reported. The handle
//! also remembers whether any error-level message was emitted, which the
//! builder exposes as `did_error`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Severity of a reported message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Receiver for messages reported by builders and passes.
pub trait LogHandler {
    fn on_debug(&self, _msg: &str) {}
    fn on_info(&self, _msg: &str) {}
    fn on_warn(&self, _msg: &str) {}
    fn on_error(&self, _msg: &str) {}
}

/// Cloneable logging handle. Clones share the attached handler and the
/// error flag.
#[derive(Clone, Default)]
pub struct Logger {
    handler: Option<Rc<dyn LogHandler>>,
    errored: Rc<Cell<bool>>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(handler: Rc<dyn LogHandler>) -> Self {
        Self { handler: Some(handler), errored: Rc::new(Cell::new(false)) }
    }

    pub fn set_handler(&mut self, handler: Rc<dyn LogHandler>) {
        self.handler = Some(handler);
    }

    /// Whether any error-level message has been reported through this handle
    /// or any clone of it.
    pub fn did_error(&self) -> bool {
        self.errored.get()
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        log::debug!("{msg}");
        if let Some(h) = &self.handler {
            h.on_debug(msg);
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        log::info!("{msg}");
        if let Some(h) = &self.handler {
            h.on_info(msg);
        }
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        log::warn!("{msg}");
        if let Some(h) = &self.handler {
            h.on_warn(msg);
        }
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        self.errored.set(true);
        log::error!("{msg}");
        if let Some(h) = &self.handler {
            h.on_error(msg);
        }
    }
}

/// A handler that records every message it receives. Used by tests to assert
/// on error/candidate reporting.
#[derive(Default)]
pub struct CaptureHandler {
    messages: RefCell<Vec<(LogLevel, String)>>,
}

impl CaptureHandler {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        self.messages.borrow().clone()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.messages.borrow().iter().filter(|(l, _)| *l == level).count()
    }

    pub fn clear(&self) {
        self.messages.borrow_mut().clear();
    }
}

impl LogHandler for CaptureHandler {
    fn on_debug(&self, msg: &str) {
        self.messages.borrow_mut().push((LogLevel::Debug, msg.into()));
    }

    fn on_info(&self, msg: &str) {
        self.messages.borrow_mut().push((LogLevel::Info, msg.into()));
    }

    fn on_warn(&self, msg: &str) {
        self.messages.borrow_mut().push((LogLevel::Warn, msg.into()));
    }

    fn on_error(&self, msg: &str) {
        self.messages.borrow_mut().push((LogLevel::Error, msg.into()));
    }
}
