//! Diagnostic logging.
//!
//! Grounded directly in `satcat5/log.h`: an ephemeral [`Log`] builder
//! formats one message via chained `write*` calls and emits it, on drop, to
//! every registered [`EventHandler`]. Severity is a signed priority code;
//! larger values mean higher priority. This is a named module of the
//! system, not a facade over an external tracing crate — see `SPEC_FULL.md`
//! §0.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

/// Debug-level diagnostic.
pub const DEBUG: i8 = -20;
/// Informational message.
pub const INFO: i8 = -10;
/// Warning: unexpected but recoverable.
pub const WARNING: i8 = 0;
/// Error: an operation failed.
pub const ERROR: i8 = 10;
/// Critical: an internal invariant was violated.
pub const CRITICAL: i8 = 20;

/// Maximum message length in bytes; longer messages are truncated.
pub const MAXLEN: usize = 255;

/// Receives formatted log messages.
pub trait EventHandler {
    /// Called once per completed `Log` message.
    fn log_event(&self, priority: i8, msg: &str);
}

/// Copies every message to a [`std::io::Write`] sink, one line per message.
pub struct ToWriter<W> {
    dst: RefCell<W>,
}

impl<W: std::io::Write> ToWriter<W> {
    /// Bind to the given output sink.
    pub fn new(dst: W) -> Self {
        ToWriter { dst: RefCell::new(dst) }
    }
}

impl<W: std::io::Write> EventHandler for ToWriter<W> {
    fn log_event(&self, priority: i8, msg: &str) {
        let _ = writeln!(self.dst.borrow_mut(), "{} {}", priority_label(priority), msg);
    }
}

/// Converts a priority code to a short fixed-width label.
pub fn priority_label(priority: i8) -> &'static str {
    match priority {
        p if p <= DEBUG => "DEBUG",
        p if p <= INFO => "INFO",
        p if p <= WARNING => "WARN",
        p if p <= ERROR => "ERROR",
        _ => "CRIT",
    }
}

/// Registry of active [`EventHandler`]s, owned by the runtime context
/// rather than a global intrusive list (see `SPEC_FULL.md` §0).
#[derive(Default)]
pub struct LogRegistry {
    handlers: RefCell<Vec<Rc<dyn EventHandler>>>,
    min_priority: RefCell<i8>,
}

impl LogRegistry {
    /// Create an empty registry that accepts all priorities.
    pub fn new() -> Self {
        LogRegistry {
            handlers: RefCell::new(Vec::new()),
            min_priority: RefCell::new(i8::MIN),
        }
    }

    /// Register a new handler.
    pub fn add(&self, handler: Rc<dyn EventHandler>) {
        self.handlers.borrow_mut().push(handler);
    }

    /// Suppress messages below the given priority.
    pub fn set_threshold(&self, min_priority: i8) {
        *self.min_priority.borrow_mut() = min_priority;
    }

    fn dispatch(&self, priority: i8, msg: &str) {
        if priority < *self.min_priority.borrow() {
            return;
        }
        for handler in self.handlers.borrow().iter() {
            handler.log_event(priority, msg);
        }
    }
}

/// Internal formatting buffer shared by [`Log`] and any `log_to`
/// implementor (see [`Log::write_obj`]).
#[derive(Default)]
pub struct LogBuffer {
    text: String,
}

impl LogBuffer {
    /// Write a UTF-8 string verbatim.
    pub fn wr_str(&mut self, s: &str) {
        self.push_truncated(s);
    }

    /// Write `val` as `nhex` hex digits, zero-padded, no prefix.
    pub fn wr_h32(&mut self, val: u32, nhex: usize) {
        let s = format!("{val:0width$x}", width = nhex);
        self.push_truncated(&s);
    }

    /// Write `val` as `nhex` hex digits, zero-padded, no prefix.
    pub fn wr_h64(&mut self, val: u64, nhex: usize) {
        let s = format!("{val:0width$x}", width = nhex);
        self.push_truncated(&s);
    }

    /// Write `val` as decimal, zero-padded to fit values up to `zpad`.
    pub fn wr_d32(&mut self, val: u32, zpad: u32) {
        let width = decimal_width(zpad as u64);
        let s = format!("{val:0width$}");
        self.push_truncated(&s);
    }

    /// Write `val` as decimal, zero-padded to fit values up to `zpad`.
    pub fn wr_d64(&mut self, val: u64, zpad: u64) {
        let width = decimal_width(zpad);
        let s = format!("{val:0width$}");
        self.push_truncated(&s);
    }

    /// Write a signed decimal value with an explicit `+`/`-` sign.
    pub fn wr_s32(&mut self, val: i32, zpad: u32) {
        let width = decimal_width(zpad as u64);
        let s = if val >= 0 {
            format!("+{val:0width$}")
        } else {
            format!("{val:0width$}")
        };
        self.push_truncated(&s);
    }

    /// Write a signed decimal value with an explicit `+`/`-` sign.
    pub fn wr_s64(&mut self, val: i64, zpad: u64) {
        let width = decimal_width(zpad);
        let s = if val >= 0 {
            format!("+{val:0width$}")
        } else {
            format!("{val:0width$}")
        };
        self.push_truncated(&s);
    }

    /// Number of characters written so far.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// True if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn push_truncated(&mut self, s: &str) {
        let remaining = MAXLEN.saturating_sub(self.text.len());
        if remaining == 0 {
            return;
        }
        let take = s.len().min(remaining);
        // Avoid splitting a multi-byte UTF-8 sequence.
        let mut end = take;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        self.text.push_str(&s[..end]);
    }
}

fn decimal_width(zpad: u64) -> usize {
    if zpad == 0 {
        return 0;
    }
    let mut digits = 1;
    let mut v = zpad;
    while v >= 10 {
        v /= 10;
        digits += 1;
    }
    digits
}

/// An object with custom log formatting. Implementors write their own
/// representation into the provided buffer.
pub trait LogFormat {
    /// Append this object's representation to `buf`.
    fn log_to(&self, buf: &mut LogBuffer);
}

/// One ephemeral log message. Each `write*` call appends formatted text;
/// the message is emitted to the registry when the `Log` value is dropped
/// (or explicitly via [`Log::finish`]).
pub struct Log<'r> {
    registry: &'r LogRegistry,
    priority: i8,
    buf: LogBuffer,
    finished: bool,
}

impl<'r> Log<'r> {
    /// Start a new message at the given priority.
    pub fn new(registry: &'r LogRegistry, priority: i8) -> Self {
        Log { registry, priority, buf: LogBuffer::default(), finished: false }
    }

    /// Start a new message with an initial string.
    pub fn with_str(registry: &'r LogRegistry, priority: i8, s: &str) -> Self {
        let mut log = Self::new(registry, priority);
        log.buf.wr_str(s);
        log
    }

    /// Append a plain string.
    pub fn write(mut self, s: &str) -> Self {
        if !self.buf.is_empty() {
            self.buf.wr_str(" ");
        }
        self.buf.wr_str(s);
        self
    }

    /// Append `" = 0x"` followed by `val` in fixed-width hex.
    pub fn write_hex32(mut self, val: u32) -> Self {
        let _ = write!(self.buf.text, " = 0x");
        self.buf.wr_h32(val, 8);
        self
    }

    /// Append `" = 0x"` followed by `val` in fixed-width hex.
    pub fn write_hex64(mut self, val: u64) -> Self {
        let _ = write!(self.buf.text, " = 0x");
        self.buf.wr_h64(val, 16);
        self
    }

    /// Append `" = "` followed by `val` in decimal, no leading zeros,
    /// with an explicit sign.
    pub fn write10_i64(mut self, val: i64) -> Self {
        let _ = write!(self.buf.text, " = ");
        self.buf.wr_s64(val, 0);
        self
    }

    /// Append `" = "` followed by `val` in decimal, no leading zeros.
    pub fn write10_u64(mut self, val: u64) -> Self {
        let _ = write!(self.buf.text, " = ");
        self.buf.wr_d64(val, 0);
        self
    }

    /// Append a byte slice as hex.
    pub fn write_bytes(mut self, bytes: &[u8]) -> Self {
        let _ = write!(self.buf.text, " = ");
        for b in bytes {
            self.buf.wr_h32(*b as u32, 2);
        }
        self
    }

    /// Append a MAC address in `aa:bb:cc:dd:ee:ff` form.
    pub fn write_mac(mut self, mac: &[u8; 6]) -> Self {
        let s = format!(
            " = {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
        );
        self.buf.wr_str(&s);
        self
    }

    /// Append an IPv4 address in dotted-quad form.
    pub fn write_ip(mut self, ip: [u8; 4]) -> Self {
        let s = format!(" = {}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]);
        self.buf.wr_str(&s);
        self
    }

    /// Append a custom-formatted object.
    pub fn write_obj<T: LogFormat>(mut self, obj: &T) -> Self {
        obj.log_to(&mut self.buf);
        self
    }

    /// Emit the message now instead of waiting for drop.
    pub fn finish(mut self) {
        self.emit();
    }

    fn emit(&mut self) {
        if !self.finished {
            self.finished = true;
            self.registry.dispatch(self.priority, &self.buf.text);
        }
    }
}

impl<'r> Drop for Log<'r> {
    fn drop(&mut self) {
        self.emit();
    }
}

/// Hard-reset of log registry state at the start of a unit test.
pub fn pre_test_reset(registry: &LogRegistry) -> bool {
    let was_empty = registry.handlers.borrow().is_empty();
    registry.handlers.borrow_mut().clear();
    *registry.min_priority.borrow_mut() = i8::MIN;
    was_empty
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    struct Capture(StdRefCell<Vec<(i8, String)>>);

    impl EventHandler for Capture {
        fn log_event(&self, priority: i8, msg: &str) {
            self.0.borrow_mut().push((priority, msg.to_string()));
        }
    }

    #[test]
    fn message_sent_on_drop() {
        let registry = LogRegistry::new();
        let capture = Rc::new(Capture(StdRefCell::new(Vec::new())));
        registry.add(capture.clone());
        {
            let _log = Log::with_str(&registry, WARNING, "hello").write_hex32(0xCAFE);
        }
        let captured = capture.0.borrow();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, WARNING);
        assert!(captured[0].1.contains("hello"));
        assert!(captured[0].1.contains("cafe"));
    }

    #[test]
    fn threshold_suppresses_low_priority() {
        let registry = LogRegistry::new();
        registry.set_threshold(WARNING);
        let capture = Rc::new(Capture(StdRefCell::new(Vec::new())));
        registry.add(capture.clone());
        Log::with_str(&registry, DEBUG, "ignored").finish();
        Log::with_str(&registry, ERROR, "kept").finish();
        let captured = capture.0.borrow();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].1, "kept");
    }

    #[test]
    fn long_messages_are_truncated() {
        let mut buf = LogBuffer::default();
        buf.wr_str(&"x".repeat(1000));
        assert_eq!(buf.len(), MAXLEN);
    }
}
