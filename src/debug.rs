//! Kernel debug output.
//!
//! The process core narrates what it does through a single fire-and-forget
//! sink. Nothing in the kernel ever observes a logging failure: with no
//! sink registered the text is dropped, and the serial sink swallows write
//! errors itself.

use core::fmt;
use spin::Mutex;

/// Destination for kernel debug text.
pub trait DebugSink: Send + Sync {
    fn emit(&self, message: fmt::Arguments);
}

static SINK: Mutex<Option<&'static dyn DebugSink>> = Mutex::new(None);

/// Route all further debug output to `sink`.
pub fn set_sink(sink: &'static dyn DebugSink) {
    *SINK.lock() = Some(sink);
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    if let Some(sink) = *SINK.lock() {
        sink.emit(args);
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::debug::_print(format_args!("[INFO] "));
        $crate::debug::_print(format_args!($($arg)*));
        $crate::debug::_print(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::debug::_print(format_args!("[WARN] "));
        $crate::debug::_print(format_args!($($arg)*));
        $crate::debug::_print(format_args!("\n"));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::debug::_print(format_args!("[ERROR] "));
        $crate::debug::_print(format_args!($($arg)*));
        $crate::debug::_print(format_args!("\n"));
    };
}

/// Polled 16550 UART on the conventional COM1 ports.
#[cfg(target_arch = "x86_64")]
mod serial {
    use super::DebugSink;
    use core::fmt;
    use lazy_static::lazy_static;
    use spin::Mutex;
    use x86_64::instructions::port::Port;

    const COM1: u16 = 0x3F8;

    struct SerialPort {
        data: Port<u8>,
        int_en: Port<u8>,
        line_ctrl: Port<u8>,
        line_sts: Port<u8>,
    }

    impl SerialPort {
        unsafe fn new(base: u16) -> SerialPort {
            SerialPort {
                data: Port::new(base),
                int_en: Port::new(base + 1),
                line_ctrl: Port::new(base + 3),
                line_sts: Port::new(base + 5),
            }
        }

        /// 38400 baud, 8 data bits, no parity, one stop bit, polled TX.
        fn init(&mut self) {
            unsafe {
                self.int_en.write(0x00);
                self.line_ctrl.write(0x80);
                self.data.write(0x03);
                self.int_en.write(0x00);
                self.line_ctrl.write(0x03);
            }
        }

        fn send(&mut self, byte: u8) {
            unsafe {
                while (self.line_sts.read() & 0x20) == 0 {}
                self.data.write(byte);
            }
        }
    }

    impl fmt::Write for SerialPort {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for byte in s.bytes() {
                self.send(byte);
            }
            Ok(())
        }
    }

    pub struct SerialSink {
        port: Mutex<SerialPort>,
    }

    impl DebugSink for SerialSink {
        fn emit(&self, message: fmt::Arguments) {
            use fmt::Write;
            let _ = self.port.lock().write_fmt(message);
        }
    }

    lazy_static! {
        static ref SERIAL: SerialSink = SerialSink {
            port: Mutex::new(unsafe { SerialPort::new(COM1) }),
        };
    }

    /// Initialize COM1 and make it the kernel debug sink.
    pub fn init() {
        SERIAL.port.lock().init();
        super::set_sink(&*SERIAL);
    }
}

#[cfg(target_arch = "x86_64")]
pub use serial::init as init_serial;
