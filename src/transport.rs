//! One-way serial sender.
//!
//! Each `send` opens the device, writes one frame, and closes it again.
//! Nothing is read back and nothing is retried; the controller does not
//! acknowledge frames.

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::error::{Result, TunerError};
use crate::protocol;

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Opens a fresh write channel to the controller.
pub trait ChannelOpener {
    type Channel: Write;

    /// Identity of the device, for messages.
    fn device(&self) -> &str;

    fn open(&self) -> std::io::Result<Self::Channel>;
}

/// Opens the configured serial device, 8N1 without flow control.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    pub port_path: String,
    pub baud_rate: u32,
    /// Wait after opening before writing; boards that reset on open need it.
    pub settle: Duration,
    pub timeout: Duration,
}

impl SerialOpener {
    pub fn new(port_path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_path: port_path.into(),
            baud_rate,
            settle: Duration::ZERO,
            timeout: Duration::from_secs(2),
        }
    }
}

impl ChannelOpener for SerialOpener {
    type Channel = Box<dyn serialport::SerialPort>;

    fn device(&self) -> &str {
        &self.port_path
    }

    fn open(&self) -> std::io::Result<Self::Channel> {
        let port = serialport::new(self.port_path.as_str(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(self.timeout)
            .open()?;
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        Ok(port)
    }
}

/// Frame sender bound to one device. Concurrent sends are serialized.
#[derive(Debug)]
pub struct Transport<O: ChannelOpener = SerialOpener> {
    opener: O,
    busy: Mutex<()>,
}

impl<O: ChannelOpener> Transport<O> {
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            busy: Mutex::new(()),
        }
    }

    pub fn device(&self) -> &str {
        self.opener.device()
    }

    /// Write `frame` in one operation. The channel is closed before this
    /// returns, whether the write succeeded or not.
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        // a panicked sender cannot leave the device half-owned, the channel is dropped
        let _guard = self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let unavailable = |e: std::io::Error| TunerError::TransportUnavailable {
            device: self.device().to_string(),
            reason: e.to_string(),
        };

        let mut channel = self.opener.open().map_err(unavailable)?;
        let written = channel.write_all(frame).and_then(|_| channel.flush());
        drop(channel);

        match written {
            Ok(()) => {
                log::info!(target: "transport", "Sent {} bytes to {}: {}", frame.len(), self.device(), protocol::to_hex(frame));
                Ok(())
            }
            Err(e) => {
                log::warn!(target: "transport", "Write to {} failed: {}", self.device(), e);
                Err(unavailable(e))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory channel that records writes and counts open/close.
    #[derive(Clone, Default)]
    pub(crate) struct FakeOpener {
        pub written: Arc<Mutex<Vec<Vec<u8>>>>,
        pub opened: Arc<AtomicUsize>,
        pub closed: Arc<AtomicUsize>,
        pub fail_open: bool,
        pub fail_write: bool,
    }

    pub(crate) struct FakeChannel {
        owner: FakeOpener,
        buf: Vec<u8>,
    }

    impl Write for FakeChannel {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            if self.owner.fail_write {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.owner.written.lock().unwrap().push(std::mem::take(&mut self.buf));
            Ok(())
        }
    }

    impl Drop for FakeChannel {
        fn drop(&mut self) {
            self.owner.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ChannelOpener for FakeOpener {
        type Channel = FakeChannel;

        fn device(&self) -> &str {
            "/dev/fake0"
        }

        fn open(&self) -> io::Result<FakeChannel> {
            if self.fail_open {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakeChannel { owner: self.clone(), buf: Vec::new() })
        }
    }

    #[test]
    fn test_send_writes_frame_and_closes() {
        let opener = FakeOpener::default();
        let transport = Transport::new(opener.clone());
        transport.send(b"g\x05").unwrap();
        transport.send(b"g\x06").unwrap();
        assert_eq!(*opener.written.lock().unwrap(), vec![b"g\x05".to_vec(), b"g\x06".to_vec()]);
        assert_eq!(opener.opened.load(Ordering::SeqCst), 2);
        assert_eq!(opener.closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_write_still_releases_channel() {
        let opener = FakeOpener { fail_write: true, ..Default::default() };
        let transport = Transport::new(opener.clone());
        let err = transport.send(b"c\x01").unwrap_err();
        assert!(matches!(err, TunerError::TransportUnavailable { .. }));
        assert_eq!(opener.opened.load(Ordering::SeqCst), 1);
        assert_eq!(opener.closed.load(Ordering::SeqCst), 1);
        assert!(opener.written.lock().unwrap().is_empty());
        // the device lock was released too
        assert!(transport.busy.try_lock().is_ok());
    }

    #[test]
    fn test_absent_device_is_unavailable() {
        let opener = FakeOpener { fail_open: true, ..Default::default() };
        let transport = Transport::new(opener.clone());
        match transport.send(b"d").unwrap_err() {
            TunerError::TransportUnavailable { device, .. } => assert_eq!(device, "/dev/fake0"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(opener.closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_serial_device() {
        let transport = Transport::new(SerialOpener::new("/dev/stage-tuner-does-not-exist", DEFAULT_BAUD_RATE));
        assert!(matches!(
            transport.send(b"g\x00"),
            Err(TunerError::TransportUnavailable { .. })
        ));
    }
}
