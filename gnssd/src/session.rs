//! Device session lifecycle (C6): open a serial path, put it in raw mode,
//! and run the baud/framing hunt loop until a driver locks onto the
//! byte stream, or every candidate setting has been exhausted.
//!
//! Termios handling follows the pattern real async GNSS readers in the
//! wild use (`optim-enterprises-bv-ac-client`'s `gnss.rs`): raw mode via
//! `nix::sys::termios`, `VMIN`/`VTIME` tuned so a blocking read returns
//! on a timeout instead of hanging forever, the blocking loop itself run
//! inside `tokio::task::spawn_blocking` so it never stalls the runtime.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::fs::OpenOptionsExt;
use std::time::{Duration, Instant};

use nix::sys::stat::{self, SFlag};
use nix::sys::termios::{self, BaudRate, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices};

use crate::driver::DeviceState;
use crate::driver::DriverRegistry;
use crate::error::GnssdError;
use crate::lexer::{LexEvent, Lexer};
use gnssd_proto::packet::PacketType;

/// What kind of endpoint a device path names, discovered at open time so
/// the hunt loop knows whether a line discipline even applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    RegularFile,
    Tcp,
    Pty,
    UsbSerial,
    Rs232,
    BluetoothRfcomm,
}

impl PathKind {
    /// Only real serial lines have a baud rate/framing to hunt for; a
    /// regular file is replayed byte-for-byte and a TCP stream carries
    /// its own framing already, so both skip the termios hunt loop.
    fn needs_line_discipline(self) -> bool {
        !matches!(self, PathKind::RegularFile | PathKind::Tcp)
    }
}

/// Parse `host:port` device paths, gpsd's convention for a network GNSS
/// feed (e.g. an NTRIP-fed receiver bridged over TCP rather than a local
/// tty). Anything that looks like an absolute filesystem path is never
/// treated as one, even if it happens to contain a colon.
fn classify_tcp(path: &str) -> Option<(String, u16)> {
    if path.starts_with('/') {
        return None;
    }
    let (host, port) = path.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

/// Classify a device node by its basename, the same heuristic gpsd's own
/// `serial.c` uses before ever calling `stat()`: it's cheaper and covers
/// the overwhelming majority of real device names.
fn classify_by_name(path: &str) -> Option<PathKind> {
    let base = path.rsplit('/').next().unwrap_or(path);
    if base.starts_with("ttyUSB") || base.starts_with("ttyACM") {
        Some(PathKind::UsbSerial)
    } else if base.starts_with("ttyS") || base.starts_with("ttyAMA") {
        Some(PathKind::Rs232)
    } else if base == "ptmx" || base.starts_with("pts") {
        Some(PathKind::Pty)
    } else if base.starts_with("rfcomm") {
        Some(PathKind::BluetoothRfcomm)
    } else {
        None
    }
}

/// Fallback for device names `classify_by_name` doesn't recognize: `stat`
/// the path and inspect its mode/major number directly.
fn classify_by_stat(path: &str) -> Result<PathKind, GnssdError> {
    let st = stat::stat(path).map_err(|e| GnssdError::io(path, e.into()))?;
    let mode = SFlag::from_bits_truncate(st.st_mode);
    if mode.contains(SFlag::S_IFREG) {
        return Ok(PathKind::RegularFile);
    }
    if mode.contains(SFlag::S_IFCHR) {
        // USB-serial adapters (ftdi_sio, cdc_acm, ...) and onboard UARTs
        // both register as major-188+ character devices on Linux; without
        // a recognizable name this is the best remaining signal, so log
        // it and fall back to the more conservative RS-232 assumption.
        let major = stat::major(st.st_rdev);
        tracing::debug!(path, major, "unrecognized tty device name, classifying by stat");
        return Ok(PathKind::Rs232);
    }
    Err(GnssdError::ConfigWrite { reason: format!("{path}: not a regular file or character device") })
}

fn classify_path(path: &str) -> Result<PathKind, GnssdError> {
    if classify_tcp(path).is_some() {
        return Ok(PathKind::Tcp);
    }
    if let Some(kind) = classify_by_name(path) {
        return Ok(kind);
    }
    classify_by_stat(path)
}

/// The open endpoint behind a [`Session`]: either a local tty/regular
/// file, read and written directly, or a TCP connection to a networked
/// receiver feed.
enum Transport {
    Serial(File),
    Network(TcpStream),
}

impl Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Serial(f) => f.read(buf),
            Transport::Network(s) => s.read(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Transport::Serial(f) => f.write_all(buf),
            Transport::Network(s) => s.write_all(buf),
        }
    }
}

/// Candidate baud rates tried in descending order of how common they are
/// on a modern u-blox receiver's default configuration, matching the
/// order gpsd's `serial.c` hunt table uses.
const HUNT_BAUDS: &[u32] = &[9600, 38400, 4800, 19200, 57600, 115200, 230400];

const HUNT_STOPBITS: &[u8] = &[1, 2];

/// How long to wait for a recognizable frame at one candidate setting
/// before moving to the next.
const HUNT_SETTLE: Duration = Duration::from_millis(1500);

fn baud_rate_const(baud: u32) -> Option<BaudRate> {
    match baud {
        4800 => Some(BaudRate::B4800),
        9600 => Some(BaudRate::B9600),
        19200 => Some(BaudRate::B19200),
        38400 => Some(BaudRate::B38400),
        57600 => Some(BaudRate::B57600),
        115200 => Some(BaudRate::B115200),
        230400 => Some(BaudRate::B230400),
        _ => None,
    }
}

fn configure_termios(fd: &File, baud: u32, stopbits: u8) -> Result<(), GnssdError> {
    let mut tio = termios::tcgetattr(fd).map_err(|e| GnssdError::io("tcgetattr", e.into()))?;

    tio.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ISIG);
    tio.output_flags.remove(OutputFlags::OPOST);
    tio.input_flags.remove(InputFlags::IXON | InputFlags::IXOFF | InputFlags::IXANY | InputFlags::ISTRIP | InputFlags::INPCK);

    tio.control_flags.remove(ControlFlags::CSIZE | ControlFlags::CSTOPB | ControlFlags::PARENB);
    tio.control_flags.insert(ControlFlags::CS8 | ControlFlags::CREAD | ControlFlags::CLOCAL);
    if stopbits == 2 {
        tio.control_flags.insert(ControlFlags::CSTOPB);
    }

    // VMIN=0, VTIME=10 (1.0s): a read call returns as soon as any bytes
    // are available, or after a 1s timeout with zero bytes — never blocks
    // indefinitely, which the hunt loop's settle deadline depends on.
    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 10;

    let rate = baud_rate_const(baud).ok_or_else(|| GnssdError::ConfigWrite {
        reason: format!("unsupported baud rate {baud}"),
    })?;
    termios::cfsetospeed(&mut tio, rate).map_err(|e| GnssdError::io("cfsetospeed", e.into()))?;
    termios::cfsetispeed(&mut tio, rate).map_err(|e| GnssdError::io("cfsetispeed", e.into()))?;

    termios::tcsetattr(fd, SetArg::TCSANOW, &tio).map_err(|e| GnssdError::io("tcsetattr", e.into()))?;
    Ok(())
}

/// Outcome of a successful hunt: the settings that worked (`None` for a
/// transport with no line discipline, e.g. TCP or a replayed regular
/// file) and the name of the driver that recognized the stream.
pub struct Locked {
    pub baud: Option<u32>,
    pub stopbits: Option<u8>,
    pub driver_name: &'static str,
}

/// A device session. Holds the open transport, the lexer's accumulated
/// state, and the per-device model a driver mutates on every recognized
/// frame.
pub struct Session {
    pub path: String,
    pub kind: PathKind,
    transport: Transport,
    lexer: Lexer,
    pub state: DeviceState,
}

impl Session {
    /// Open `path` for raw read/write access. For a TCP path this
    /// connects out; otherwise `O_NOCTTY` keeps the kernel from handing
    /// the device to the process as a controlling terminal, the same
    /// caution every POSIX serial-port opener takes. A serial fd is left
    /// in blocking mode deliberately: once `configure_termios` sets
    /// `VMIN=0`/`VTIME=10`, a blocking `read()` already returns on its
    /// own after at most a second, which is what the hunt loop's and the
    /// watchdog's deadlines are built around.
    pub fn open(path: &str) -> Result<Self, GnssdError> {
        let kind = classify_path(path)?;
        let transport = if kind == PathKind::Tcp {
            let (host, port) = classify_tcp(path)
                .expect("classify_path already confirmed this path is a TCP address");
            let stream = TcpStream::connect((host.as_str(), port)).map_err(|e| GnssdError::io(path, e))?;
            stream.set_nodelay(true).map_err(|e| GnssdError::io(path, e))?;
            Transport::Network(stream)
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY)
                .open(path)
                .map_err(|e| GnssdError::io(path, e))?;
            Transport::Serial(file)
        };
        Ok(Session { path: path.to_string(), kind, transport, lexer: Lexer::new(), state: DeviceState::default() })
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.transport.write_all(bytes)
    }

    /// Run the baud/framing hunt loop: try each candidate setting for up
    /// to [`HUNT_SETTLE`], feeding every byte read through the lexer, and
    /// declare victory the moment some registered driver claims a
    /// completed frame. Blocking; callers run this inside
    /// `spawn_blocking`. Transports with no line discipline (TCP, a
    /// regular file) skip straight to a single listen pass.
    pub fn hunt(&mut self, registry: &DriverRegistry) -> Result<Locked, GnssdError> {
        if !self.kind.needs_line_discipline() {
            self.lexer.reset();
            return match self.settle_and_listen(registry) {
                Some(driver_name) => Ok(Locked { baud: None, stopbits: None, driver_name }),
                None => Err(GnssdError::HuntExhausted),
            };
        }
        for &stopbits in HUNT_STOPBITS {
            for &baud in HUNT_BAUDS {
                let Transport::Serial(file) = &self.transport else {
                    unreachable!("needs_line_discipline() is only true for serial transports")
                };
                configure_termios(file, baud, stopbits)?;
                self.lexer.reset();
                if let Some(driver_name) = self.settle_and_listen(registry) {
                    return Ok(Locked { baud: Some(baud), stopbits: Some(stopbits), driver_name });
                }
            }
        }
        Err(GnssdError::HuntExhausted)
    }

    fn settle_and_listen(&mut self, registry: &DriverRegistry) -> Option<&'static str> {
        let deadline = Instant::now() + HUNT_SETTLE;
        let mut buf = [0u8; 256];
        while Instant::now() < deadline {
            let n = match self.transport.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => 0,
                Err(_) => 0,
            };
            for &byte in &buf[..n] {
                if let Some(LexEvent::Frame { kind, .. }) = self.lexer.feed(byte) {
                    if !kind.is_bad() {
                        if let Some(driver) = registry.find(&kind) {
                            return Some(driver.name());
                        }
                    }
                }
            }
            if n == 0 {
                std::thread::sleep(Duration::from_millis(20));
            }
        }
        None
    }

    /// Feed one byte through the lexer and, if it completes a frame,
    /// dispatch it to whichever driver claims its packet type.
    pub fn dispatch_byte(
        &mut self,
        byte: u8,
        registry: &DriverRegistry,
    ) -> Result<Option<gnssd_proto::packet::UpdateMask>, GnssdError> {
        match self.lexer.feed(byte) {
            Some(LexEvent::Frame { kind, .. }) if !matches!(kind, PacketType::Bad) => {
                if let Some(driver) = registry.find(&kind) {
                    let frame = self.lexer.frame().to_vec();
                    let body = match kind {
                        PacketType::Ubx { .. } => &frame[2..frame.len() - 2], // strip magic+checksum
                        _ => &frame[..],
                    };
                    let mask = driver.parse(body, &mut self.state)?;
                    return Ok(Some(mask));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Pump the device until `stale` elapses with no bytes at all,
    /// calling `on_cycle` with the accumulated device state every time a
    /// driver reports `END_OF_CYCLE`. Blocking; run inside
    /// `spawn_blocking`.
    pub fn run_blocking<F>(&mut self, registry: &DriverRegistry, stale: Duration, mut on_cycle: F)
    where
        F: FnMut(&DeviceState),
    {
        use gnssd_proto::packet::UpdateMask;

        let mut buf = [0u8; 256];
        let mut idle_since = Instant::now();
        loop {
            let n = match self.transport.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => 0,
                Err(_) => 0,
            };
            if n == 0 {
                if idle_since.elapsed() > stale {
                    return;
                }
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            idle_since = Instant::now();
            for &byte in &buf[..n] {
                match self.dispatch_byte(byte, registry) {
                    Ok(Some(mask)) if mask.contains(UpdateMask::END_OF_CYCLE) => on_cycle(&self.state),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(device = %self.path, error = %e, "frame decode error"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hunt_bauds_are_all_representable_as_termios_constants() {
        for &baud in HUNT_BAUDS {
            assert!(baud_rate_const(baud).is_some(), "missing BaudRate mapping for {baud}");
        }
    }

    #[test]
    fn classifies_host_port_as_tcp() {
        assert_eq!(classify_tcp("localhost:2947"), Some(("localhost".to_string(), 2947)));
        assert_eq!(classify_tcp("192.168.1.9:4000"), Some(("192.168.1.9".to_string(), 4000)));
    }

    #[test]
    fn an_absolute_path_is_never_mistaken_for_a_tcp_address() {
        assert_eq!(classify_tcp("/dev/ttyUSB0"), None);
    }

    #[test]
    fn a_bare_device_name_with_no_colon_is_not_tcp() {
        assert_eq!(classify_tcp("ttyUSB0"), None);
    }

    #[test]
    fn classifies_device_names_by_well_known_prefix() {
        assert_eq!(classify_by_name("/dev/ttyUSB0"), Some(PathKind::UsbSerial));
        assert_eq!(classify_by_name("/dev/ttyACM1"), Some(PathKind::UsbSerial));
        assert_eq!(classify_by_name("/dev/ttyS0"), Some(PathKind::Rs232));
        assert_eq!(classify_by_name("/dev/ttyAMA0"), Some(PathKind::Rs232));
        assert_eq!(classify_by_name("/dev/pts/3"), Some(PathKind::Pty));
        assert_eq!(classify_by_name("/dev/ptmx"), Some(PathKind::Pty));
        assert_eq!(classify_by_name("/dev/rfcomm0"), Some(PathKind::BluetoothRfcomm));
        assert_eq!(classify_by_name("/dev/gps0"), None);
    }

    #[test]
    fn only_serial_like_kinds_need_a_line_discipline() {
        assert!(!PathKind::RegularFile.needs_line_discipline());
        assert!(!PathKind::Tcp.needs_line_discipline());
        assert!(PathKind::UsbSerial.needs_line_discipline());
        assert!(PathKind::Rs232.needs_line_discipline());
        assert!(PathKind::Pty.needs_line_discipline());
        assert!(PathKind::BluetoothRfcomm.needs_line_discipline());
    }

    #[test]
    fn classify_path_resolves_a_real_regular_file_via_stat_fallback() {
        let mut tmp = std::env::temp_dir();
        tmp.push("gnssd-session-classify-test.bin");
        std::fs::write(&tmp, b"replay bytes").unwrap();
        let kind = classify_path(tmp.to_str().unwrap()).unwrap();
        assert_eq!(kind, PathKind::RegularFile);
        std::fs::remove_file(&tmp).ok();
    }
}
