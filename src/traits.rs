//! Core traits and types for register-level sensor control.

use thiserror::Error;

use crate::control::ControlId;

/// Media-bus pixel code (e.g., BG10, BA10, Y10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// 10-bit Bayer BGGR.
    pub const SBGGR10: Self = Self::new(b"BG10");
    /// 10-bit Bayer GRBG.
    pub const SGRBG10: Self = Self::new(b"BA10");
    /// 10-bit greyscale.
    pub const Y10: Self = Self::new(b"Y10 ");
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Sensor output format negotiated from a mode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Media-bus pixel code.
    pub code: FourCC,
}

impl Format {
    /// Create a new format.
    #[must_use]
    pub const fn new(width: u32, height: u32, code: FourCC) -> Self {
        Self {
            width,
            height,
            code,
        }
    }
}

/// One discrete frame size supported by the current mode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// One discrete frame rate of a frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInterval {
    /// Width of the mode the rate belongs to.
    pub width: u32,
    /// Height of the mode the rate belongs to.
    pub height: u32,
    /// Frames per second.
    pub fps: u32,
}

impl FrameInterval {
    /// Time per frame as a V4L2 fraction (`1/fps`).
    #[must_use]
    pub fn interval(&self) -> v4l::Fraction {
        v4l::Fraction::new(1, self.fps)
    }
}

/// Register access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegWidth {
    /// 8-bit register.
    Byte,
    /// 16-bit register, high byte first.
    Word,
    /// 32-bit register, high byte first.
    Long,
}

impl RegWidth {
    /// Number of bytes on the wire.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Long => 4,
        }
    }
}

/// Number of bytes in a calibration (OTP) block.
pub const CALIBRATION_LEN: usize = 32;

/// Calibration data read from the sensor's one-time-programmable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration(pub [u8; CALIBRATION_LEN]);

impl Calibration {
    /// Offset of the two-byte far-focus reference inside the block.
    pub const FAR_FOCUS_OFFSET: usize = 7;

    /// Far-focus reference, stored high byte first.
    #[must_use]
    pub fn far_focus(&self) -> u32 {
        let hi = self.0.get(Self::FAR_FOCUS_OFFSET).copied().unwrap_or(0);
        let lo = self.0.get(Self::FAR_FOCUS_OFFSET + 1).copied().unwrap_or(0);
        u32::from(u16::from_be_bytes([hi, lo]))
    }
}

/// What went wrong on the bus. Callers treat every kind the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusErrorKind {
    /// No device acknowledged the address.
    NotADevice,
    /// Fewer bytes moved than requested.
    ShortTransfer,
    /// The transport gave up waiting.
    Timeout,
    /// Bus-level fault (arbitration loss, bus error).
    Transfer,
    /// Anything else reported by the transport.
    Other,
}

/// Transport-level failure of a single bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("register bus error: {kind:?}")]
pub struct BusError {
    /// Diagnostic detail.
    pub kind: BusErrorKind,
}

impl BusError {
    /// Create a bus error of the given kind.
    #[must_use]
    pub const fn new(kind: BusErrorKind) -> Self {
        Self { kind }
    }
}

/// Error type for sensor operations.
#[derive(Debug, Error)]
pub enum SensorError {
    /// A bus transaction failed.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// A parameter is outside what the hardware or table can express.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The component has not been brought up yet.
    #[error("not ready: {0}")]
    NotReady(&'static str),
    /// No table entry envelops the requested size.
    #[error("no mode envelops {width}x{height}")]
    NoMatch {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
    /// The chip id register did not hold the expected value.
    #[error("unexpected chip id {found:#06x}, expected {expected:#06x}")]
    UnknownChip {
        /// Value read from the sensor.
        found: u16,
        /// Value the configuration expects.
        expected: u16,
    },
    /// The control cannot be used in the requested direction.
    #[error("control {0:?} is not supported here")]
    UnsupportedControl(ControlId),
}

/// Result type for sensor operations.
pub type Result<T> = std::result::Result<T, SensorError>;

/// Register-oriented serial bus of an image sensor (16-bit addresses).
pub trait RegisterBus {
    /// Read a big-endian value of `width` bytes starting at `address`.
    fn read(&mut self, address: u16, width: RegWidth) -> std::result::Result<u32, BusError>;

    /// Send one burst: a big-endian start address followed by register data.
    fn write_burst(&mut self, bytes: &[u8]) -> std::result::Result<(), BusError>;

    /// Block the calling thread for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

/// Command-oriented bus of a voice-coil focus actuator.
///
/// Each command byte selects a register and carries the two high data bits;
/// the following byte carries the low eight.
pub trait ActuatorBus {
    /// Write one command/data pair.
    fn write_command(&mut self, command: u8, data: u8) -> std::result::Result<(), BusError>;

    /// Send a command byte and read two bytes back.
    fn read_command(&mut self, command: u8) -> std::result::Result<[u8; 2], BusError>;

    /// Block the calling thread for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

/// Provider of sensor-resident calibration data.
pub trait CalibrationSource {
    /// Read the calibration block; `None` when unavailable.
    fn read_calibration(&mut self) -> Option<Calibration>;
}

impl CalibrationSource for Option<Calibration> {
    fn read_calibration(&mut self) -> Option<Calibration> {
        *self
    }
}

impl CalibrationSource for Calibration {
    fn read_calibration(&mut self) -> Option<Calibration> {
        Some(*self)
    }
}
