//! Register programs and single-register access.

use tracing::warn;

use crate::traits::{BusError, BusErrorKind, RegWidth, RegisterBus};

/// One step of a register program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegisterOp {
    /// Write the low 8 bits of `value` to `address`.
    Write8 {
        /// Register address.
        address: u16,
        /// Value; only the low byte is sent.
        value: u32,
    },
    /// Write the low 16 bits of `value` to `address` and `address + 1`.
    Write16 {
        /// Register address of the high byte.
        address: u16,
        /// Value; only the low 16 bits are sent, high byte first.
        value: u32,
    },
    /// Sleep between writes.
    Delay {
        /// Milliseconds to sleep.
        ms: u32,
    },
    /// Stop processing; anything after it is ignored.
    Terminator,
}

impl RegisterOp {
    /// Register width of a write, `None` for directives.
    #[must_use]
    pub const fn width(&self) -> Option<RegWidth> {
        match self {
            Self::Write8 { .. } => Some(RegWidth::Byte),
            Self::Write16 { .. } => Some(RegWidth::Word),
            Self::Delay { .. } | Self::Terminator => None,
        }
    }
}

/// An ordered, immutable list of register operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterProgram {
    ops: Vec<RegisterOp>,
}

impl RegisterProgram {
    /// Create an empty program.
    #[must_use]
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Append an 8-bit write.
    #[must_use]
    pub fn write8(mut self, address: u16, value: u8) -> Self {
        self.ops.push(RegisterOp::Write8 {
            address,
            value: u32::from(value),
        });
        self
    }

    /// Append a 16-bit write.
    #[must_use]
    pub fn write16(mut self, address: u16, value: u16) -> Self {
        self.ops.push(RegisterOp::Write16 {
            address,
            value: u32::from(value),
        });
        self
    }

    /// Append a delay directive.
    #[must_use]
    pub fn delay(mut self, ms: u32) -> Self {
        self.ops.push(RegisterOp::Delay { ms });
        self
    }

    /// The operations in program order.
    #[must_use]
    pub fn ops(&self) -> &[RegisterOp] {
        &self.ops
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the program has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Value an 8-bit write in this program assigns to `address`, if any.
    ///
    /// The last write wins.
    #[must_use]
    pub fn value_of(&self, address: u16) -> Option<u8> {
        self.ops.iter().rev().find_map(|op| match *op {
            RegisterOp::Write8 { address: a, value } if a == address => {
                let [_, _, _, low] = value.to_be_bytes();
                Some(low)
            }
            _ => None,
        })
    }
}

impl From<Vec<RegisterOp>> for RegisterProgram {
    fn from(ops: Vec<RegisterOp>) -> Self {
        Self { ops }
    }
}

impl FromIterator<RegisterOp> for RegisterProgram {
    fn from_iter<T: IntoIterator<Item = RegisterOp>>(iter: T) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

/// Retry behaviour of single-register writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Sleep between attempts in milliseconds.
    pub backoff_ms: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff_ms: 20,
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub const NONE: Self = Self {
        retries: 0,
        backoff_ms: 0,
    };
}

/// Read one register.
pub fn read_reg<B: RegisterBus>(
    bus: &mut B,
    address: u16,
    width: RegWidth,
) -> Result<u32, BusError> {
    bus.read(address, width)
}

/// Write one register as its own transaction, retrying transient failures.
pub fn write_reg<B: RegisterBus>(
    bus: &mut B,
    address: u16,
    width: RegWidth,
    value: u32,
    retry: RetryPolicy,
) -> Result<(), BusError> {
    let mut frame: heapless::Vec<u8, 6> = heapless::Vec::new();
    let data = value.to_be_bytes();
    for byte in address
        .to_be_bytes()
        .iter()
        .chain(data.iter().skip(4 - width.bytes()))
    {
        frame
            .push(*byte)
            .map_err(|_| BusError::new(BusErrorKind::Other))?;
    }

    let mut attempt = 0;
    loop {
        match bus.write_burst(&frame) {
            Ok(()) => return Ok(()),
            Err(err) if attempt < retry.retries => {
                attempt += 1;
                warn!("retrying write to {address:#06x} (attempt {attempt}): {err}");
                bus.delay_ms(retry.backoff_ms);
            }
            Err(err) => return Err(err),
        }
    }
}
