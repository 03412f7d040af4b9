//! Write coalescing: turns a register program into as few bursts as possible.
//!
//! Writes to strictly consecutive addresses are packed into one burst and
//! rely on the sensor auto-incrementing its register pointer. Program order
//! is never changed; a delay directive or an address discontinuity always
//! ends the current burst.

use tracing::{debug, trace};

use crate::regs::RegisterOp;
use crate::traits::{BusError, BusErrorKind, RegisterBus};

/// Data bytes one burst can carry.
pub const COALESCE_CAPACITY: usize = 200;

/// Spare bytes that must stay free after an append.
const HEADROOM: usize = 2;

const FRAME_CAPACITY: usize = COALESCE_CAPACITY + 2;

/// Bytes buffered for one pending burst.
#[derive(Debug, Default)]
pub struct CoalesceBuffer {
    base_address: u16,
    bytes: heapless::Vec<u8, COALESCE_CAPACITY>,
}

impl CoalesceBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of buffered data bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Address of the first buffered byte.
    #[must_use]
    pub const fn base_address(&self) -> u16 {
        self.base_address
    }

    /// Whether a write at `address` continues the buffered run.
    #[must_use]
    pub fn continues_at(&self, address: u16) -> bool {
        self.is_empty() || u32::from(self.base_address) + self.len() as u32 == u32::from(address)
    }

    /// Whether fewer than the required spare bytes remain.
    #[must_use]
    pub fn near_capacity(&self) -> bool {
        self.len() + HEADROOM >= COALESCE_CAPACITY
    }

    fn append(&mut self, address: u16, data: &[u8]) -> Result<(), BusError> {
        if self.is_empty() {
            self.base_address = address;
        }
        self.bytes.extend_from_slice(data).map_err(|()| overflow())
    }

    /// Emit the buffered run as one burst and reset. Empty buffers are a no-op.
    pub fn flush<B: RegisterBus>(&mut self, bus: &mut B) -> Result<bool, BusError> {
        if self.is_empty() {
            return Ok(false);
        }
        let mut frame: heapless::Vec<u8, FRAME_CAPACITY> = heapless::Vec::new();
        let [hi, lo] = self.base_address.to_be_bytes();
        frame
            .extend_from_slice(&[hi, lo])
            .and_then(|()| frame.extend_from_slice(&self.bytes))
            .map_err(|()| overflow())?;
        self.bytes.clear();
        trace!(
            "burst at {:#06x}, {} data bytes",
            self.base_address,
            frame.len() - 2
        );
        bus.write_burst(&frame)?;
        Ok(true)
    }
}

/// Apply `program` to the sensor, coalescing consecutive writes into bursts.
///
/// The first failed transaction aborts the call. Bytes already flushed stay
/// applied; nothing is retried or rolled back.
pub fn apply<B: RegisterBus>(bus: &mut B, program: &[RegisterOp]) -> Result<(), BusError> {
    let mut buffer = CoalesceBuffer::new();
    let mut bursts = 0usize;

    for op in program {
        match *op {
            RegisterOp::Delay { ms } => {
                bursts += usize::from(buffer.flush(bus)?);
                bus.delay_ms(ms);
            }
            RegisterOp::Write8 { address, value } => {
                let [_, _, _, low] = value.to_be_bytes();
                bursts += push(bus, &mut buffer, address, &[low])?;
            }
            RegisterOp::Write16 { address, value } => {
                let [_, _, high, low] = value.to_be_bytes();
                bursts += push(bus, &mut buffer, address, &[high, low])?;
            }
            RegisterOp::Terminator => break,
        }
    }
    bursts += usize::from(buffer.flush(bus)?);

    debug!("applied {} register ops in {bursts} bursts", program.len());
    Ok(())
}

fn overflow() -> BusError {
    BusError::new(BusErrorKind::Other)
}

fn push<B: RegisterBus>(
    bus: &mut B,
    buffer: &mut CoalesceBuffer,
    address: u16,
    data: &[u8],
) -> Result<usize, BusError> {
    let mut bursts = 0;
    if !buffer.continues_at(address) {
        bursts += usize::from(buffer.flush(bus)?);
    }
    if buffer.append(address, data).is_err() {
        // only reachable if the headroom rule is broken
        bursts += usize::from(buffer.flush(bus)?);
        buffer.append(address, data)?;
    }
    if buffer.near_capacity() {
        bursts += usize::from(buffer.flush(bus)?);
    }
    Ok(bursts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBus, Transaction};
    use crate::regs::RegisterProgram;

    #[test]
    fn test_consecutive_writes_single_burst() {
        let mut bus = MockBus::new();
        let program = RegisterProgram::new()
            .write16(0x3808, 0x0660)
            .write16(0x380a, 0x04c8)
            .write16(0x380c, 0x0794)
            .write16(0x380e, 0x04e8);

        apply(&mut bus, program.ops()).expect("apply should succeed");

        assert_eq!(
            bus.bursts(),
            vec![vec![
                0x38, 0x08, 0x06, 0x60, 0x04, 0xc8, 0x07, 0x94, 0x04, 0xe8
            ]]
        );
        assert_eq!(bus.register(0x380f), 0xe8);
    }

    #[test]
    fn test_mixed_widths_coalesce() {
        let mut bus = MockBus::new();
        let program = RegisterProgram::new()
            .write8(0x3820, 0x06)
            .write16(0x3821, 0x0102)
            .write8(0x3823, 0x07);

        apply(&mut bus, program.ops()).expect("apply should succeed");

        assert_eq!(bus.bursts(), vec![vec![0x38, 0x20, 0x06, 0x01, 0x02, 0x07]]);
    }

    #[test]
    fn test_non_adjacent_writes_two_bursts_in_order() {
        let mut bus = MockBus::new();
        let program = RegisterProgram::new().write8(0x5000, 0x11).write8(0x0100, 0x01);

        apply(&mut bus, program.ops()).expect("apply should succeed");

        assert_eq!(
            bus.bursts(),
            vec![vec![0x50, 0x00, 0x11], vec![0x01, 0x00, 0x01]]
        );
    }

    #[test]
    fn test_backwards_address_breaks_run() {
        let mut bus = MockBus::new();
        let program = RegisterProgram::new().write8(0x3001, 0xaa).write8(0x3000, 0xbb);

        apply(&mut bus, program.ops()).expect("apply should succeed");

        assert_eq!(bus.bursts().len(), 2);
    }

    #[test]
    fn test_delay_forces_flush_and_never_merges() {
        let mut bus = MockBus::new();
        let program = RegisterProgram::new()
            .write8(0x0103, 0x01)
            .delay(5)
            .write8(0x0104, 0x00);

        apply(&mut bus, program.ops()).expect("apply should succeed");

        assert_eq!(
            bus.transactions(),
            vec![
                Transaction::Burst(vec![0x01, 0x03, 0x01]),
                Transaction::Delay(5),
                Transaction::Burst(vec![0x01, 0x04, 0x00]),
            ]
        );
    }

    #[test]
    fn test_leading_delay_emits_no_empty_burst() {
        let mut bus = MockBus::new();
        let program = RegisterProgram::new().delay(2).delay(3);

        apply(&mut bus, program.ops()).expect("apply should succeed");

        assert_eq!(
            bus.transactions(),
            vec![Transaction::Delay(2), Transaction::Delay(3)]
        );
    }

    #[test]
    fn test_terminator_stops_processing() {
        let mut bus = MockBus::new();
        let program: RegisterProgram = vec![
            RegisterOp::Write8 {
                address: 0x0100,
                value: 1,
            },
            RegisterOp::Terminator,
            RegisterOp::Write8 {
                address: 0x0101,
                value: 2,
            },
        ]
        .into();

        apply(&mut bus, program.ops()).expect("apply should succeed");

        assert_eq!(bus.bursts(), vec![vec![0x01, 0x00, 0x01]]);
    }

    #[test]
    fn test_long_run_splits_near_capacity() {
        let mut bus = MockBus::new();
        let program: RegisterProgram = (0..250u16)
            .map(|i| RegisterOp::Write8 {
                address: 0x4000 + i,
                value: u32::from(i),
            })
            .collect();

        apply(&mut bus, program.ops()).expect("apply should succeed");

        let bursts = bus.bursts();
        assert_eq!(bursts.len(), 2);
        let first = bursts.first().expect("first burst");
        assert_eq!(first.len() - 2, COALESCE_CAPACITY - HEADROOM);
        let second = bursts.get(1).expect("second burst");
        let next = 0x4000 + (COALESCE_CAPACITY - HEADROOM) as u16;
        assert_eq!(second.get(..2), Some(&next.to_be_bytes()[..]));
        assert_eq!(bus.register(0x4000 + 249), 249);
    }

    #[test]
    fn test_run_filling_buffer_exactly_is_one_burst() {
        let mut bus = MockBus::new();
        let program: RegisterProgram = (0..(COALESCE_CAPACITY - HEADROOM) as u16)
            .map(|i| RegisterOp::Write8 {
                address: 0x4000 + i,
                value: 0,
            })
            .collect();

        apply(&mut bus, program.ops()).expect("apply should succeed");

        assert_eq!(bus.bursts().len(), 1);
    }

    #[test]
    fn test_failure_aborts_without_retry() {
        let mut bus = MockBus::new();
        bus.fail_writes_at(0x0100);
        let program = RegisterProgram::new()
            .write8(0x3000, 0x01)
            .write8(0x0100, 0x01)
            .write8(0x5000, 0x01);

        let result = apply(&mut bus, program.ops());

        assert!(result.is_err());
        assert_eq!(bus.bursts().len(), 2, "third burst must not be attempted");
        assert_eq!(bus.register(0x3000), 0x01, "earlier bursts stay applied");
    }

    #[test]
    fn test_append_past_capacity_is_an_error() {
        let mut buffer = CoalesceBuffer::new();
        buffer
            .append(0x5000, &[0xaa; COALESCE_CAPACITY])
            .expect("fits exactly");
        assert!(buffer.append(0x50c8, &[0xbb]).is_err());
        assert_eq!(buffer.len(), COALESCE_CAPACITY);
        assert_eq!(buffer.base_address(), 0x5000);
    }

    #[test]
    fn test_empty_program_is_silent() {
        let mut bus = MockBus::new();
        apply(&mut bus, &[]).expect("apply should succeed");
        assert!(bus.transactions().is_empty());
    }
}
