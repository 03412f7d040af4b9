//! Mock buses for testing without hardware.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::traits::{ActuatorBus, BusError, BusErrorKind, RegWidth, RegisterBus};

/// One recorded sensor-bus transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// A burst, including its two address bytes. Failed attempts are recorded too.
    Burst(Vec<u8>),
    /// A register read.
    Read {
        /// Start address.
        address: u16,
        /// Access width.
        width: RegWidth,
    },
    /// A sleep.
    Delay(u32),
}

#[derive(Debug, Default)]
struct BusState {
    registers: BTreeMap<u16, u8>,
    log: Vec<Transaction>,
    fail_next: u32,
    fail_addresses: Vec<u16>,
    fail_reads: bool,
}

/// Sensor register space with auto-increment and a transaction log.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl MockBus {
    /// Create a bus with all registers reading zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R, F: FnOnce(&mut BusState) -> R>(&self, f: F) -> R {
        let mut state = self.state.lock().expect("mock bus lock poisoned");
        f(&mut state)
    }

    /// Preload a register.
    pub fn set_register(&self, address: u16, value: u8) {
        self.with(|s| s.registers.insert(address, value));
    }

    /// Current register content.
    #[must_use]
    pub fn register(&self, address: u16) -> u8 {
        self.with(|s| s.registers.get(&address).copied().unwrap_or(0))
    }

    /// Every transaction so far.
    #[must_use]
    pub fn transactions(&self) -> Vec<Transaction> {
        self.with(|s| s.log.clone())
    }

    /// Burst payloads (address bytes included) in order.
    #[must_use]
    pub fn bursts(&self) -> Vec<Vec<u8>> {
        self.with(|s| {
            s.log
                .iter()
                .filter_map(|t| match t {
                    Transaction::Burst(bytes) => Some(bytes.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    /// Bursts split into start address and data.
    #[must_use]
    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.bursts()
            .into_iter()
            .filter_map(|b| match b.as_slice() {
                [hi, lo, data @ ..] => Some((u16::from_be_bytes([*hi, *lo]), data.to_vec())),
                _ => None,
            })
            .collect()
    }

    /// Sleep durations in order.
    #[must_use]
    pub fn delays(&self) -> Vec<u32> {
        self.with(|s| {
            s.log
                .iter()
                .filter_map(|t| match t {
                    Transaction::Delay(ms) => Some(*ms),
                    _ => None,
                })
                .collect()
        })
    }

    /// Forget the transaction log.
    pub fn clear_log(&self) {
        self.with(|s| s.log.clear());
    }

    /// Fail the next `count` bursts.
    pub fn fail_next_writes(&self, count: u32) {
        self.with(|s| s.fail_next = count);
    }

    /// Fail every burst starting at `address`.
    pub fn fail_writes_at(&self, address: u16) {
        self.with(|s| s.fail_addresses.push(address));
    }

    /// Stop failing reads and writes.
    pub fn heal(&self) {
        self.with(|s| {
            s.fail_next = 0;
            s.fail_addresses.clear();
            s.fail_reads = false;
        });
    }

    /// Fail every read.
    pub fn fail_reads(&self) {
        self.with(|s| s.fail_reads = true);
    }
}

impl RegisterBus for MockBus {
    fn read(&mut self, address: u16, width: RegWidth) -> Result<u32, BusError> {
        self.with(|s| {
            s.log.push(Transaction::Read { address, width });
            if s.fail_reads {
                return Err(BusError::new(BusErrorKind::Timeout));
            }
            let mut value = 0u32;
            for offset in 0..width.bytes() as u16 {
                let byte = s
                    .registers
                    .get(&address.wrapping_add(offset))
                    .copied()
                    .unwrap_or(0);
                value = (value << 8) | u32::from(byte);
            }
            Ok(value)
        })
    }

    fn write_burst(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.with(|s| {
            s.log.push(Transaction::Burst(bytes.to_vec()));
            let [hi, lo, data @ ..] = bytes else {
                return Err(BusError::new(BusErrorKind::ShortTransfer));
            };
            let address = u16::from_be_bytes([*hi, *lo]);
            if s.fail_next > 0 {
                s.fail_next -= 1;
                return Err(BusError::new(BusErrorKind::NotADevice));
            }
            if s.fail_addresses.contains(&address) {
                return Err(BusError::new(BusErrorKind::Transfer));
            }
            for (offset, byte) in data.iter().enumerate() {
                s.registers
                    .insert(address.wrapping_add(offset as u16), *byte);
            }
            Ok(())
        })
    }

    fn delay_ms(&mut self, ms: u32) {
        self.with(|s| s.log.push(Transaction::Delay(ms)));
    }
}

/// One recorded actuator-bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorTransaction {
    /// A command/data write. Failed attempts are recorded too.
    Write {
        /// Command byte.
        command: u8,
        /// Data byte.
        data: u8,
    },
    /// A command read.
    Read(u8),
    /// A sleep.
    Delay(u32),
}

#[derive(Debug, Default)]
struct ActuatorState {
    registers: [u16; 8],
    log: Vec<ActuatorTransaction>,
    writes_before_failure: Option<u32>,
    fail_reads: bool,
}

/// Voice-coil driver register file with a transaction log.
#[derive(Debug, Clone, Default)]
pub struct MockActuator {
    state: Arc<Mutex<ActuatorState>>,
}

impl MockActuator {
    /// Create a driver with all registers at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R, F: FnOnce(&mut ActuatorState) -> R>(&self, f: F) -> R {
        let mut state = self.state.lock().expect("mock actuator lock poisoned");
        f(&mut state)
    }

    /// Content of command register `index`.
    #[must_use]
    pub fn register(&self, index: usize) -> u16 {
        self.with(|s| s.registers.get(index).copied().unwrap_or(0))
    }

    /// Preload command register `index`.
    pub fn set_register(&self, index: usize, value: u16) {
        self.with(|s| {
            if let Some(slot) = s.registers.get_mut(index) {
                *slot = value;
            }
        });
    }

    /// Every transaction so far.
    #[must_use]
    pub fn transactions(&self) -> Vec<ActuatorTransaction> {
        self.with(|s| s.log.clone())
    }

    /// Ten-bit values written to register `index`, in order.
    #[must_use]
    pub fn values_written_to(&self, index: u8) -> Vec<u16> {
        self.with(|s| {
            s.log
                .iter()
                .filter_map(|t| match *t {
                    ActuatorTransaction::Write { command, data }
                        if (command >> 3) & 0x07 == index =>
                    {
                        Some((u16::from(command & 0x03) << 8) | u16::from(data))
                    }
                    _ => None,
                })
                .collect()
        })
    }

    /// Sleep durations in order.
    #[must_use]
    pub fn delays(&self) -> Vec<u32> {
        self.with(|s| {
            s.log
                .iter()
                .filter_map(|t| match t {
                    ActuatorTransaction::Delay(ms) => Some(*ms),
                    _ => None,
                })
                .collect()
        })
    }

    /// Forget the transaction log.
    pub fn clear_log(&self) {
        self.with(|s| s.log.clear());
    }

    /// Let `count` writes succeed, then fail every write.
    pub fn fail_writes_after(&self, count: u32) {
        self.with(|s| s.writes_before_failure = Some(count));
    }

    /// Fail every read.
    pub fn fail_reads(&self) {
        self.with(|s| s.fail_reads = true);
    }
}

impl ActuatorBus for MockActuator {
    fn write_command(&mut self, command: u8, data: u8) -> Result<(), BusError> {
        self.with(|s| {
            s.log.push(ActuatorTransaction::Write { command, data });
            match s.writes_before_failure {
                Some(0) => return Err(BusError::new(BusErrorKind::NotADevice)),
                Some(ref mut n) => *n -= 1,
                None => {}
            }
            let index = usize::from((command >> 3) & 0x07);
            if let Some(slot) = s.registers.get_mut(index) {
                *slot = (u16::from(command & 0x03) << 8) | u16::from(data);
            }
            Ok(())
        })
    }

    fn read_command(&mut self, command: u8) -> Result<[u8; 2], BusError> {
        self.with(|s| {
            s.log.push(ActuatorTransaction::Read(command));
            if s.fail_reads {
                return Err(BusError::new(BusErrorKind::Timeout));
            }
            let index = usize::from((command >> 3) & 0x07);
            let value = s.registers.get(index).copied().unwrap_or(0);
            let [hi, lo] = value.to_be_bytes();
            Ok([hi & 0x03, lo])
        })
    }

    fn delay_ms(&mut self, ms: u32) {
        self.with(|s| s.log.push(ActuatorTransaction::Delay(ms)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_bus_auto_increments() {
        let mut bus = MockBus::new();
        bus.write_burst(&[0x38, 0x08, 0x06, 0x60, 0x04])
            .expect("burst should succeed");
        assert_eq!(bus.register(0x3808), 0x06);
        assert_eq!(bus.register(0x3809), 0x60);
        assert_eq!(bus.register(0x380a), 0x04);
        let value = bus.read(0x3808, RegWidth::Word).expect("read should succeed");
        assert_eq!(value, 0x0660);
    }

    #[test]
    fn test_mock_bus_shared_between_clones() {
        let bus = MockBus::new();
        let mut owned = bus.clone();
        owned.delay_ms(3);
        assert_eq!(bus.delays(), vec![3]);
    }

    #[test]
    fn test_mock_bus_transient_failures() {
        let mut bus = MockBus::new();
        bus.fail_next_writes(1);
        assert!(bus.write_burst(&[0x01, 0x00, 0x01]).is_err());
        assert!(bus.write_burst(&[0x01, 0x00, 0x01]).is_ok());
        assert_eq!(bus.register(0x0100), 0x01);
    }

    #[test]
    fn test_mock_actuator_tracks_current_register() {
        let mut vcm = MockActuator::new();
        vcm.write_command(0x01, 0x2c).expect("write should succeed");
        let data = vcm.read_command(0x00).expect("read should succeed");
        assert_eq!(data, [0x01, 0x2c]);
        assert_eq!(vcm.values_written_to(0), vec![0x012c]);
    }

    #[test]
    fn test_mock_actuator_failure_after_count() {
        let mut vcm = MockActuator::new();
        vcm.fail_writes_after(1);
        assert!(vcm.write_command(0x00, 1).is_ok());
        assert!(vcm.write_command(0x00, 2).is_err());
    }

    #[test]
    fn test_mock_actuator_failing_reads() {
        let mut vcm = MockActuator::new();
        vcm.set_register(2, 0x155);
        assert_eq!(vcm.read_command(0x10).expect("read should succeed"), [0x01, 0x55]);
        vcm.fail_reads();
        assert!(vcm.read_command(0x10).is_err());
    }

    #[test]
    fn test_mock_bus_heal_clears_faults() {
        let mut bus = MockBus::new();
        bus.fail_reads();
        bus.fail_writes_at(0x0100);
        assert!(bus.read(0x0100, RegWidth::Byte).is_err());
        assert!(bus.write_burst(&[0x01, 0x00, 0x01]).is_err());
        bus.heal();
        assert!(bus.write_burst(&[0x01, 0x00, 0x01]).is_ok());
        assert_eq!(bus.read(0x0100, RegWidth::Byte).expect("read should succeed"), 1);
    }
}
