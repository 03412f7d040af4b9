//! I2C implementation using embedded-hal 1.0.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, ErrorKind, I2c};

use crate::traits::{ActuatorBus, BusError, BusErrorKind, RegWidth, RegisterBus};

/// A device at one address on an I2C bus.
///
/// The same type serves the sensor ([`RegisterBus`]) and the focus actuator
/// ([`ActuatorBus`]); open one per device address.
pub struct I2cBus<I2C, D> {
    i2c: I2C,
    address: u8,
    delay: D,
}

impl<I2C, D> I2cBus<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    /// Wrap `i2c`, addressing the 7-bit device `address`.
    pub const fn new(i2c: I2C, address: u8, delay: D) -> Self {
        Self {
            i2c,
            address,
            delay,
        }
    }

    /// Device address.
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Give back the bus and delay.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }
}

fn bus_error<E: embedded_hal::i2c::Error>(err: &E) -> BusError {
    let kind = match err.kind() {
        ErrorKind::NoAcknowledge(_) => BusErrorKind::NotADevice,
        ErrorKind::Overrun => BusErrorKind::ShortTransfer,
        ErrorKind::Bus | ErrorKind::ArbitrationLoss => BusErrorKind::Transfer,
        _ => BusErrorKind::Other,
    };
    BusError::new(kind)
}

impl<I2C, D> RegisterBus for I2cBus<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    fn read(&mut self, address: u16, width: RegWidth) -> Result<u32, BusError> {
        let mut buf = [0u8; 4];
        let data = buf
            .get_mut(..width.bytes())
            .ok_or(BusError::new(BusErrorKind::Other))?;
        self.i2c
            .write_read(self.address, &address.to_be_bytes(), data)
            .map_err(|err| bus_error(&err))?;
        Ok(data
            .iter()
            .fold(0u32, |value, byte| (value << 8) | u32::from(*byte)))
    }

    fn write_burst(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        if bytes.len() < 2 {
            return Err(BusError::new(BusErrorKind::ShortTransfer));
        }
        self.i2c
            .write(self.address, bytes)
            .map_err(|err| bus_error(&err))
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}

impl<I2C, D> ActuatorBus for I2cBus<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    fn write_command(&mut self, command: u8, data: u8) -> Result<(), BusError> {
        self.i2c
            .write(self.address, &[command, data])
            .map_err(|err| bus_error(&err))
    }

    fn read_command(&mut self, command: u8) -> Result<[u8; 2], BusError> {
        let mut data = [0u8; 2];
        self.i2c
            .write_read(self.address, &[command], &mut data)
            .map_err(|err| bus_error(&err))?;
        Ok(data)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}
