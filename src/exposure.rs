//! Exposure, gain and frame-timing updates.
//!
//! While the sensor streams, every update is wrapped in a group hold so the
//! sensor applies it at the next vertical blanking instead of mid-frame.

use tracing::{debug, warn};

use crate::config::{ExposureLimits, GroupHold, SensorConfig, SensorRegisters};
use crate::regs::{read_reg, write_reg, RetryPolicy};
use crate::traits::{BusError, RegWidth, RegisterBus};

/// Values last applied to the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExposureState {
    /// Exposure in lines.
    pub exposure: u32,
    /// Analog gain code.
    pub analog_gain: u32,
    /// Digital gain code.
    pub digital_gain: u32,
    /// Whether the sensor is streaming.
    pub streaming: bool,
}

/// Horizontal and vertical totals of the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    /// Pixels per line (HTS).
    pub hts: u16,
    /// Lines per frame (VTS).
    pub vts: u16,
}

impl FrameTiming {
    /// Timing stretched so `exposure` fits in one frame with `margin` lines
    /// to spare. VTS saturates at its register width.
    #[must_use]
    pub fn fitted(self, exposure: u32, margin: u32) -> Self {
        let needed = exposure.saturating_add(margin);
        if needed > u32::from(self.vts) {
            Self {
                hts: self.hts,
                vts: u16::try_from(needed).unwrap_or(u16::MAX),
            }
        } else {
            self
        }
    }
}

/// Applies exposure and gain updates.
#[derive(Debug, Clone)]
pub struct ExposureGainController {
    registers: SensorRegisters,
    hold: GroupHold,
    limits: ExposureLimits,
    retry: RetryPolicy,
    state: ExposureState,
}

impl ExposureGainController {
    /// Create a controller with all values at zero and streaming off.
    #[must_use]
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            registers: config.registers,
            hold: config.group_hold,
            limits: config.limits,
            retry: config.retry,
            state: ExposureState::default(),
        }
    }

    /// Last applied values.
    #[must_use]
    pub const fn state(&self) -> ExposureState {
        self.state
    }

    /// Record whether the sensor is streaming.
    pub fn set_streaming(&mut self, streaming: bool) {
        self.state.streaming = streaming;
    }

    /// Forget the applied values. Streaming is left untouched.
    pub fn reset(&mut self) {
        self.state = ExposureState {
            streaming: self.state.streaming,
            ..ExposureState::default()
        };
    }

    /// Clamp `(exposure, analog_gain, digital_gain)` to the sensor limits.
    #[must_use]
    pub fn clamp(&self, exposure: u32, analog_gain: u32, digital_gain: u32) -> (u32, u32, u32) {
        (
            exposure.min(self.limits.max_exposure),
            analog_gain.min(self.limits.max_analog_gain),
            digital_gain.min(self.limits.max_digital_gain),
        )
    }

    /// Apply exposure and gains against `timing`.
    ///
    /// Inputs are clamped first. When streaming, a failed write still
    /// triggers the hold end and launch writes; the first error is
    /// returned. Stored values change only when every write succeeded.
    pub fn set<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        timing: FrameTiming,
        exposure: u32,
        analog_gain: u32,
        digital_gain: u32,
    ) -> Result<(), BusError> {
        let (exposure, analog_gain, digital_gain) =
            self.clamp(exposure, analog_gain, digital_gain);
        let held = self.state.streaming;

        if let Err(err) = self.write_all(bus, held, timing, exposure, analog_gain, digital_gain) {
            if held {
                if let Err(cleanup) = self.launch(bus) {
                    warn!("group hold cleanup failed: {cleanup}");
                }
            }
            return Err(err);
        }

        self.state.exposure = exposure;
        self.state.analog_gain = analog_gain;
        self.state.digital_gain = digital_gain;
        debug!("exposure {exposure} lines, analog gain {analog_gain}, digital gain {digital_gain}");

        if held {
            self.launch(bus)?;
        }
        Ok(())
    }

    fn write_all<B: RegisterBus>(
        &self,
        bus: &mut B,
        held: bool,
        timing: FrameTiming,
        exposure: u32,
        analog_gain: u32,
        digital_gain: u32,
    ) -> Result<(), BusError> {
        let regs = &self.registers;
        if held {
            self.write8(bus, regs.group_access, self.hold.start)?;
        }

        let timing = timing.fitted(exposure, self.limits.integration_margin);
        self.write16(bus, regs.hts, timing.hts)?;
        self.write16(bus, regs.vts, timing.vts)?;

        // low four bits are a fractional field and stay zero
        let [_, high, mid, low] = (exposure << 4).to_be_bytes();
        self.write8(bus, regs.long_exposure, high & 0x0f)?;
        self.write8(bus, regs.long_exposure + 1, mid)?;
        self.write8(bus, regs.long_exposure + 2, low)?;

        if digital_gain != 0 {
            let [_, _, _, top] = (digital_gain >> 6).to_be_bytes();
            let [_, _, _, bottom] = (digital_gain & 0x3f).to_be_bytes();
            self.write8(bus, regs.digital_gain, top)?;
            self.write8(bus, regs.digital_gain + 1, bottom)?;
        }

        let [_, _, gain_hi, gain_lo] = (analog_gain & 0x1fff).to_be_bytes();
        self.write16(bus, regs.analog_gain, u16::from_be_bytes([gain_hi, gain_lo]))
    }

    fn launch<B: RegisterBus>(&self, bus: &mut B) -> Result<(), BusError> {
        self.write8(bus, self.registers.group_access, self.hold.end)?;
        self.write8(bus, self.registers.group_access, self.hold.launch)
    }

    fn write8<B: RegisterBus>(&self, bus: &mut B, address: u16, value: u8) -> Result<(), BusError> {
        write_reg(bus, address, RegWidth::Byte, u32::from(value), self.retry)
    }

    fn write16<B: RegisterBus>(
        &self,
        bus: &mut B,
        address: u16,
        value: u16,
    ) -> Result<(), BusError> {
        write_reg(bus, address, RegWidth::Word, u32::from(value), self.retry)
    }

    /// Exposure in whole lines as currently programmed.
    pub fn read_exposure<B: RegisterBus>(&self, bus: &mut B) -> Result<u32, BusError> {
        let raw = read_reg(bus, self.registers.long_exposure, RegWidth::Byte)?;
        let mid = read_reg(bus, self.registers.long_exposure + 1, RegWidth::Byte)?;
        let low = read_reg(bus, self.registers.long_exposure + 2, RegWidth::Byte)?;
        Ok((((raw & 0x0f) << 16) | ((mid & 0xff) << 8) | (low & 0xff)) >> 4)
    }

    /// Analog gain code as currently programmed.
    pub fn read_analog_gain<B: RegisterBus>(&self, bus: &mut B) -> Result<u32, BusError> {
        Ok(read_reg(bus, self.registers.analog_gain, RegWidth::Word)? & 0x1fff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    use crate::mock::MockBus;

    const TIMING: FrameTiming = FrameTiming {
        hts: 0x0794,
        vts: 0x04e8,
    };

    fn controller() -> ExposureGainController {
        let mut config = SensorConfig::default();
        config.retry = RetryPolicy::NONE;
        ExposureGainController::new(&config)
    }

    fn writes(bus: &MockBus) -> Vec<(u16, Vec<u8>)> {
        bus.writes()
    }

    #[test]
    fn test_register_sequence_when_idle() {
        let mut bus = MockBus::new();
        let mut ctrl = controller();

        ctrl.set(&mut bus, TIMING, 0x0123, 0x0080, 0x0400)
            .expect("set should succeed");

        assert_eq!(
            writes(&bus),
            vec![
                (0x380c, vec![0x07, 0x94]),
                (0x380e, vec![0x04, 0xe8]),
                (0x3500, vec![0x00]),
                (0x3501, vec![0x12]),
                (0x3502, vec![0x30]),
                (0x350a, vec![0x10]),
                (0x350b, vec![0x00]),
                (0x3508, vec![0x00, 0x80]),
            ]
        );
        let state = ctrl.state();
        assert_eq!(
            (state.exposure, state.analog_gain, state.digital_gain),
            (0x0123, 0x0080, 0x0400)
        );
    }

    #[test]
    fn test_streaming_brackets_with_group_hold() {
        let mut bus = MockBus::new();
        let mut ctrl = controller();
        ctrl.set_streaming(true);

        ctrl.set(&mut bus, TIMING, 100, 16, 0).expect("set should succeed");

        let writes = writes(&bus);
        assert_eq!(writes.first(), Some(&(0x3208, vec![0x00])));
        let tail: Vec<_> = writes.iter().rev().take(2).rev().cloned().collect();
        assert_eq!(tail, vec![(0x3208, vec![0x10]), (0x3208, vec![0xa0])]);
    }

    #[test]
    fn test_no_hold_markers_when_not_streaming() {
        let mut bus = MockBus::new();
        let mut ctrl = controller();

        ctrl.set(&mut bus, TIMING, 100, 16, 0).expect("set should succeed");

        assert!(writes(&bus).iter().all(|(address, _)| *address != 0x3208));
    }

    #[test]
    fn test_zero_digital_gain_is_not_written() {
        let mut bus = MockBus::new();
        let mut ctrl = controller();

        ctrl.set(&mut bus, TIMING, 100, 16, 0).expect("set should succeed");

        assert!(writes(&bus)
            .iter()
            .all(|(address, _)| *address != 0x350a && *address != 0x350b));
    }

    #[test]
    fn test_long_exposure_stretches_vts() {
        let mut bus = MockBus::new();
        let mut ctrl = controller();

        ctrl.set(&mut bus, TIMING, 0x0600, 16, 0).expect("set should succeed");

        assert_eq!(bus.register(0x380e), 0x06);
        assert_eq!(bus.register(0x380f), 0x0e);
    }

    #[test]
    fn test_vts_saturates() {
        let timing = TIMING.fitted(0xfffa, 14);
        assert_eq!(timing.vts, u16::MAX);
        assert_eq!(TIMING.fitted(10, 14), TIMING);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(0xffff, 0xffff)]
    #[case(0x1_0000, 0xffff)]
    #[case(u32::MAX, 0xffff)]
    fn test_exposure_clamp(#[case] requested: u32, #[case] applied: u32) {
        let mut bus = MockBus::new();
        let mut ctrl = controller();
        ctrl.set(&mut bus, TIMING, requested, 0, 0).expect("set should succeed");
        assert_eq!(ctrl.state().exposure, applied);
        assert_eq!(ctrl.read_exposure(&mut bus).expect("read"), applied);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(0x1fff, 0x1fff)]
    #[case(0x2000, 0x1fff)]
    #[case(u32::MAX, 0x1fff)]
    fn test_analog_gain_clamp(#[case] requested: u32, #[case] applied: u32) {
        let mut bus = MockBus::new();
        let mut ctrl = controller();
        ctrl.set(&mut bus, TIMING, 0, requested, 0).expect("set should succeed");
        assert_eq!(ctrl.state().analog_gain, applied);
        assert_eq!(ctrl.read_analog_gain(&mut bus).expect("read"), applied);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(0x0fff, 0x0fff)]
    #[case(0x1000, 0x0fff)]
    #[case(u32::MAX, 0x0fff)]
    fn test_digital_gain_clamp(#[case] requested: u32, #[case] applied: u32) {
        let mut bus = MockBus::new();
        let mut ctrl = controller();
        ctrl.set(&mut bus, TIMING, 0, 0, requested).expect("set should succeed");
        assert_eq!(ctrl.state().digital_gain, applied);
    }

    #[test]
    fn test_failure_while_streaming_still_launches() {
        let mut bus = MockBus::new();
        bus.fail_writes_at(0x3501);
        let mut ctrl = controller();
        ctrl.set_streaming(true);

        let result = ctrl.set(&mut bus, TIMING, 100, 16, 0);

        assert!(result.is_err());
        let writes = writes(&bus);
        let tail: Vec<_> = writes.iter().rev().take(2).rev().cloned().collect();
        assert_eq!(tail, vec![(0x3208, vec![0x10]), (0x3208, vec![0xa0])]);
        assert!(writes.iter().all(|(address, _)| *address != 0x3508));
        assert_eq!(ctrl.state().exposure, 0, "state must not change on failure");
    }

    #[test]
    fn test_failed_hold_start_still_attempts_cleanup() {
        let mut bus = MockBus::new();
        bus.fail_next_writes(1);
        let mut ctrl = controller();
        ctrl.set_streaming(true);

        assert!(ctrl.set(&mut bus, TIMING, 100, 16, 0).is_err());

        assert_eq!(
            writes(&bus),
            vec![
                (0x3208, vec![0x00]),
                (0x3208, vec![0x10]),
                (0x3208, vec![0xa0])
            ]
        );
    }

    #[test]
    fn test_failure_when_idle_has_no_cleanup() {
        let mut bus = MockBus::new();
        bus.fail_writes_at(0x380e);
        let mut ctrl = controller();

        assert!(ctrl.set(&mut bus, TIMING, 100, 16, 0).is_err());

        assert_eq!(
            writes(&bus),
            vec![(0x380c, vec![0x07, 0x94]), (0x380e, vec![0x04, 0xe8])]
        );
    }

    #[test]
    fn test_reset_keeps_streaming_flag() {
        let mut bus = MockBus::new();
        let mut ctrl = controller();
        ctrl.set(&mut bus, TIMING, 100, 16, 32).expect("set should succeed");
        ctrl.set_streaming(true);
        ctrl.reset();
        assert_eq!(
            ctrl.state(),
            ExposureState {
                streaming: true,
                ..ExposureState::default()
            }
        );
    }
}
