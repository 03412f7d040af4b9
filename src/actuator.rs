//! Voice-coil focus actuator.
//!
//! Every transfer is a command byte followed by a data byte. The command
//! byte carries the power and output-enable bits, a 3-bit register select,
//! the ISRC mode bit and the top two bits of a 10-bit value:
//!
//! ```text
//! bit  7    6    5..3   2    1..0
//!      PS   EN   W2..0  M    D9..D8
//! ```

use std::time::Instant;

use tracing::{debug, info, trace};

use crate::config::ActuatorConfig;
use crate::traits::{ActuatorBus, Calibration, Result, SensorError};

/// Drive current, i.e. lens position.
pub const VCM_CURRENT: u8 = 0;
/// Resonance frequency and slew rate.
pub const PARAM_1: u8 = 1;
/// Near point (A).
pub const PARAM_2: u8 = 2;
/// Far point (B).
pub const PARAM_3: u8 = 3;
/// Step time and step resolution.
pub const PARAM_4: u8 = 4;

/// Number of command registers.
pub const REGISTER_COUNT: usize = 5;

/// Lifecycle of the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Not powered up, or powered down.
    #[default]
    Uninitialized,
    /// Parameters written; moves are accepted.
    Initialized,
}

/// Current actuator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorState {
    /// Lifecycle.
    pub lifecycle: Lifecycle,
    /// Last written position.
    pub position: u32,
    /// Near point in use.
    pub point_a: u32,
    /// Far point in use.
    pub point_b: u32,
    /// Time of the last move.
    pub moved_at: Option<Instant>,
    powered: bool,
}

impl ActuatorState {
    fn defaults(config: &ActuatorConfig) -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            position: config.default_focus,
            point_a: config.point_a,
            point_b: config.point_b,
            moved_at: None,
            powered: false,
        }
    }

    /// Whether moves are accepted.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lifecycle == Lifecycle::Initialized
    }
}

/// Resonance frequency field of `PARAM_1`.
#[must_use]
pub const fn rfeq(frequency: u8) -> u16 {
    ((frequency & 0x1f) as u16) << 3
}

/// Slew rate field of `PARAM_1`.
#[must_use]
pub const fn srate(slew: u8) -> u16 {
    (slew & 0x03) as u16
}

/// Step time field of `PARAM_4`.
#[must_use]
pub const fn stime(time: u8) -> u16 {
    (time & 0x1f) as u16
}

/// Step resolution field of `PARAM_4`.
#[must_use]
pub const fn sres(resolution: u8) -> u16 {
    ((resolution & 0x07) as u16) << 5
}

/// Drives the focus actuator.
#[derive(Debug)]
pub struct ActuatorController<A> {
    bus: A,
    config: ActuatorConfig,
    calibration: Option<Calibration>,
    state: ActuatorState,
}

impl<A: ActuatorBus> ActuatorController<A> {
    /// Create an uninitialized controller.
    pub fn new(bus: A, config: ActuatorConfig) -> Self {
        Self {
            bus,
            config,
            calibration: None,
            state: ActuatorState::defaults(&config),
        }
    }

    /// Calibration used by the next power-up and power-down.
    pub fn set_calibration(&mut self, calibration: Option<Calibration>) {
        self.calibration = calibration;
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ActuatorState {
        self.state
    }

    /// Underlying bus.
    pub fn bus_mut(&mut self) -> &mut A {
        &mut self.bus
    }

    /// Far reference from calibration, raised to the smallest usable value.
    #[must_use]
    pub fn far_reference(&self) -> Option<u32> {
        self.calibration
            .map(|c| c.far_focus().max(self.config.min_far_reference()))
    }

    /// Command byte addressing `register` with the top bits of `value`.
    #[must_use]
    pub fn command(&self, register: u8, value: u32) -> u8 {
        let [_, _, hi, _] = value.to_be_bytes();
        u8::from(self.state.powered) << 7
            | 1 << 6
            | (register & 0x07) << 3
            | u8::from(self.config.isrc_mode) << 2
            | (hi & 0x03)
    }

    fn write(&mut self, register: u8, value: u32) -> Result<()> {
        let command = self.command(register, value);
        let [_, _, _, data] = value.to_be_bytes();
        trace!("actuator reg {register} <- {value:#05x} ({command:#04x} {data:#04x})");
        self.bus.write_command(command, data)?;
        Ok(())
    }

    fn read(&mut self, register: u8) -> Result<u32> {
        let command = self.command(register, 0);
        let [hi, lo] = self.bus.read_command(command)?;
        Ok((u32::from(hi & 0x03) << 8) + u32::from(lo))
    }

    /// Reset parameters, apply calibration and write the drive and
    /// parameter registers.
    pub fn power_up(&mut self) -> Result<()> {
        let cfg = self.config;
        self.state = ActuatorState {
            powered: true,
            ..ActuatorState::defaults(&cfg)
        };

        if let Some(far) = self.far_reference() {
            let point_b = far - cfg.orientation_offset - cfg.focus_offset - 1;
            self.state.point_b = point_b;
            self.state.point_a = point_b - cfg.ab_gap;
            debug!(
                "calibrated focus: far {far}, point a {}, point b {point_b}",
                self.state.point_a
            );
        }

        let state = self.state;
        self.write(VCM_CURRENT, state.position)?;
        self.write(
            PARAM_1,
            u32::from(rfeq(cfg.frequency) | srate(cfg.slew_rate)),
        )?;
        self.write(PARAM_2, state.point_a)?;
        self.write(PARAM_3, state.point_b)?;
        self.write(
            PARAM_4,
            u32::from(stime(cfg.step_time) | sres(cfg.step_resolution)),
        )?;

        self.state.lifecycle = Lifecycle::Initialized;
        info!("focus actuator initialized");
        Ok(())
    }

    /// Move the lens. The position is clamped to the drive range.
    pub fn move_to(&mut self, position: i32) -> Result<()> {
        if !self.state.is_initialized() {
            return Err(SensorError::NotReady("focus actuator is not powered up"));
        }
        let position = u32::try_from(position.max(0))
            .unwrap_or(0)
            .min(self.config.max_focus);
        self.write(VCM_CURRENT, position)?;
        self.state.position = position;
        self.state.moved_at = Some(Instant::now());
        Ok(())
    }

    /// Park the lens in linear steps and forget all state.
    ///
    /// Runs regardless of the current lifecycle. The controller is
    /// uninitialized afterwards even when a transfer fails.
    pub fn power_down(&mut self) -> Result<()> {
        let result = self.ramp_down();
        self.state = ActuatorState::defaults(&self.config);
        result
    }

    fn ramp_down(&mut self) -> Result<()> {
        let target = self.far_reference().unwrap_or(0);
        self.write(VCM_CURRENT, target)?;

        let current = self.read(VCM_CURRENT)?;
        let steps = self.config.ramp_steps.max(1);
        let average = current / steps;
        debug!("ramping actuator down from {current} in steps of {average}");
        for i in 1..=steps {
            self.write(VCM_CURRENT, current - average * i)?;
            self.bus.delay_ms(self.config.ramp_settle_ms);
        }
        Ok(())
    }

    /// Values of the five command registers.
    pub fn read_registers(&mut self) -> Result<[u32; REGISTER_COUNT]> {
        let mut values = [0; REGISTER_COUNT];
        for (register, slot) in (0u8..).zip(values.iter_mut()) {
            *slot = self.read(register)?;
        }
        debug!("actuator registers: {values:?}");
        Ok(values)
    }
}
