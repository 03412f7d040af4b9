//! Per-sensor handle.
//!
//! One [`Sensor`] owns the register bus, the focus actuator and all mutable
//! state of one physical camera module. Every operation takes the same lock,
//! so exposure updates, mode switches and format changes never interleave on
//! the bus.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::actuator::{ActuatorController, ActuatorState};
use crate::coalesce;
use crate::config::SensorConfig;
use crate::control::{Control, ControlId};
use crate::exposure::{ExposureGainController, ExposureState, FrameTiming};
use crate::mode::{exact, ModeEntry, ModeTable, ModeTables, RunMode};
use crate::regs::{read_reg, write_reg, RegisterProgram};
use crate::tables;
use crate::traits::{
    ActuatorBus, CalibrationSource, Format, FourCC, FrameInterval, FrameSize, RegWidth,
    RegisterBus, Result, SensorError,
};

struct Inner<B, A> {
    bus: B,
    actuator: ActuatorController<A>,
    exposure: ExposureGainController,
    run_mode: RunMode,
    table: Arc<ModeTable>,
    fmt_idx: usize,
    fps_idx: usize,
}

impl<B, A> Inner<B, A> {
    fn entry(&self) -> Result<&ModeEntry> {
        self.table
            .get(self.fmt_idx)
            .ok_or(SensorError::NotReady("mode table is empty"))
    }

    fn timing(&self, fps_idx: usize) -> Result<FrameTiming> {
        let entry = self.entry()?;
        let variant = entry.fps_options.get(fps_idx).ok_or_else(|| {
            SensorError::InvalidParameter(format!("frame rate index {fps_idx} out of range"))
        })?;
        Ok(FrameTiming {
            hts: variant.pixels_per_line,
            vts: variant.lines_per_frame,
        })
    }

    fn select_table(&mut self, table: Arc<ModeTable>) {
        self.table = table;
        self.fmt_idx = 0;
        self.fps_idx = 0;
    }
}

impl<B: RegisterBus, A> Inner<B, A> {
    /// Rewrite exposure and gains with `update` applied to the stored values.
    fn update_exposure<F>(&mut self, update: F) -> Result<()>
    where
        F: FnOnce(ExposureState) -> (u32, u32, u32),
    {
        let timing = self.timing(self.fps_idx)?;
        let (exposure, gain, digital_gain) = update(self.exposure.state());
        self.exposure
            .set(&mut self.bus, timing, exposure, gain, digital_gain)?;
        Ok(())
    }
}

/// Image sensor with its focus actuator.
pub struct Sensor<B, A> {
    config: SensorConfig,
    tables: ModeTables,
    init_program: RegisterProgram,
    inner: Mutex<Inner<B, A>>,
}

impl<B, A> Sensor<B, A>
where
    B: RegisterBus,
    A: ActuatorBus,
{
    /// Create a sensor using the preview table. No bus traffic happens here.
    pub fn new(bus: B, actuator_bus: A, tables: ModeTables, config: SensorConfig) -> Self {
        let table = tables.select(RunMode::Preview);
        Self {
            inner: Mutex::new(Inner {
                bus,
                actuator: ActuatorController::new(actuator_bus, config.actuator),
                exposure: ExposureGainController::new(&config),
                run_mode: RunMode::Preview,
                table,
                fmt_idx: 0,
                fps_idx: 0,
            }),
            config,
            tables,
            init_program: RegisterProgram::new(),
        }
    }

    /// OV8865 with BU64243 actuator and the built-in tables.
    pub fn ov8865(bus: B, actuator_bus: A) -> Result<Self> {
        Ok(
            Self::new(bus, actuator_bus, tables::ov8865()?, SensorConfig::default())
                .with_init_program(tables::basic_settings()),
        )
    }

    /// Program applied by [`init`](Self::init) and [`power_on`](Self::power_on).
    #[must_use]
    pub fn with_init_program(mut self, program: RegisterProgram) -> Self {
        self.init_program = program;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner<B, A>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configuration in use.
    pub const fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// Media-bus code of every mode.
    pub const fn code(&self) -> FourCC {
        self.config.code
    }

    /// Read calibration from `source` for the focus actuator.
    ///
    /// Returns whether calibration is available.
    pub fn load_calibration<C: CalibrationSource>(&self, source: &mut C) -> bool {
        let calibration = source.read_calibration();
        let available = calibration.is_some();
        if !available {
            info!("no calibration data, using default focus range");
        }
        self.lock().actuator.set_calibration(calibration);
        available
    }

    /// Read and check the chip id.
    pub fn detect(&self) -> Result<u16> {
        let mut inner = self.lock();
        let raw = read_reg(&mut inner.bus, self.config.registers.chip_id, RegWidth::Word)?;
        let found = u16::try_from(raw).unwrap_or(u16::MAX);
        info!("chip id {found:#06x}");
        if found != self.config.expected_chip_id {
            return Err(SensorError::UnknownChip {
                found,
                expected: self.config.expected_chip_id,
            });
        }
        Ok(found)
    }

    /// Apply the init program.
    pub fn init(&self) -> Result<()> {
        let mut inner = self.lock();
        coalesce::apply(&mut inner.bus, self.init_program.ops())?;
        Ok(())
    }

    /// Bring up the actuator, then apply the init program.
    pub fn power_on(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.actuator.power_up()?;
        if let Err(err) = coalesce::apply(&mut inner.bus, self.init_program.ops()) {
            if let Err(park) = inner.actuator.power_down() {
                warn!("actuator power-down after failed init: {park}");
            }
            return Err(err.into());
        }
        debug!("sensor powered on");
        Ok(())
    }

    /// Forget exposure values and park the actuator.
    pub fn power_off(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.exposure.reset();
        inner.exposure.set_streaming(false);
        inner.actuator.power_down()
    }

    /// Switch to the table of `mode`.
    pub fn set_run_mode(&self, mode: RunMode) {
        let mut inner = self.lock();
        inner.run_mode = mode;
        inner.select_table(self.tables.select(mode));
        debug!("run mode {mode:?}");
    }

    /// Current run mode.
    pub fn run_mode(&self) -> RunMode {
        self.lock().run_mode
    }

    /// Replace the current table.
    pub fn set_active_table(&self, table: Arc<ModeTable>) {
        self.lock().select_table(table);
    }

    /// Current table.
    pub fn current_table(&self) -> Arc<ModeTable> {
        Arc::clone(&self.lock().table)
    }

    /// Size the sensor would deliver for a request.
    pub fn negotiate_format(&self, width: u32, height: u32) -> Result<(u32, u32)> {
        let inner = self.lock();
        let entry = Self::negotiate(&inner.table, width, height)?;
        Ok((entry.width, entry.height))
    }

    fn negotiate(table: &ModeTable, width: u32, height: u32) -> Result<&ModeEntry> {
        table
            .select(width, height)
            .and_then(|index| table.get(index))
            .ok_or(SensorError::NotReady("mode table is empty"))
    }

    /// Negotiate, reset the sensor and program the chosen mode.
    pub fn set_format(&self, width: u32, height: u32) -> Result<Format> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let table = Arc::clone(&inner.table);
        let entry = Self::negotiate(&table, width, height)?;
        let index = exact(&table, entry.width, entry.height).ok_or(SensorError::NoMatch {
            width: entry.width,
            height: entry.height,
        })?;

        let regs = &self.config.registers;
        write_reg(&mut inner.bus, regs.software_reset, RegWidth::Byte, 1, self.config.retry)?;
        inner.bus.delay_ms(self.config.reset_settle_ms);
        coalesce::apply(&mut inner.bus, entry.program.ops())?;

        inner.fmt_idx = index;
        inner.fps_idx = 0;
        info!(
            "format {width}x{height} -> {}x{} (mode {index})",
            entry.width, entry.height
        );
        Ok(Format::new(entry.width, entry.height, self.config.code))
    }

    /// Format of the current mode.
    pub fn format(&self) -> Result<Format> {
        let inner = self.lock();
        let entry = inner.entry()?;
        Ok(Format::new(entry.width, entry.height, self.config.code))
    }

    /// Program the mode at `index` of the current table.
    pub fn apply_mode(&self, index: usize) -> Result<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let table = Arc::clone(&inner.table);
        let entry = table.get(index).ok_or_else(|| {
            SensorError::InvalidParameter(format!("mode index {index} out of range"))
        })?;
        coalesce::apply(&mut inner.bus, entry.program.ops())?;
        inner.fmt_idx = index;
        inner.fps_idx = 0;
        Ok(())
    }

    /// Start or stop streaming.
    pub fn set_stream(&self, enable: bool) -> Result<()> {
        let mut inner = self.lock();
        write_reg(
            &mut inner.bus,
            self.config.registers.stream,
            RegWidth::Byte,
            u32::from(enable),
            self.config.retry,
        )?;
        inner.exposure.set_streaming(enable);
        info!("streaming {}", if enable { "on" } else { "off" });
        Ok(())
    }

    /// Whether the sensor is streaming.
    pub fn is_streaming(&self) -> bool {
        self.lock().exposure.state().streaming
    }

    /// Apply exposure and gains against the current mode's timing.
    pub fn set_exposure_gain(&self, exposure: u32, gain: u32, digital_gain: u32) -> Result<()> {
        self.lock()
            .update_exposure(|_| (exposure, gain, digital_gain))
    }

    /// Last applied exposure and gains.
    pub fn exposure_state(&self) -> ExposureState {
        self.lock().exposure.state()
    }

    /// Exposure in lines read back from the sensor.
    pub fn read_exposure(&self) -> Result<u32> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        Ok(inner.exposure.read_exposure(&mut inner.bus)?)
    }

    /// Analog gain read back from the sensor.
    pub fn read_analog_gain(&self) -> Result<u32> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        Ok(inner.exposure.read_analog_gain(&mut inner.bus)?)
    }

    /// Move the focus actuator.
    pub fn set_focus(&self, position: i32) -> Result<()> {
        self.lock().actuator.move_to(position)
    }

    /// Focus actuator state.
    pub fn actuator_state(&self) -> ActuatorState {
        self.lock().actuator.state()
    }

    /// Raw values of the actuator command registers.
    pub fn actuator_registers(&self) -> Result<[u32; crate::actuator::REGISTER_COUNT]> {
        self.lock().actuator.read_registers()
    }

    /// Sizes of the current table in table order.
    pub fn enumerate_frame_sizes(&self) -> Vec<FrameSize> {
        self.lock().table.entries().iter().map(ModeEntry::size).collect()
    }

    /// Frame rates of the mode a `width`x`height` request resolves to.
    pub fn enumerate_frame_intervals(&self, width: u32, height: u32) -> Result<Vec<FrameInterval>> {
        let inner = self.lock();
        Ok(Self::negotiate(&inner.table, width, height)?.intervals())
    }

    /// Current frame interval.
    pub fn frame_interval(&self) -> Result<FrameInterval> {
        let inner = self.lock();
        let entry = inner.entry()?;
        let fps = entry
            .fps_options
            .get(inner.fps_idx)
            .map(|v| v.fps)
            .ok_or(SensorError::NotReady("no frame rate selected"))?;
        Ok(FrameInterval {
            width: entry.width,
            height: entry.height,
            fps,
        })
    }

    /// Switch to the frame rate closest to `fps` and retime the exposure.
    pub fn set_frame_interval(&self, fps: u32) -> Result<FrameInterval> {
        if fps == 0 {
            return Err(SensorError::InvalidParameter(
                "frame rate must be non-zero".to_owned(),
            ));
        }
        let mut guard = self.lock();
        let inner = &mut *guard;
        let entry = inner.entry()?;
        let index = entry
            .nearest_fps_index(fps)
            .ok_or(SensorError::NotReady("mode has no frame rates"))?;
        let (width, height) = (entry.width, entry.height);
        if index == inner.fps_idx {
            let fps = entry.fps_options.get(index).map_or(fps, |v| v.fps);
            debug!("frame interval 1/{fps} already active");
            return Ok(FrameInterval { width, height, fps });
        }
        let timing = inner.timing(index)?;

        let state = inner.exposure.state();
        inner.exposure.set(
            &mut inner.bus,
            timing,
            state.exposure,
            state.analog_gain,
            state.digital_gain,
        )?;
        inner.fps_idx = index;

        let interval = FrameInterval {
            width,
            height,
            fps: inner.entry()?.fps_options.get(index).map_or(fps, |v| v.fps),
        };
        debug!("frame interval 1/{} requested 1/{fps}", interval.fps);
        Ok(interval)
    }

    /// Frames to drop after switching to the current mode.
    pub fn skip_frames(&self) -> Result<u32> {
        Ok(self.lock().entry()?.skip_frames)
    }

    /// Set a control.
    pub fn set_control(&self, control: Control) -> Result<()> {
        match control {
            Control::Exposure(exposure) => self
                .lock()
                .update_exposure(|s| (exposure, s.analog_gain, s.digital_gain)),
            Control::AnalogGain(gain) => self
                .lock()
                .update_exposure(|s| (s.exposure, gain, s.digital_gain)),
            Control::DigitalGain(digital_gain) => self
                .lock()
                .update_exposure(|s| (s.exposure, s.analog_gain, digital_gain)),
            Control::FocusAbsolute(position) => self.set_focus(position),
            Control::RunMode(mode) => {
                self.set_run_mode(mode);
                Ok(())
            }
            Control::TestPattern(pattern) => {
                let mut inner = self.lock();
                write_reg(
                    &mut inner.bus,
                    self.config.registers.test_pattern,
                    RegWidth::Word,
                    u32::from(pattern),
                    self.config.retry,
                )?;
                Ok(())
            }
        }
    }

    /// Current value of a control.
    pub fn control(&self, id: ControlId) -> Result<i32> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let state = inner.exposure.state();
        let value = match id {
            ControlId::Exposure => to_i32(state.exposure),
            ControlId::AnalogGain => to_i32(state.analog_gain),
            ControlId::DigitalGain => to_i32(state.digital_gain),
            ControlId::FocusAbsolute => to_i32(inner.actuator.state().position),
            ControlId::RunMode => inner.run_mode.code(),
            ControlId::TestPattern => to_i32(read_reg(
                &mut inner.bus,
                self.config.registers.test_pattern,
                RegWidth::Word,
            )?),
            ControlId::BinFactorHorz => i32::from(inner.entry()?.bin_factor_x),
            ControlId::BinFactorVert => i32::from(inner.entry()?.bin_factor_y),
            ControlId::FocalLength | ControlId::FNumber | ControlId::FNumberRange => {
                id.range(&self.config).default
            }
            ControlId::LinkFrequency => {
                let khz = inner.entry()?.mipi_freq_khz;
                if khz == 0 {
                    return Err(SensorError::InvalidParameter(
                        "link frequency unknown for this mode".to_owned(),
                    ));
                }
                i32::try_from(u64::from(khz) * 1000).map_err(|_| {
                    SensorError::InvalidParameter(format!("link frequency {khz} kHz too high"))
                })?
            }
        };
        Ok(value)
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
