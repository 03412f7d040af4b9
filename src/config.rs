//! Per-sensor configuration.
//!
//! Defaults describe an OV8865-class sensor paired with a BU64243-class
//! voice-coil driver.

use crate::regs::RetryPolicy;
use crate::traits::FourCC;

/// Register addresses the core writes outside of mode programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorRegisters {
    /// Group-hold control.
    pub group_access: u16,
    /// Horizontal total size, 16-bit.
    pub hts: u16,
    /// Vertical total size, 16-bit.
    pub vts: u16,
    /// First of the three long-exposure registers.
    pub long_exposure: u16,
    /// Analog gain, 16-bit.
    pub analog_gain: u16,
    /// First of the two digital gain registers.
    pub digital_gain: u16,
    /// Streaming on/off.
    pub stream: u16,
    /// Software reset.
    pub software_reset: u16,
    /// Chip id, 16-bit.
    pub chip_id: u16,
    /// Test pattern select, 16-bit.
    pub test_pattern: u16,
}

impl Default for SensorRegisters {
    fn default() -> Self {
        Self {
            group_access: 0x3208,
            hts: 0x380c,
            vts: 0x380e,
            long_exposure: 0x3500,
            analog_gain: 0x3508,
            digital_gain: 0x350a,
            stream: 0x0100,
            software_reset: 0x0103,
            chip_id: 0x300a,
            test_pattern: 0x3070,
        }
    }
}

/// Values written to the group-access register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupHold {
    /// Start latching writes into group 0.
    pub start: u8,
    /// Stop latching.
    pub end: u8,
    /// Apply the latched group at the next frame boundary.
    pub launch: u8,
}

impl Default for GroupHold {
    fn default() -> Self {
        Self {
            start: 0x00,
            end: 0x10,
            launch: 0xa0,
        }
    }
}

/// Ranges the exposure controller clamps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExposureLimits {
    /// Longest exposure in lines.
    pub max_exposure: u32,
    /// Largest analog gain code.
    pub max_analog_gain: u32,
    /// Largest digital gain code.
    pub max_digital_gain: u32,
    /// Lines kept free between exposure and frame length.
    pub integration_margin: u32,
}

impl Default for ExposureLimits {
    fn default() -> Self {
        Self {
            max_exposure: 0xffff,
            max_analog_gain: 0x1fff,
            max_digital_gain: 0x0fff,
            integration_margin: 14,
        }
    }
}

/// Voice-coil driver parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActuatorConfig {
    /// Highest drive code.
    pub max_focus: u32,
    /// Drive code written at power-up.
    pub default_focus: u32,
    /// Default near point.
    pub point_a: u32,
    /// Default far point.
    pub point_b: u32,
    /// Resonance frequency code.
    pub frequency: u8,
    /// Slew rate code.
    pub slew_rate: u8,
    /// Step resolution code.
    pub step_resolution: u8,
    /// Step time code.
    pub step_time: u8,
    /// Use the ISRC (ringing suppression) drive mode.
    pub isrc_mode: bool,
    /// Module-orientation offset subtracted from the far reference.
    pub orientation_offset: u32,
    /// Focus offset subtracted from the far reference.
    pub focus_offset: u32,
    /// Distance between the near and far points.
    pub ab_gap: u32,
    /// Number of steps in the power-down ramp.
    pub ramp_steps: u32,
    /// Sleep after each ramp step in milliseconds.
    pub ramp_settle_ms: u32,
}

impl ActuatorConfig {
    /// Smallest far point that keeps `point_a` non-negative.
    #[must_use]
    pub const fn min_far_reference(&self) -> u32 {
        self.orientation_offset + self.focus_offset + 1 + self.ab_gap
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            max_focus: 1023,
            default_focus: 0xca,
            point_a: 0x2a,
            point_b: 0x52,
            frequency: 0x08,
            slew_rate: 0x03,
            step_resolution: 0x02,
            step_time: 0x01,
            isrc_mode: true,
            orientation_offset: 100,
            focus_offset: 20,
            ab_gap: 160,
            ramp_steps: 10,
            ramp_settle_ms: 5,
        }
    }
}

/// Fixed optics reported through the lens controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LensInfo {
    /// Focal length numerator (mm).
    pub focal_length_num: u16,
    /// Focal length denominator.
    pub focal_length_den: u16,
    /// F-number numerator.
    pub f_number_num: u16,
    /// F-number denominator.
    pub f_number_den: u16,
}

impl Default for LensInfo {
    fn default() -> Self {
        Self {
            focal_length_num: 266,
            focal_length_den: 100,
            f_number_num: 22,
            f_number_den: 10,
        }
    }
}

/// Everything a [`Sensor`](crate::Sensor) needs besides its buses and tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorConfig {
    /// Register map.
    pub registers: SensorRegisters,
    /// Group-hold markers.
    pub group_hold: GroupHold,
    /// Exposure clamps.
    pub limits: ExposureLimits,
    /// Focus actuator.
    pub actuator: ActuatorConfig,
    /// Optics.
    pub lens: LensInfo,
    /// Value the chip id register must hold.
    pub expected_chip_id: u16,
    /// Single-register write retries.
    pub retry: RetryPolicy,
    /// Sleep after a software reset in milliseconds.
    pub reset_settle_ms: u32,
    /// Media-bus pixel code of every mode.
    pub code: FourCC,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            registers: SensorRegisters::default(),
            group_hold: GroupHold::default(),
            limits: ExposureLimits::default(),
            actuator: ActuatorConfig::default(),
            lens: LensInfo::default(),
            expected_chip_id: 0x8865,
            retry: RetryPolicy::default(),
            reset_settle_ms: 5,
            code: FourCC::SBGGR10,
        }
    }
}
