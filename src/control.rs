//! Typed sensor controls.

use crate::config::SensorConfig;
use crate::mode::RunMode;
use crate::traits::{Result, SensorError};

/// Largest binning factor any mode reports.
pub const BIN_FACTOR_MAX: i32 = 2;

/// Identifier of a control exposed by [`Sensor`](crate::Sensor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlId {
    /// Exposure in lines.
    Exposure,
    /// Analog gain code.
    AnalogGain,
    /// Digital gain code.
    DigitalGain,
    /// Focus actuator drive code.
    FocusAbsolute,
    /// Active mode table.
    RunMode,
    /// Test pattern select.
    TestPattern,
    /// Horizontal binning of the current mode.
    BinFactorHorz,
    /// Vertical binning of the current mode.
    BinFactorVert,
    /// Focal length, `num << 16 | den`.
    FocalLength,
    /// F-number, `num << 16 | den`.
    FNumber,
    /// F-number range, `num << 24 | den << 16 | num << 8 | den`.
    FNumberRange,
    /// CSI-2 link frequency in Hz.
    LinkFrequency,
}

/// A control together with the value to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Control {
    /// Set exposure, keeping the stored gains.
    Exposure(u32),
    /// Set analog gain, keeping the stored exposure and digital gain.
    AnalogGain(u32),
    /// Set digital gain, keeping the stored exposure and analog gain.
    DigitalGain(u32),
    /// Move the focus actuator.
    FocusAbsolute(i32),
    /// Switch the active mode table.
    RunMode(RunMode),
    /// Select a test pattern; 0 disables it.
    TestPattern(u16),
}

impl Control {
    /// Build a control from a raw value.
    ///
    /// Negative exposure, gain and focus values clamp to zero. Read-only
    /// ids are rejected with [`SensorError::UnsupportedControl`].
    pub fn new(id: ControlId, value: i32) -> Result<Self> {
        let unsigned = u32::try_from(value.max(0)).unwrap_or(0);
        match id {
            ControlId::Exposure => Ok(Self::Exposure(unsigned)),
            ControlId::AnalogGain => Ok(Self::AnalogGain(unsigned)),
            ControlId::DigitalGain => Ok(Self::DigitalGain(unsigned)),
            ControlId::FocusAbsolute => Ok(Self::FocusAbsolute(value)),
            ControlId::RunMode => RunMode::from_code(value).map(Self::RunMode),
            ControlId::TestPattern => u16::try_from(value).map(Self::TestPattern).map_err(|_| {
                SensorError::InvalidParameter(format!("test pattern {value} out of range"))
            }),
            read_only => Err(SensorError::UnsupportedControl(read_only)),
        }
    }

    /// Identifier of this control.
    #[must_use]
    pub const fn id(&self) -> ControlId {
        match self {
            Self::Exposure(_) => ControlId::Exposure,
            Self::AnalogGain(_) => ControlId::AnalogGain,
            Self::DigitalGain(_) => ControlId::DigitalGain,
            Self::FocusAbsolute(_) => ControlId::FocusAbsolute,
            Self::RunMode(_) => ControlId::RunMode,
            Self::TestPattern(_) => ControlId::TestPattern,
        }
    }
}

/// Bounds of a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRange {
    /// Smallest value.
    pub min: i32,
    /// Largest value.
    pub max: i32,
    /// Increment.
    pub step: i32,
    /// Value after reset.
    pub default: i32,
}

impl ControlRange {
    const fn fixed(value: i32) -> Self {
        Self {
            min: value,
            max: value,
            step: 1,
            default: value,
        }
    }

    const fn up_to(max: i32, default: i32) -> Self {
        Self {
            min: 0,
            max,
            step: 1,
            default,
        }
    }

    /// Whether `value` lies within the bounds.
    #[must_use]
    pub const fn contains(&self, value: i32) -> bool {
        value >= self.min && value <= self.max
    }
}

impl ControlId {
    /// Every control, in a stable order.
    pub const ALL: [Self; 12] = [
        Self::Exposure,
        Self::AnalogGain,
        Self::DigitalGain,
        Self::FocusAbsolute,
        Self::RunMode,
        Self::TestPattern,
        Self::BinFactorHorz,
        Self::BinFactorVert,
        Self::FocalLength,
        Self::FNumber,
        Self::FNumberRange,
        Self::LinkFrequency,
    ];

    /// Whether the control can only be queried.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(
            self,
            Self::BinFactorHorz
                | Self::BinFactorVert
                | Self::FocalLength
                | Self::FNumber
                | Self::FNumberRange
                | Self::LinkFrequency
        )
    }

    /// Bounds of the control under `config`.
    ///
    /// The link frequency depends on the current mode, so its range spans
    /// the whole non-negative `i32` space.
    #[must_use]
    pub fn range(self, config: &SensorConfig) -> ControlRange {
        let lens = &config.lens;
        match self {
            Self::Exposure => ControlRange::up_to(saturate(config.limits.max_exposure), 0),
            Self::AnalogGain => ControlRange::up_to(saturate(config.limits.max_analog_gain), 0),
            Self::DigitalGain => ControlRange::up_to(saturate(config.limits.max_digital_gain), 0),
            Self::FocusAbsolute => ControlRange::up_to(
                saturate(config.actuator.max_focus),
                saturate(config.actuator.default_focus),
            ),
            Self::RunMode => ControlRange {
                min: RunMode::Video.code(),
                max: RunMode::Preview.code(),
                step: 1,
                default: RunMode::Preview.code(),
            },
            Self::TestPattern => ControlRange::up_to(0xffff, 0),
            Self::BinFactorHorz | Self::BinFactorVert => ControlRange::up_to(BIN_FACTOR_MAX, 0),
            Self::FocalLength => {
                ControlRange::fixed(fraction(lens.focal_length_num, lens.focal_length_den))
            }
            Self::FNumber => ControlRange::fixed(fraction(lens.f_number_num, lens.f_number_den)),
            Self::FNumberRange => {
                ControlRange::fixed(fraction_range(lens.f_number_num, lens.f_number_den))
            }
            Self::LinkFrequency => ControlRange::up_to(i32::MAX, 0),
        }
    }
}

impl RunMode {
    /// Menu code of the run mode (1 video, 2 still, 3 continuous, 4 preview).
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Video => 1,
            Self::Still => 2,
            Self::Continuous => 3,
            Self::Preview => 4,
        }
    }

    /// Run mode for a menu code.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(Self::Video),
            2 => Ok(Self::Still),
            3 => Ok(Self::Continuous),
            4 => Ok(Self::Preview),
            other => Err(SensorError::InvalidParameter(format!(
                "unknown run mode {other}"
            ))),
        }
    }
}

/// `num << 16 | den`.
#[must_use]
pub fn fraction(num: u16, den: u16) -> i32 {
    ((i32::from(num)) << 16) | i32::from(den)
}

/// `num << 24 | den << 16 | num << 8 | den`, using the low byte of each part.
#[must_use]
pub fn fraction_range(num: u16, den: u16) -> i32 {
    let [_, n] = num.to_be_bytes();
    let [_, d] = den.to_be_bytes();
    i32::from_be_bytes([n, d, n, d])
}

fn saturate(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
