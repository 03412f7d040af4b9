//! Mode tables and resolution matching.
//!
//! A requested size is rounded up to the smallest table entry that envelops
//! it without stretching the aspect ratio past the table's tolerance. Ratios
//! are Q13 fixed point: `8192` is exactly 1.0.

use std::sync::Arc;

use tracing::debug;

use crate::regs::RegisterProgram;
use crate::traits::{FrameInterval, FrameSize, Result, SensorError};

/// `1.0` in Q13.
pub const Q13_ONE: u64 = 1 << 13;

/// One frame-rate variant of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FpsVariant {
    /// Frames per second.
    pub fps: u32,
    /// Horizontal total size (HTS) at this rate.
    pub pixels_per_line: u16,
    /// Vertical total size (VTS) at this rate.
    pub lines_per_frame: u16,
}

/// One supported sensor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModeEntry {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Registers that switch the sensor into this mode.
    pub program: RegisterProgram,
    /// HTS at the nominal rate.
    pub pixels_per_line: u16,
    /// VTS at the nominal rate.
    pub lines_per_frame: u16,
    /// Frames to drop after switching before output is valid.
    pub skip_frames: u32,
    /// Horizontal binning factor reported to the ISP.
    pub bin_factor_x: u8,
    /// Vertical binning factor reported to the ISP.
    pub bin_factor_y: u8,
    /// CSI-2 link frequency in kHz, 0 when unknown.
    pub mipi_freq_khz: u32,
    /// Frame-rate variants; never empty in a validated table.
    pub fps_options: Vec<FpsVariant>,
}

impl ModeEntry {
    /// Highest valid index into `fps_options`.
    #[must_use]
    pub fn max_fps_index(&self) -> Option<usize> {
        self.fps_options.len().checked_sub(1)
    }

    /// Frame size of this entry.
    #[must_use]
    pub const fn size(&self) -> FrameSize {
        FrameSize {
            width: self.width,
            height: self.height,
        }
    }

    /// Index of the variant closest to `fps`; ties go to the lower index.
    #[must_use]
    pub fn nearest_fps_index(&self, fps: u32) -> Option<usize> {
        self.fps_options
            .iter()
            .enumerate()
            .min_by_key(|(i, v)| (v.fps.abs_diff(fps), *i))
            .map(|(i, _)| i)
    }

    /// Frame intervals of this entry in table order.
    #[must_use]
    pub fn intervals(&self) -> Vec<FrameInterval> {
        self.fps_options
            .iter()
            .map(|v| FrameInterval {
                width: self.width,
                height: self.height,
                fps: v.fps,
            })
            .collect()
    }
}

/// A requested size that should be matched as if it were another size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SizeOverride {
    /// Size as requested by the caller.
    pub requested: (u32, u32),
    /// Size handed to the matcher instead.
    pub treat_as: (u32, u32),
}

/// An ordered set of modes used for one run mode.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModeTable {
    entries: Vec<ModeEntry>,
    tolerance: u32,
    overrides: Vec<SizeOverride>,
}

impl ModeTable {
    /// Build a table, checking that every entry has at least one non-zero
    /// frame rate and that sizes are pairwise distinct.
    pub fn new(entries: Vec<ModeEntry>, tolerance: u32) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.fps_options.is_empty() {
                return Err(SensorError::InvalidParameter(format!(
                    "mode {}x{} has no frame rates",
                    entry.width, entry.height
                )));
            }
            if entry.fps_options.iter().any(|v| v.fps == 0) {
                return Err(SensorError::InvalidParameter(format!(
                    "mode {}x{} lists a zero frame rate",
                    entry.width, entry.height
                )));
            }
            if entries
                .iter()
                .skip(i + 1)
                .any(|other| other.width == entry.width && other.height == entry.height)
            {
                return Err(SensorError::InvalidParameter(format!(
                    "mode {}x{} listed twice",
                    entry.width, entry.height
                )));
            }
        }
        Ok(Self {
            entries,
            tolerance,
            overrides: Vec::new(),
        })
    }

    /// Attach size overrides applied before matching.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Vec<SizeOverride>) -> Self {
        self.overrides = overrides;
        self
    }

    /// An empty table.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: Vec::new(),
            tolerance: 0,
            overrides: Vec::new(),
        }
    }

    /// Entries in table order.
    #[must_use]
    pub fn entries(&self) -> &[ModeEntry] {
        &self.entries
    }

    /// Entry at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ModeEntry> {
        self.entries.get(index)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest allowed aspect-ratio mismatch in Q13 units.
    #[must_use]
    pub const fn tolerance(&self) -> u32 {
        self.tolerance
    }

    /// The size the matcher should use for a request.
    #[must_use]
    pub fn remap(&self, width: u32, height: u32) -> (u32, u32) {
        self.overrides
            .iter()
            .find(|o| o.requested == (width, height))
            .map_or((width, height), |o| o.treat_as)
    }

    /// Index to use for a request: overrides, then best fit, then the last
    /// entry. `None` only for an empty table.
    #[must_use]
    pub fn select(&self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = self.remap(width, height);
        let picked = best_fit(self, w, h).or_else(|| self.len().checked_sub(1));
        debug!("{width}x{height} (matched as {w}x{h}) -> mode {picked:?}");
        picked
    }
}

/// Sensor run mode; picks which table is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RunMode {
    /// Viewfinder.
    #[default]
    Preview,
    /// Video recording.
    Video,
    /// Still capture.
    Still,
    /// Continuous capture.
    Continuous,
}

/// One table per run mode.
#[derive(Debug, Clone)]
pub struct ModeTables {
    /// Preview table.
    pub preview: Arc<ModeTable>,
    /// Video table.
    pub video: Arc<ModeTable>,
    /// Still-capture table.
    pub still: Arc<ModeTable>,
    /// Continuous-capture table.
    pub continuous: Arc<ModeTable>,
}

impl ModeTables {
    /// Use the same table for every run mode.
    #[must_use]
    pub fn uniform(table: ModeTable) -> Self {
        let table = Arc::new(table);
        Self {
            preview: Arc::clone(&table),
            video: Arc::clone(&table),
            still: Arc::clone(&table),
            continuous: table,
        }
    }

    /// Table for `mode`.
    #[must_use]
    pub fn select(&self, mode: RunMode) -> Arc<ModeTable> {
        Arc::clone(match mode {
            RunMode::Preview => &self.preview,
            RunMode::Video => &self.video,
            RunMode::Still => &self.still,
            RunMode::Continuous => &self.continuous,
        })
    }
}

/// Match score of `entry` for a `width`x`height` request; `None` when the
/// entry does not envelop the request or distorts its aspect ratio.
#[must_use]
pub fn score(entry: &ModeEntry, width: u32, height: u32, tolerance: u32) -> Option<u64> {
    if width == 0 || height == 0 {
        return None;
    }
    let w_ratio = (u64::from(entry.width) << 13) / u64::from(width);
    let h_ratio = (u64::from(entry.height) << 13) / u64::from(height);
    if w_ratio < Q13_ONE || h_ratio < Q13_ONE {
        return None;
    }
    let mismatch = ((w_ratio << 13) / h_ratio).abs_diff(Q13_ONE);
    if mismatch > u64::from(tolerance) {
        return None;
    }
    Some(w_ratio + h_ratio)
}

/// Smallest enveloping entry with an acceptable aspect ratio.
#[must_use]
pub fn best_fit(table: &ModeTable, width: u32, height: u32) -> Option<usize> {
    table
        .entries()
        .iter()
        .enumerate()
        .filter_map(|(i, e)| score(e, width, height, table.tolerance()).map(|s| (s, i)))
        .min()
        .map(|(_, i)| i)
}

/// Index of the entry that is exactly `width`x`height`.
#[must_use]
pub fn exact(table: &ModeTable, width: u32, height: u32) -> Option<usize> {
    table
        .entries()
        .iter()
        .position(|e| e.width == width && e.height == height)
}

#[cfg(test)]
pub(crate) fn test_entry(width: u32, height: u32, fps: &[u32]) -> ModeEntry {
    ModeEntry {
        width,
        height,
        program: RegisterProgram::new()
            .write16(0x3808, width as u16)
            .write16(0x380a, height as u16),
        pixels_per_line: 0x0794,
        lines_per_frame: 0x04e8,
        skip_frames: 2,
        bin_factor_x: 1,
        bin_factor_y: 1,
        mipi_freq_khz: 360_000,
        fps_options: fps
            .iter()
            .map(|&fps| FpsVariant {
                fps,
                pixels_per_line: 0x0794,
                lines_per_frame: (0x04e8 * 30u32)
                    .checked_div(fps)
                    .map_or(0x04e8, |vts| vts as u16),
            })
            .collect(),
    }
}
