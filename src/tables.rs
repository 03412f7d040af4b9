//! Built-in register programs and mode tables for the OV8865.

use crate::mode::{FpsVariant, ModeEntry, ModeTable, ModeTables, SizeOverride};
use crate::regs::RegisterProgram;
use crate::traits::Result;

/// Aspect tolerance of the preview and video tables (Q13).
pub const PREVIEW_TOLERANCE: u32 = 800;
/// Aspect tolerance of the still table (Q13).
pub const STILL_TOLERANCE: u32 = 500;

const HTS: u16 = 0x0794;
const VTS_30FPS: u16 = 0x09aa;
const VTS_15FPS: u16 = 0x1354;
const VTS_10FPS: u16 = 0x1cfe;

/// Registers written once after power-up: PLL, analog and ISP defaults.
#[must_use]
pub fn basic_settings() -> RegisterProgram {
    RegisterProgram::new()
        .write8(0x0100, 0x00)
        .write8(0x0103, 0x01)
        .delay(5)
        // PLL
        .write8(0x0300, 0x05)
        .write8(0x0301, 0x00)
        .write8(0x0302, 0x78)
        .write8(0x0303, 0x00)
        .write8(0x0304, 0x03)
        .write8(0x0305, 0x01)
        .write8(0x0306, 0x01)
        .write8(0x030a, 0x00)
        .write8(0x030b, 0x00)
        .write8(0x030c, 0x00)
        .write8(0x030d, 0x1e)
        .write8(0x030e, 0x00)
        .write8(0x030f, 0x04)
        .write8(0x0312, 0x01)
        .write8(0x031e, 0x0c)
        // MIPI: 4 lanes, 10-bit
        .write8(0x3015, 0x01)
        .write8(0x3018, 0x72)
        .write8(0x3020, 0x93)
        .write8(0x3022, 0x01)
        .write8(0x3031, 0x0a)
        // manual exposure and gain
        .write8(0x3503, 0x00)
        .write16(0x3508, 0x0080)
        .write8(0x3700, 0x48)
        .write8(0x3701, 0x18)
        .write8(0x3702, 0x50)
        .write8(0x3703, 0x32)
        .write8(0x3704, 0x28)
        .write8(0x3705, 0x00)
        .write8(0x3706, 0x70)
        .write8(0x3707, 0x08)
        // BLC
        .write8(0x4000, 0xf1)
        .write8(0x4001, 0x04)
        .write8(0x4005, 0x10)
        // ISP: LENC and WB on
        .write8(0x5000, 0x96)
        .write8(0x5001, 0x02)
}

fn window(width: u16, height: u16, hts: u16, vts: u16, binned: bool) -> RegisterProgram {
    let (x_inc, y_inc, format1, format2) = if binned {
        (0x31, 0x31, 0x06, 0x01)
    } else {
        (0x11, 0x11, 0x00, 0x00)
    };
    RegisterProgram::new()
        .write16(0x3808, width)
        .write16(0x380a, height)
        .write16(0x380c, hts)
        .write16(0x380e, vts)
        .write8(0x3814, x_inc)
        .write8(0x3815, 0x01)
        .write8(0x3820, format1)
        .write8(0x3821, format2)
        .write8(0x382a, y_inc)
        .write8(0x382b, 0x01)
}

fn variant(fps: u32, lines_per_frame: u16) -> FpsVariant {
    FpsVariant {
        fps,
        pixels_per_line: HTS,
        lines_per_frame,
    }
}

fn binned_4x3() -> ModeEntry {
    ModeEntry {
        width: 1632,
        height: 1224,
        program: window(1632, 1224, HTS, VTS_30FPS, true),
        pixels_per_line: HTS,
        lines_per_frame: VTS_30FPS,
        skip_frames: 1,
        bin_factor_x: 1,
        bin_factor_y: 1,
        mipi_freq_khz: 360_000,
        fps_options: vec![variant(30, VTS_30FPS), variant(15, VTS_15FPS)],
    }
}

fn cropped_16x9() -> ModeEntry {
    ModeEntry {
        width: 1936,
        height: 1096,
        program: window(1936, 1096, HTS, VTS_30FPS, false),
        pixels_per_line: HTS,
        lines_per_frame: VTS_30FPS,
        skip_frames: 1,
        bin_factor_x: 0,
        bin_factor_y: 0,
        mipi_freq_khz: 360_000,
        fps_options: vec![variant(30, VTS_30FPS)],
    }
}

fn full_resolution() -> ModeEntry {
    ModeEntry {
        width: 3264,
        height: 2448,
        program: window(3264, 2448, HTS, VTS_15FPS, false),
        pixels_per_line: HTS,
        lines_per_frame: VTS_15FPS,
        skip_frames: 2,
        bin_factor_x: 0,
        bin_factor_y: 0,
        mipi_freq_khz: 720_000,
        fps_options: vec![variant(15, VTS_15FPS), variant(10, VTS_10FPS)],
    }
}

/// Requests that the ISP crops out of the binned 4:3 mode.
fn isp_crop_overrides() -> Vec<SizeOverride> {
    let to_binned = [
        (1332, 1092),
        (1320, 1080),
        (1280, 720),
        (1292, 732),
        (1024, 576),
        (1036, 588),
        (720, 480),
        (732, 492),
        (640, 360),
        (652, 372),
        (320, 180),
        (332, 192),
    ];
    to_binned
        .into_iter()
        .map(|requested| SizeOverride {
            requested,
            treat_as: (1632, 1224),
        })
        .chain([(1920, 1080), (1932, 1092)].into_iter().map(|requested| {
            SizeOverride {
                requested,
                treat_as: (1936, 1096),
            }
        }))
        .collect()
}

/// Preview, video and still tables.
pub fn ov8865() -> Result<ModeTables> {
    let preview = ModeTable::new(
        vec![binned_4x3(), cropped_16x9(), full_resolution()],
        PREVIEW_TOLERANCE,
    )?
    .with_overrides(isp_crop_overrides());

    let video = ModeTable::new(vec![binned_4x3(), cropped_16x9()], PREVIEW_TOLERANCE)?;

    let mut still_overrides = isp_crop_overrides();
    still_overrides.extend([(176, 144), (188, 156)].into_iter().map(|requested| {
        SizeOverride {
            requested,
            treat_as: (1632, 1224),
        }
    }));
    let still = ModeTable::new(vec![binned_4x3(), full_resolution()], STILL_TOLERANCE)?
        .with_overrides(still_overrides);

    let mut tables = ModeTables::uniform(preview);
    tables.video = std::sync::Arc::new(video);
    tables.still = std::sync::Arc::new(still);
    Ok(tables)
}
