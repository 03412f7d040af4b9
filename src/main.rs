//! Pi-cam-sensor binary for probing a camera module on Linux i2c-dev.

use std::error::Error;
use std::thread;
use std::time::Duration;

use linux_embedded_hal::{Delay, I2cdev};
use pi_cam_sensor::{I2cBus, Sensor};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Probe configuration from environment.
struct Config {
    /// i2c-dev node both devices sit on
    bus: String,
    /// Sensor address
    sensor_addr: u8,
    /// Focus actuator address
    vcm_addr: u8,
}

impl Config {
    fn from_env() -> Self {
        let bus = std::env::var("PI_CAM_SENSOR_BUS").unwrap_or_else(|_| "/dev/i2c-1".to_owned());

        let sensor_addr = std::env::var("PI_CAM_SENSOR_ADDR")
            .ok()
            .and_then(|s| parse_addr(&s))
            .unwrap_or(0x36);

        let vcm_addr = std::env::var("PI_CAM_SENSOR_VCM_ADDR")
            .ok()
            .and_then(|s| parse_addr(&s))
            .unwrap_or(0x0c);

        Self {
            bus,
            sensor_addr,
            vcm_addr,
        }
    }
}

fn parse_addr(value: &str) -> Option<u8> {
    let value = value.trim();
    value.strip_prefix("0x").map_or_else(
        || value.parse().ok(),
        |hex| u8::from_str_radix(hex, 16).ok(),
    )
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env();
    info!(
        "sensor {:#04x}, actuator {:#04x} on {}",
        config.sensor_addr, config.vcm_addr, config.bus
    );

    let sensor_bus = I2cBus::new(I2cdev::new(&config.bus)?, config.sensor_addr, Delay);
    let vcm_bus = I2cBus::new(I2cdev::new(&config.bus)?, config.vcm_addr, Delay);
    let sensor = Sensor::ov8865(sensor_bus, vcm_bus)?;

    sensor.power_on()?;
    if let Err(err) = sensor.detect() {
        sensor.power_off()?;
        return Err(err.into());
    }

    for size in sensor.enumerate_frame_sizes() {
        let rates: Vec<String> = sensor
            .enumerate_frame_intervals(size.width, size.height)?
            .iter()
            .map(|i| format!("{}fps", i.fps))
            .collect();
        println!("Mode: {}x{} [{}]", size.width, size.height, rates.join(", "));
    }

    let format = sensor.set_format(1280, 720)?;
    println!(
        "Format: {}x{} {}",
        format.width,
        format.height,
        String::from_utf8_lossy(&format.code.0)
    );
    println!("Skip frames: {}", sensor.skip_frames()?);

    sensor.set_exposure_gain(0x0400, 0x0080, 0)?;
    sensor.set_stream(true)?;
    sensor.set_focus(300)?;
    thread::sleep(Duration::from_secs(2));

    println!(
        "Exposure: {} lines, analog gain {}",
        sensor.read_exposure()?,
        sensor.read_analog_gain()?
    );
    println!("Actuator registers: {:?}", sensor.actuator_registers()?);

    sensor.set_stream(false)?;
    sensor.power_off()?;
    Ok(())
}
