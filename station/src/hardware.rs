//! Sensor drivers backed by Linux sysfs (1-wire and IIO).
//!
//! Edge-triggered inputs (anemometer cups, rain bucket) are not polled here:
//! whatever watches the GPIO line feeds a [`PulseCounter`] or the rain
//! aggregator's tick handle.

use crate::errors::{Error, Result};
use crate::model::{Measurement, SensorKind, WindDirection};
use crate::sensors::SensorReader;
use async_trait::async_trait;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

const W1_THERMOMETER_FAMILY: &str = "28-";
const VANE_REFERENCE_VOLTS: f64 = 3.3;
const ADC_FULL_SCALE: f64 = 1023.0;
const ANEMOMETER_RADIUS_CM: f64 = 9.0;
const ANEMOMETER_ADJUSTMENT: f64 = 1.18;

async fn read_trimmed(kind: SensorKind, path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::sensor(kind, format!("{}: {}", path.display(), e)))
}

async fn read_number(kind: SensorKind, path: &Path) -> Result<f64> {
    let text = read_trimmed(kind, path).await?;
    text.parse::<f64>()
        .map_err(|e| Error::sensor(kind, format!("{}: {:?} is not a number: {}", path.display(), text, e)))
}

/// First directory entry under `dir` whose name starts with `prefix`.
async fn find_entry(kind: SensorKind, dir: &Path, prefix: &str) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::sensor(kind, format!("{}: {}", dir.display(), e)))?;

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::sensor(kind, format!("{}: {}", dir.display(), e)))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(prefix) {
            names.push(name);
        }
    }
    names.sort();

    names
        .into_iter()
        .next()
        .map(|name| dir.join(name))
        .ok_or_else(|| Error::sensor(kind, format!("no {}* device under {}", prefix, dir.display())))
}

/// DS18B20-style probe exposed by the w1-therm kernel driver.
#[derive(Debug, Clone)]
pub struct W1Thermometer {
    devices_dir: PathBuf,
}

impl W1Thermometer {
    pub fn new(devices_dir: impl Into<PathBuf>) -> Self {
        Self {
            devices_dir: devices_dir.into(),
        }
    }
}

#[async_trait]
impl SensorReader for W1Thermometer {
    async fn read(&self) -> Result<Measurement> {
        let kind = SensorKind::GroundTemperature;
        let device = find_entry(kind, &self.devices_dir, W1_THERMOMETER_FAMILY).await?;
        let text = read_trimmed(kind, &device.join("w1_slave")).await?;
        let millis = parse_w1_slave(&text).map_err(|reason| Error::sensor(kind, reason))?;

        Ok(Measurement::ground((millis / 1000.0) as i32))
    }
}

/// Temperature in milli-degrees from the two-line `w1_slave` dump.
fn parse_w1_slave(text: &str) -> std::result::Result<f64, String> {
    let mut lines = text.lines();
    let crc_line = lines.next().ok_or("empty w1_slave")?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(format!("CRC check failed: {}", crc_line));
    }

    let data_line = lines.next().ok_or("missing temperature line")?;
    let (_, value) = data_line
        .split_once("t=")
        .ok_or_else(|| format!("no t= field in {:?}", data_line))?;
    value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("bad temperature {:?}: {}", value, e))
}

/// BME280 bound by the bmp280 IIO driver.
#[derive(Debug, Clone)]
pub struct IioAirSensor {
    i2c_device_dir: PathBuf,
}

impl IioAirSensor {
    pub fn new(bus: u8, address: u16) -> Self {
        Self::at(format!("/sys/bus/i2c/devices/{}-{:04x}", bus, address))
    }

    pub fn at(i2c_device_dir: impl Into<PathBuf>) -> Self {
        Self {
            i2c_device_dir: i2c_device_dir.into(),
        }
    }
}

#[async_trait]
impl SensorReader for IioAirSensor {
    async fn read(&self) -> Result<Measurement> {
        let kind = SensorKind::Air;
        let iio = find_entry(kind, &self.i2c_device_dir, "iio:device").await?;

        let milli_celsius = read_number(kind, &iio.join("in_temp_input")).await?;
        let kilopascal = read_number(kind, &iio.join("in_pressure_input")).await?;
        let milli_percent = read_number(kind, &iio.join("in_humidityrelative_input")).await?;

        Ok(Measurement::air(
            (milli_celsius / 1000.0) as i32,
            (kilopascal * 10.0) as i32,
            (milli_percent / 1000.0) as i32,
        ))
    }
}

/// Cloneable counter for anemometer cup passes.
#[derive(Debug, Clone, Default)]
pub struct PulseCounter(Arc<AtomicU64>);

impl PulseCounter {
    pub fn pulse(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn take(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// Turns pulses counted since the previous read into a speed in km/h.
#[derive(Debug)]
pub struct Anemometer {
    pulses: PulseCounter,
    since: Mutex<Instant>,
}

impl Anemometer {
    pub fn new(pulses: PulseCounter) -> Self {
        Self {
            pulses,
            since: Mutex::new(Instant::now()),
        }
    }

    pub fn speed(&self) -> f64 {
        let now = Instant::now();
        let mut since = self.since.lock().unwrap_or_else(|p| p.into_inner());
        let elapsed = now.duration_since(*since);
        *since = now;
        speed_km_h(self.pulses.take(), elapsed.as_secs_f64())
    }
}

/// Two pulses per revolution.
pub fn speed_km_h(pulses: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    let circumference_km = 2.0 * PI * ANEMOMETER_RADIUS_CM / 100_000.0;
    let rotations = pulses as f64 / 2.0;
    circumference_km * rotations / elapsed_secs * 3600.0 * ANEMOMETER_ADJUSTMENT
}

/// Vane on an ADC channel plus an anemometer.
#[derive(Debug)]
pub struct WindReader {
    adc_device_dir: PathBuf,
    channel: u8,
    anemometer: Anemometer,
}

impl WindReader {
    pub fn new(adc_device_dir: impl Into<PathBuf>, channel: u8, pulses: PulseCounter) -> Self {
        Self {
            adc_device_dir: adc_device_dir.into(),
            channel,
            anemometer: Anemometer::new(pulses),
        }
    }

    async fn direction(&self) -> Result<WindDirection> {
        let path = self
            .adc_device_dir
            .join(format!("in_voltage{}_raw", self.channel));
        let raw = read_number(SensorKind::Wind, &path).await?;
        let volts = raw / ADC_FULL_SCALE * VANE_REFERENCE_VOLTS;
        debug!("Vane ADC raw {}, {:.2} V", raw, volts);

        Ok(WindDirection::from_voltage(volts))
    }
}

#[async_trait]
impl SensorReader for WindReader {
    async fn read(&self) -> Result<Measurement> {
        let direction = self.direction().await?;
        let speed = self.anemometer.speed();

        Ok(Measurement::wind(speed as i32, direction.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("station-{}-{}-{}", name, std::process::id(), nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_w1_slave() {
        let text = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125";
        assert_eq!(parse_w1_slave(text).unwrap(), 23125.0);

        let bad_crc = "72 01 4b 46 7f ff 0e 10 57 : crc=57 NO\n72 01 4b 46 7f ff 0e 10 57 t=23125";
        assert!(parse_w1_slave(bad_crc).is_err());
        assert!(parse_w1_slave("").is_err());
    }

    #[tokio::test]
    async fn test_w1_thermometer_reads_first_probe() {
        let root = scratch_dir("w1");
        let probe = root.join("28-0000075a3c1f");
        std::fs::create_dir_all(&probe).unwrap();
        std::fs::create_dir_all(root.join("w1_bus_master1")).unwrap();
        std::fs::write(
            probe.join("w1_slave"),
            "50 05 4b 46 7f ff 0c 10 1c : crc=1c YES\n50 05 4b 46 7f ff 0c 10 1c t=-1250\n",
        )
        .unwrap();

        let m = W1Thermometer::new(&root).read().await.unwrap();
        assert_eq!(m.temperature, Some(-1));

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_missing_probe_is_a_sensor_error() {
        let root = scratch_dir("w1-empty");
        let err = W1Thermometer::new(&root).read().await.unwrap_err();
        assert!(matches!(
            err,
            Error::SensorRead {
                sensor: SensorKind::GroundTemperature,
                ..
            }
        ));
        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_unlistable_device_dir_names_the_sensor() {
        let root = scratch_dir("iio-file");
        let not_a_dir = root.join("1-0076");
        std::fs::write(&not_a_dir, "").unwrap();

        let err = IioAirSensor::at(&not_a_dir).read().await.unwrap_err();
        assert!(matches!(err, Error::SensorRead { sensor: SensorKind::Air, .. }), "{:?}", err);

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_iio_air_sensor() {
        let root = scratch_dir("iio-air");
        let iio = root.join("iio:device0");
        std::fs::create_dir_all(&iio).unwrap();
        std::fs::write(iio.join("in_temp_input"), "21570\n").unwrap();
        std::fs::write(iio.join("in_pressure_input"), "101.325000\n").unwrap();
        std::fs::write(iio.join("in_humidityrelative_input"), "48312\n").unwrap();

        let m = IioAirSensor::at(&root).read().await.unwrap();
        assert_eq!(m, Measurement::air(21, 1013, 48));

        std::fs::remove_dir_all(root).ok();
    }

    #[tokio::test]
    async fn test_wind_reader_maps_vane_voltage() {
        let root = scratch_dir("vane");
        // 124 / 1023 * 3.3 = 0.4 V
        std::fs::write(root.join("in_voltage0_raw"), "124\n").unwrap();

        let pulses = PulseCounter::default();
        let reader = WindReader::new(&root, 0, pulses.clone());
        let m = reader.read().await.unwrap();
        assert_eq!(m.direction.as_deref(), Some("N"));
        assert_eq!(m.speed, Some(0));

        std::fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_speed_formula() {
        // one revolution per second
        let speed = speed_km_h(2, 1.0);
        let expected = 2.0 * PI * 9.0 / 100_000.0 * 3600.0 * 1.18;
        assert!((speed - expected).abs() < 1e-9);
        assert_eq!(speed_km_h(10, 0.0), 0.0);
    }

    #[test]
    fn test_anemometer_resets_counter() {
        let pulses = PulseCounter::default();
        let anemometer = Anemometer::new(pulses.clone());
        for _ in 0..40 {
            pulses.pulse();
        }
        assert!(anemometer.speed() > 0.0);
        assert_eq!(pulses.take(), 0);
    }
}
