use crate::model::SensorKind;
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Development,
    Testing,
    Production,
}

/// `true`, `t` and `1` (any case) are true; everything else is false.
fn parse_flag(value: &str) -> Result<bool, String> {
    Ok(matches!(value.trim().to_lowercase().as_str(), "true" | "t" | "1"))
}

fn parse_hex(value: &str) -> Result<u16, String> {
    let digits = value.trim().trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address {:?}: {}", value, e))
}

#[derive(Debug, Clone, Parser)]
#[command(about = "Averages weather sensor readings and relays them to the backend")]
pub struct Config {
    #[arg(long, env = "ENVIRONMENT", value_enum, default_value_t = Environment::Development)]
    pub environment: Environment,

    /// Log measurements without sending them anywhere
    #[arg(long, env = "READ_ONLY", action = ArgAction::Set, default_value = "false", value_parser = parse_flag)]
    pub read_only: bool,

    /// Filter directive used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "debug")]
    pub log_level: String,

    /// Backend login. Read from API_USER because login shells always set USER
    #[arg(long, env = "API_USER", default_value = "sensors")]
    pub user: String,

    /// Backend password, read from API_PASSWORD alongside API_USER
    #[arg(long, env = "API_PASSWORD", default_value = "123456", hide_env_values = true)]
    pub password: String,

    #[arg(long, env = "ROOT_URL", default_value = "http://localhost:8080")]
    pub root_url: String,

    #[arg(long, env = "SOCKET_URL", default_value = "http://localhost:8080")]
    pub socket_url: String,

    #[arg(long, env = "AIR_EVENT", default_value = "air-measurement")]
    pub air_event: String,

    #[arg(long, env = "GROUND_TEMPERATURE_EVENT", default_value = "ground-temperature")]
    pub ground_temperature_event: String,

    #[arg(long, env = "RAINFALL_EVENT", default_value = "rainfall")]
    pub rainfall_event: String,

    #[arg(long, env = "WIND_EVENT", default_value = "wind-measurement")]
    pub wind_event: String,

    #[arg(long, env = "BME280_SENSOR_ENABLED", action = ArgAction::Set, default_value = "true", value_parser = parse_flag)]
    pub bme280_sensor_enabled: bool,

    #[arg(long, env = "GROUND_TEMPERATURE_SENSOR_ENABLED", action = ArgAction::Set, default_value = "true", value_parser = parse_flag)]
    pub ground_temperature_sensor_enabled: bool,

    #[arg(long, env = "RAIN_GAUGE_ENABLED", action = ArgAction::Set, default_value = "true", value_parser = parse_flag)]
    pub rain_gauge_enabled: bool,

    #[arg(long, env = "ANEMOMETER_ENABLED", action = ArgAction::Set, default_value = "true", value_parser = parse_flag)]
    pub anemometer_enabled: bool,

    /// I2C bus of the BME280
    #[arg(long, env = "BME280_SENSOR_PORT", default_value_t = 1)]
    pub bme280_sensor_port: u8,

    /// I2C address of the BME280, in hex
    #[arg(long, env = "BME280_SENSOR_ADDRESS", default_value = "0x76", value_parser = parse_hex)]
    pub bme280_sensor_address: u16,

    /// BCM GPIO pin of the rain gauge reed switch
    #[arg(long, env = "RAIN_GAUGE_PORT", default_value_t = 6)]
    pub rain_gauge_port: u8,

    /// BCM GPIO pin of the anemometer reed switch
    #[arg(long, env = "ANEMOMETER_PORT", default_value_t = 5)]
    pub anemometer_port: u8,

    #[arg(long, env = "W1_DEVICES_DIR", default_value = "/sys/bus/w1/devices")]
    pub w1_devices_dir: PathBuf,

    #[arg(long, env = "VANE_ADC_DEVICE", default_value = "/sys/bus/iio/devices/iio:device0")]
    pub vane_adc_device: PathBuf,

    #[arg(long, env = "VANE_ADC_CHANNEL", default_value_t = 0)]
    pub vane_adc_channel: u8,

    #[arg(long, env = "MINUTES_BETWEEN_READINGS", default_value_t = 5)]
    pub minutes_between_readings: u64,

    #[arg(long, env = "SECONDS_BETWEEN_SAMPLES", default_value_t = 15)]
    pub seconds_between_samples: u64,

    /// Serve Prometheus metrics on this address when set
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_addr: Option<String>,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn is_testing(&self) -> bool {
        self.environment == Environment::Testing
    }

    fn root(&self) -> &str {
        self.root_url.trim_end_matches('/')
    }

    pub fn auth_url(&self) -> String {
        format!("{}/api/v1/auth/login", self.root())
    }

    pub fn endpoint(&self, kind: SensorKind) -> String {
        format!("{}/api/v1/measurements/{}", self.root(), kind.as_str())
    }

    pub fn event(&self, kind: SensorKind) -> &str {
        match kind {
            SensorKind::Air => &self.air_event,
            SensorKind::GroundTemperature => &self.ground_temperature_event,
            SensorKind::Rainfall => &self.rainfall_event,
            SensorKind::Wind => &self.wind_event,
        }
    }

    pub fn enabled(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Air => self.bme280_sensor_enabled,
            SensorKind::GroundTemperature => self.ground_temperature_sensor_enabled,
            SensorKind::Rainfall => self.rain_gauge_enabled,
            SensorKind::Wind => self.anemometer_enabled,
        }
    }

    /// Time the main loop sleeps while samplers collect readings.
    pub fn cycle_wait(&self) -> Duration {
        match self.environment {
            Environment::Production => Duration::from_secs(self.minutes_between_readings * 60),
            Environment::Testing => Duration::from_secs(1),
            Environment::Development => Duration::from_secs(10),
        }
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.seconds_between_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["station"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flag_parsing() {
        for yes in ["true", "T", "1", "TRUE"] {
            assert_eq!(parse_flag(yes), Ok(true));
        }
        for no in ["false", "0", "yes", ""] {
            assert_eq!(parse_flag(no), Ok(false));
        }
    }

    #[test]
    fn test_hex_address() {
        assert_eq!(parse_hex("0x76"), Ok(0x76));
        assert_eq!(parse_hex("77"), Ok(0x77));
        assert!(parse_hex("0xzz").is_err());
    }

    #[test]
    fn test_derived_urls() {
        let config = parse(&["--root-url", "http://backend:3000/"]);

        assert_eq!(config.auth_url(), "http://backend:3000/api/v1/auth/login");
        assert_eq!(
            config.endpoint(SensorKind::GroundTemperature),
            "http://backend:3000/api/v1/measurements/ground-temperature"
        );
        assert_eq!(config.event(SensorKind::Wind), "wind-measurement");
    }

    #[test]
    fn test_cycle_wait_per_environment() {
        let production = parse(&[
            "--environment",
            "production",
            "--minutes-between-readings",
            "2",
        ]);
        assert_eq!(production.cycle_wait(), Duration::from_secs(120));
        assert!(production.is_production());

        let testing = parse(&["--environment", "testing"]);
        assert_eq!(testing.cycle_wait(), Duration::from_secs(1));
        assert!(testing.is_testing());

        let development = parse(&["--environment", "development"]);
        assert_eq!(development.cycle_wait(), Duration::from_secs(10));
    }

    #[test]
    fn test_credentials_avoid_the_shell_user_variable() {
        use clap::CommandFactory;
        let command = Config::command();
        let env_of = |id: &str| {
            command
                .get_arguments()
                .find(|arg| arg.get_id() == id)
                .and_then(|arg| arg.get_env())
                .map(|name| name.to_string_lossy().into_owned())
        };

        assert_eq!(env_of("user").as_deref(), Some("API_USER"));
        assert_eq!(env_of("password").as_deref(), Some("API_PASSWORD"));
    }

    #[test]
    fn test_edge_sensor_pins() {
        let defaults = parse(&[]);
        assert_eq!((defaults.rain_gauge_port, defaults.anemometer_port), (6, 5));

        let custom = parse(&["--rain-gauge-port", "17", "--anemometer-port", "27"]);
        assert_eq!((custom.rain_gauge_port, custom.anemometer_port), (17, 27));
    }

    #[test]
    fn test_enable_flags() {
        let config = parse(&["--rain-gauge-enabled", "0", "--anemometer-enabled", "t"]);
        assert!(!config.enabled(SensorKind::Rainfall));
        assert!(config.enabled(SensorKind::Wind));
    }
}
