use crate::aggregator::{Aggregator, RainTicks, Sampling};
use crate::api::ApiClient;
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::hardware::{IioAirSensor, PulseCounter, W1Thermometer, WindReader};
use crate::metrics::CYCLE_SECONDS;
use crate::model::{Measurement, SensorKind};
use crate::sensors::{SensorReader, SimulatedReader};
use crate::socket::SocketClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An aggregator and the places its measurements go.
pub struct SensorChannel {
    pub aggregator: Aggregator,
    pub endpoint: String,
    pub event: String,
}

/// Enabled sensors plus the handles an edge source uses to feed them.
pub struct Sensors {
    pub channels: Vec<SensorChannel>,
    pub rain_ticks: Option<RainTicks>,
    pub anemometer_pulses: Option<PulseCounter>,
}

/// Builds one channel per enabled sensor. Production uses the sysfs drivers
/// and an edge-triggered rain gauge; other environments simulate readings.
pub fn build_sensors(config: &Config) -> Sensors {
    let mut channels = Vec::new();
    let mut anemometer_pulses = None;

    for kind in SensorKind::ALL {
        if !config.enabled(kind) {
            debug!("{} sensor disabled", kind);
            continue;
        }
        info!("Adding {} sensor", kind);

        let reader: Arc<dyn SensorReader> = if config.is_production() {
            match kind {
                SensorKind::Air => Arc::new(IioAirSensor::new(
                    config.bme280_sensor_port,
                    config.bme280_sensor_address,
                )),
                SensorKind::GroundTemperature => {
                    Arc::new(W1Thermometer::new(&config.w1_devices_dir))
                }
                SensorKind::Wind => {
                    let pulses = PulseCounter::default();
                    anemometer_pulses = Some(pulses.clone());
                    Arc::new(WindReader::new(
                        &config.vane_adc_device,
                        config.vane_adc_channel,
                        pulses,
                    ))
                }
                SensorKind::Rainfall => Arc::new(SimulatedReader::new(kind)),
            }
        } else {
            Arc::new(SimulatedReader::new(kind))
        };

        let sampling = if kind == SensorKind::Rainfall && config.is_production() {
            Sampling::EdgeTriggered
        } else {
            Sampling::Polled {
                interval: config.sample_interval(),
                single_shot: config.is_testing(),
            }
        };

        channels.push(SensorChannel {
            aggregator: Aggregator::new(kind, reader, sampling),
            endpoint: config.endpoint(kind),
            event: config.event(kind).to_string(),
        });
    }

    let rain_ticks = channels
        .iter()
        .find(|c| c.aggregator.is_edge_triggered())
        .map(|c| c.aggregator.tick_handle());

    Sensors {
        channels,
        rain_ticks,
        anemometer_pulses,
    }
}

/// Outcome of one dispatch cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub measurements: usize,
    pub http_failures: usize,
    pub socket_failures: usize,
    pub dispatched: bool,
}

/// Main loop: wait, average every sensor, fan the results out to both transports.
pub struct Station {
    channels: Vec<SensorChannel>,
    api: ApiClient,
    socket: SocketClient,
    cycle_wait: Duration,
    read_only: bool,
    single_cycle: bool,
}

impl Station {
    pub fn new(
        config: &Config,
        channels: Vec<SensorChannel>,
        api: ApiClient,
        socket: SocketClient,
    ) -> Result<Self> {
        if channels.is_empty() {
            return Err(Error::NoSensorsEnabled);
        }

        Ok(Self {
            channels,
            api,
            socket,
            cycle_wait: config.cycle_wait(),
            read_only: config.read_only,
            single_cycle: config.is_testing(),
        })
    }

    pub fn start_sampling(&self) -> Vec<JoinHandle<()>> {
        self.channels
            .iter()
            .filter_map(|c| c.aggregator.start())
            .collect()
    }

    /// Stops the samplers and flushes the socket.
    pub async fn shutdown(&self) {
        for channel in &self.channels {
            channel.aggregator.stop();
        }
        self.socket.close().await;
    }

    /// Loops forever, or once when running in testing mode.
    pub async fn run(&self) {
        loop {
            info!(
                "Sleeping {} seconds while sensors are getting readings",
                self.cycle_wait.as_secs()
            );
            tokio::time::sleep(self.cycle_wait).await;

            let report = self.cycle().await;
            info!(
                "Cycle finished: {} measurements, {} HTTP failures, {} socket failures",
                report.measurements, report.http_failures, report.socket_failures
            );

            if self.single_cycle {
                break;
            }
        }
    }

    pub async fn cycle(&self) -> CycleReport {
        let timer = CYCLE_SECONDS.start_timer();

        let measurements: Vec<Measurement> = self
            .channels
            .iter()
            .map(|c| c.aggregator.get_measurement())
            .collect();

        for (channel, measurement) in self.channels.iter().zip(&measurements) {
            info!(
                "Measurement obtained from {} sensor: {}",
                channel.aggregator.kind(),
                serde_json::to_string(measurement).unwrap_or_default()
            );
        }

        let mut report = CycleReport {
            measurements: measurements.len(),
            ..Default::default()
        };

        if self.read_only {
            info!("Read only mode enabled. Measurements will not be added nor emitted");
            timer.observe_duration();
            return report;
        }

        let http_batch: Vec<(String, Measurement)> = self
            .channels
            .iter()
            .zip(&measurements)
            .map(|(c, m)| (c.endpoint.clone(), m.clone()))
            .collect();
        let socket_batch: Vec<(String, Measurement)> = self
            .channels
            .iter()
            .zip(measurements)
            .map(|(c, m)| (c.event.clone(), m))
            .collect();

        let (http_results, socket_results) = tokio::join!(
            self.api.add_measurements(&http_batch),
            self.socket.emit_measurements(&socket_batch),
        );

        report.dispatched = true;
        report.http_failures = http_results.iter().filter(|r| r.is_err()).count();
        report.socket_failures = socket_results.iter().filter(|r| r.is_err()).count();
        if report.http_failures + report.socket_failures > 0 {
            warn!(
                "{} of {} deliveries failed this cycle",
                report.http_failures + report.socket_failures,
                http_results.len() + socket_results.len()
            );
        }

        timer.observe_duration();
        report
    }
}
