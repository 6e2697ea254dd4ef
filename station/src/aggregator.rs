use crate::aggregate::aggregate;
use crate::metrics::{READINGS_TOTAL, READ_FAILURES_TOTAL};
use crate::model::{Measurement, SensorKind};
use crate::sensors::SensorReader;
use chrono::Local;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How raw readings reach the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    /// Poll the reader, then sleep `interval`. `single_shot` stops the loop
    /// after the first successful append.
    Polled { interval: Duration, single_shot: bool },
    /// Nothing is polled; readings arrive through [`Aggregator::tick_handle`].
    EdgeTriggered,
}

type Buffer = Arc<Mutex<Vec<Measurement>>>;

fn lock(buffer: &Buffer) -> MutexGuard<'_, Vec<Measurement>> {
    buffer.lock().unwrap_or_else(|p| p.into_inner())
}

/// Buffers readings for one sensor and averages them on demand.
pub struct Aggregator {
    kind: SensorKind,
    reader: Arc<dyn SensorReader>,
    sampling: Sampling,
    readings: Buffer,
    averaging: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
}

impl Aggregator {
    pub fn new(kind: SensorKind, reader: Arc<dyn SensorReader>, sampling: Sampling) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            kind,
            reader,
            sampling,
            readings: Arc::new(Mutex::new(Vec::new())),
            averaging: Arc::new(AtomicBool::new(false)),
            stop_tx,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Spawns the background sampling task. Edge-triggered sensors have none.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let (interval, single_shot) = match self.sampling {
            Sampling::Polled {
                interval,
                single_shot,
            } => (interval, single_shot),
            Sampling::EdgeTriggered => {
                info!("{} sensor is edge-triggered, waiting for ticks", self.kind);
                return None;
            }
        };

        info!(
            "Starting {} sampler every {:?} (single_shot={})",
            self.kind, interval, single_shot
        );

        let sampler = Sampler {
            kind: self.kind,
            reader: Arc::clone(&self.reader),
            readings: Arc::clone(&self.readings),
            averaging: Arc::clone(&self.averaging),
            interval,
            single_shot,
        };
        let stop_rx = self.stop_tx.subscribe();

        Some(tokio::spawn(sampler.run(stop_rx)))
    }

    /// Asks the sampling task to exit at its next suspension point.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_edge_triggered(&self) -> bool {
        self.sampling == Sampling::EdgeTriggered
    }

    /// Handle for an interrupt source to record rain bucket tips.
    pub fn tick_handle(&self) -> RainTicks {
        RainTicks {
            kind: self.kind,
            readings: Arc::clone(&self.readings),
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        lock(&self.readings).len()
    }

    /// Averages everything buffered since the previous call and empties the buffer.
    pub fn get_measurement(&self) -> Measurement {
        self.averaging.store(true, Ordering::SeqCst);
        let readings = self.take_readings();

        if readings.is_empty() {
            warn!("No {} readings in this window, reporting zero", self.kind);
        }
        let measurement = aggregate(self.kind, &readings, Local::now().naive_local());
        self.averaging.store(false, Ordering::SeqCst);

        debug!(
            "Averaged {} {} readings into {:?}",
            readings.len(),
            self.kind,
            measurement
        );
        measurement
    }

    fn take_readings(&self) -> Vec<Measurement> {
        std::mem::take(&mut *lock(&self.readings))
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Records rain bucket tips into an aggregator's buffer. Callable from any thread.
#[derive(Clone)]
pub struct RainTicks {
    kind: SensorKind,
    readings: Buffer,
}

impl RainTicks {
    pub fn tick(&self) {
        lock(&self.readings).push(Measurement::rain_tick());
        READINGS_TOTAL.with_label_values(&[self.kind.as_str()]).inc();
    }
}

struct Sampler {
    kind: SensorKind,
    reader: Arc<dyn SensorReader>,
    readings: Buffer,
    averaging: Arc<AtomicBool>,
    interval: Duration,
    single_shot: bool,
}

impl Sampler {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        loop {
            if *stop_rx.borrow() {
                break;
            }

            if self.averaging.load(Ordering::SeqCst) {
                debug!("{} averaging in progress, skipping sample", self.kind);
            } else {
                match self.reader.read().await {
                    Ok(reading) => {
                        debug!("Obtained {} reading: {:?}", self.kind, reading);
                        lock(&self.readings).push(reading);
                        READINGS_TOTAL.with_label_values(&[self.kind.as_str()]).inc();

                        if self.single_shot {
                            break;
                        }
                    }
                    Err(e) => {
                        READ_FAILURES_TOTAL.with_label_values(&[self.kind.as_str()]).inc();
                        error!("Error adding the {} reading to the samples: {}", self.kind, e);
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                // only ever flips to true, and a dropped sender means stop as well
                _ = stop_rx.changed() => break,
            }
        }

        debug!("{} sampler stopped", self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Hands out a fixed sequence, then repeats the last entry.
    struct Scripted {
        kind: SensorKind,
        script: Vec<Option<Measurement>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(kind: SensorKind, script: Vec<Option<Measurement>>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl SensorReader for Scripted {
        async fn read(&self) -> Result<Measurement> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let entry = self.script.get(n).or(self.script.last()).cloned().flatten();
            entry.ok_or_else(|| Error::sensor(self.kind, "scripted failure"))
        }
    }

    fn polled(single_shot: bool) -> Sampling {
        Sampling::Polled {
            interval: Duration::from_millis(5),
            single_shot,
        }
    }

    #[tokio::test]
    async fn test_single_shot_appends_once() {
        let reader = Scripted::new(SensorKind::Air, vec![Some(Measurement::air(20, 1000, 50))]);
        let aggregator = Aggregator::new(SensorKind::Air, reader.clone(), polled(true));

        aggregator.start().unwrap().await.unwrap();

        assert_eq!(aggregator.pending(), 1);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_failures_do_not_stop_sampling() {
        let reader = Scripted::new(
            SensorKind::GroundTemperature,
            vec![None, None, Some(Measurement::ground(8))],
        );
        let aggregator = Aggregator::new(SensorKind::GroundTemperature, reader.clone(), polled(true));

        aggregator.start().unwrap().await.unwrap();

        assert_eq!(reader.calls.load(Ordering::SeqCst), 3);
        assert_eq!(aggregator.get_measurement().temperature, Some(8));
    }

    #[tokio::test]
    async fn test_get_measurement_clears_buffer() {
        let reader = Scripted::new(
            SensorKind::Air,
            vec![
                Some(Measurement::air(20, 1000, 50)),
                Some(Measurement::air(22, 1010, 60)),
            ],
        );
        let aggregator = Aggregator::new(SensorKind::Air, reader, polled(true));
        aggregator.start().unwrap().await.unwrap();
        aggregator.start().unwrap().await.unwrap();

        let m = aggregator.get_measurement();
        assert_eq!(
            (m.temperature, m.pressure, m.humidity),
            (Some(21), Some(1005), Some(55))
        );
        assert_eq!(aggregator.pending(), 0);

        let empty = aggregator.get_measurement();
        assert_eq!(empty.temperature, Some(0));
    }

    #[tokio::test]
    async fn test_stop_ends_continuous_sampler() {
        let reader = Scripted::new(SensorKind::Wind, vec![Some(Measurement::wind(12, "E"))]);
        let aggregator = Aggregator::new(SensorKind::Wind, reader, polled(false));
        let handle = aggregator.start().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        aggregator.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sampler did not stop")
            .unwrap();

        assert!(aggregator.pending() >= 1);
    }

    #[tokio::test]
    async fn test_rain_ticks_become_amount() {
        let reader = Scripted::new(SensorKind::Rainfall, vec![Some(Measurement::rain_tick())]);
        let aggregator = Aggregator::new(SensorKind::Rainfall, reader, Sampling::EdgeTriggered);
        assert!(aggregator.start().is_none());

        let ticks = aggregator.tick_handle();
        for _ in 0..3 {
            ticks.tick();
        }

        assert_eq!(aggregator.get_measurement().amount, Some(1));
        assert_eq!(aggregator.get_measurement().amount, Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ticks_are_counted_exactly_once() {
        let reader = Scripted::new(SensorKind::Rainfall, vec![Some(Measurement::rain_tick())]);
        let aggregator = Arc::new(Aggregator::new(
            SensorKind::Rainfall,
            reader,
            Sampling::EdgeTriggered,
        ));

        const PRODUCERS: usize = 8;
        const TICKS: usize = 500;

        let mut producers = Vec::new();
        for _ in 0..PRODUCERS {
            let ticks = aggregator.tick_handle();
            producers.push(std::thread::spawn(move || {
                for i in 0..TICKS {
                    ticks.tick();
                    if i % 50 == 0 {
                        std::thread::yield_now();
                    }
                }
            }));
        }

        let mut drained = 0;
        while producers.iter().any(|p| !p.is_finished()) {
            drained += aggregator.take_readings().len();
            tokio::task::yield_now().await;
        }
        for producer in producers {
            producer.join().unwrap();
        }
        drained += aggregator.take_readings().len();

        assert_eq!(drained, PRODUCERS * TICKS);
    }

    #[tokio::test]
    async fn test_sampler_skips_while_averaging() {
        let reader = Scripted::new(SensorKind::Air, vec![Some(Measurement::air(1, 2, 3))]);
        let aggregator = Aggregator::new(SensorKind::Air, reader.clone(), polled(false));
        aggregator.averaging.store(true, Ordering::SeqCst);

        let handle = aggregator.start().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(reader.calls.load(Ordering::SeqCst), 0);

        aggregator.averaging.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        aggregator.stop();
        handle.await.unwrap();

        assert!(reader.calls.load(Ordering::SeqCst) >= 1);
    }
}
