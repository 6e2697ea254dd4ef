use crate::errors::Result;
use crate::model::{Measurement, SensorKind, WindDirection};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;

/// Produces one instantaneous reading on demand.
#[async_trait]
pub trait SensorReader: Send + Sync {
    async fn read(&self) -> Result<Measurement>;
}

/// Random readings for development and testing runs.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedReader {
    kind: SensorKind,
}

impl SimulatedReader {
    pub fn new(kind: SensorKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl SensorReader for SimulatedReader {
    async fn read(&self) -> Result<Measurement> {
        Ok(generate_reading(&mut rand::thread_rng(), self.kind))
    }
}

fn generate_reading(rng: &mut impl Rng, kind: SensorKind) -> Measurement {
    match kind {
        SensorKind::Air => Measurement::air(
            rng.gen_range(-10..=40),
            rng.gen_range(950..=1050),
            rng.gen_range(10..=90),
        ),
        SensorKind::GroundTemperature => Measurement::ground(rng.gen_range(-10..=40)),
        SensorKind::Rainfall => Measurement::rain_tick(),
        SensorKind::Wind => {
            let direction = WindDirection::ALL
                .choose(rng)
                .copied()
                .unwrap_or(WindDirection::Unknown);
            Measurement::wind(rng.gen_range(10..=100), direction.as_str())
        }
    }
}
