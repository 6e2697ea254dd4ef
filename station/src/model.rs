use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire format for `dateTime`; no offset, no fractional seconds.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One sensor record. Raw readings and averaged measurements share this shape;
/// only the fields relevant to a sensor are set and only set fields are serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "date_time_format")]
    pub date_time: Option<NaiveDateTime>,
}

impl Measurement {
    pub fn air(temperature: i32, pressure: i32, humidity: i32) -> Self {
        Self {
            temperature: Some(temperature),
            pressure: Some(pressure),
            humidity: Some(humidity),
            ..Default::default()
        }
    }

    pub fn ground(temperature: i32) -> Self {
        Self {
            temperature: Some(temperature),
            ..Default::default()
        }
    }

    pub fn wind(speed: i32, direction: impl Into<String>) -> Self {
        Self {
            speed: Some(speed),
            direction: Some(direction.into()),
            ..Default::default()
        }
    }

    pub fn rain_tick() -> Self {
        Self {
            amount: Some(1),
            ..Default::default()
        }
    }

    pub fn stamped(mut self, at: NaiveDateTime) -> Self {
        self.date_time = Some(at);
        self
    }
}

mod date_time_format {
    use super::DATE_TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(at) => serializer.serialize_str(&at.format(DATE_TIME_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| {
            NaiveDateTime::parse_from_str(&s, DATE_TIME_FORMAT).map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

/// The sensor families a station can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Air,
    GroundTemperature,
    Rainfall,
    Wind,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Air,
        SensorKind::GroundTemperature,
        SensorKind::Rainfall,
        SensorKind::Wind,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Air => "air",
            SensorKind::GroundTemperature => "ground-temperature",
            SensorKind::Rainfall => "rainfall",
            SensorKind::Wind => "wind",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compass point reported by the wind vane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindDirection {
    #[serde(rename = "N")]
    N,
    #[serde(rename = "N-NE")]
    NNe,
    #[serde(rename = "N-E")]
    NE,
    #[serde(rename = "E-NE")]
    ENe,
    #[serde(rename = "E")]
    E,
    #[serde(rename = "E-SE")]
    ESe,
    #[serde(rename = "S-E")]
    SE,
    #[serde(rename = "S-SE")]
    SSe,
    #[serde(rename = "S")]
    S,
    #[serde(rename = "S-SW")]
    SSw,
    #[serde(rename = "S-W")]
    SW,
    #[serde(rename = "W-SW")]
    WSw,
    #[serde(rename = "W")]
    W,
    #[serde(rename = "W-NW")]
    WNw,
    #[serde(rename = "N-W")]
    NW,
    #[serde(rename = "N-NW")]
    NNw,
    #[serde(rename = "-")]
    Unknown,
}

/// Vane output voltage (rounded to 0.1 V) for each direction, ascending.
const VANE_TABLE: [(f64, WindDirection); 16] = [
    (0.1, WindDirection::W),
    (0.2, WindDirection::NW),
    (0.3, WindDirection::WNw),
    (0.4, WindDirection::N),
    (0.6, WindDirection::NNw),
    (0.7, WindDirection::SW),
    (0.8, WindDirection::WSw),
    (1.2, WindDirection::NE),
    (1.4, WindDirection::NNe),
    (1.8, WindDirection::S),
    (2.0, WindDirection::SSw),
    (2.2, WindDirection::SE),
    (2.5, WindDirection::SSe),
    (2.7, WindDirection::E),
    (2.8, WindDirection::ENe),
    (2.9, WindDirection::ESe),
];

impl WindDirection {
    pub const ALL: [WindDirection; 17] = [
        WindDirection::N,
        WindDirection::NNe,
        WindDirection::NE,
        WindDirection::ENe,
        WindDirection::E,
        WindDirection::ESe,
        WindDirection::SE,
        WindDirection::SSe,
        WindDirection::S,
        WindDirection::SSw,
        WindDirection::SW,
        WindDirection::WSw,
        WindDirection::W,
        WindDirection::WNw,
        WindDirection::NW,
        WindDirection::NNw,
        WindDirection::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindDirection::N => "N",
            WindDirection::NNe => "N-NE",
            WindDirection::NE => "N-E",
            WindDirection::ENe => "E-NE",
            WindDirection::E => "E",
            WindDirection::ESe => "E-SE",
            WindDirection::SE => "S-E",
            WindDirection::SSe => "S-SE",
            WindDirection::S => "S",
            WindDirection::SSw => "S-SW",
            WindDirection::SW => "S-W",
            WindDirection::WSw => "W-SW",
            WindDirection::W => "W",
            WindDirection::WNw => "W-NW",
            WindDirection::NW => "N-W",
            WindDirection::NNw => "N-NW",
            WindDirection::Unknown => "-",
        }
    }

    /// Maps a vane voltage to a compass point. The voltage is rounded to one
    /// decimal and must hit a calibrated entry exactly.
    pub fn from_voltage(volts: f64) -> Self {
        let tenths = (volts * 10.0).round() as i64;
        VANE_TABLE
            .iter()
            .find(|(threshold, _)| (threshold * 10.0).round() as i64 == tenths)
            .map(|(_, direction)| *direction)
            .unwrap_or(WindDirection::Unknown)
    }
}

impl fmt::Display for WindDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
