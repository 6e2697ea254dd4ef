use crate::model::SensorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Measurement submission failed with status {status}: {body}")]
    MeasurementSubmission { status: u16, body: String },

    #[error("Failed to read {sensor} sensor: {reason}")]
    SensorRead { sensor: SensorKind, reason: String },

    #[error("Emit error: {0}")]
    Emit(String),

    #[error("No sensors were enabled, enable at least one sensor in the configuration")]
    NoSensorsEnabled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn sensor(sensor: SensorKind, reason: impl ToString) -> Self {
        Error::SensorRead {
            sensor,
            reason: reason.to_string(),
        }
    }
}

/// Determine if an error is worth another attempt
pub fn is_retryable(error: &Error) -> bool {
    match error {
        // Bad credentials or missing sensors won't change with a retry
        Error::InvalidCredentials => false,
        Error::NoSensorsEnabled => false,
        Error::Gpio(_) => false,

        Error::Authentication(_) => true,
        Error::MeasurementSubmission { .. } => true,
        Error::SensorRead { .. } => true,
        Error::Emit(_) => true,
        Error::Http(_) => true,
        Error::WebSocket(_) => true,
        Error::Json(_) => true,
        Error::Io(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(!is_retryable(&Error::InvalidCredentials));
        assert!(!is_retryable(&Error::NoSensorsEnabled));
        assert!(!is_retryable(&Error::Gpio(rppal::gpio::Error::PinNotAvailable(5))));
        assert!(is_retryable(&Error::MeasurementSubmission {
            status: 500,
            body: "boom".to_string()
        }));
        assert!(is_retryable(&Error::Emit("closed".to_string())));
    }

    #[test]
    fn test_sensor_error_names_the_sensor() {
        let e = Error::sensor(SensorKind::Wind, "adc offline");
        assert_eq!(e.to_string(), "Failed to read wind sensor: adc offline");
    }
}
