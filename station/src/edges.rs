//! GPIO interrupts for the reed-switch sensors. Each falling edge on the rain
//! gauge pin is one bucket tip; each one on the anemometer pin is half a turn.

use crate::aggregator::RainTicks;
use crate::errors::Result;
use crate::hardware::PulseCounter;
use rppal::gpio::{Gpio, InputPin, Trigger};
use tracing::{debug, info};

/// Receives one call per detected edge.
pub trait EdgeSink: Send + 'static {
    fn edge(&self);
}

impl EdgeSink for RainTicks {
    fn edge(&self) {
        self.tick();
    }
}

impl EdgeSink for PulseCounter {
    fn edge(&self) {
        self.pulse();
    }
}

/// Closure handed to the interrupt thread for `pin`.
fn on_edge<S: EdgeSink>(pin: u8, sink: S) -> impl FnMut() + Send + 'static {
    move || {
        debug!("Edge on GPIO {}", pin);
        sink.edge();
    }
}

/// Holds the configured input pins. Dropping it clears their interrupts.
pub struct EdgeWatcher {
    pins: Vec<InputPin>,
}

impl EdgeWatcher {
    /// Arms an interrupt for each `(pin, sink)` pair. Pins are pulled up, so a
    /// closing switch reads as a falling edge.
    pub fn start(
        rain_gauge: Option<(u8, RainTicks)>,
        anemometer: Option<(u8, PulseCounter)>,
    ) -> Result<Self> {
        let mut watcher = Self { pins: Vec::new() };
        if rain_gauge.is_none() && anemometer.is_none() {
            return Ok(watcher);
        }

        let gpio = Gpio::new()?;
        if let Some((pin, ticks)) = rain_gauge {
            watcher.watch(&gpio, pin, ticks)?;
            info!("Rain gauge armed on GPIO {}", pin);
        }
        if let Some((pin, pulses)) = anemometer {
            watcher.watch(&gpio, pin, pulses)?;
            info!("Anemometer armed on GPIO {}", pin);
        }
        Ok(watcher)
    }

    fn watch<S: EdgeSink>(&mut self, gpio: &Gpio, pin: u8, sink: S) -> Result<()> {
        let mut input = gpio.get(pin)?.into_input_pullup();
        let mut callback = on_edge(pin, sink);
        input.set_async_interrupt(Trigger::FallingEdge, None, move |_event| callback())?;
        self.pins.push(input);
        Ok(())
    }

    pub fn armed(&self) -> usize {
        self.pins.len()
    }
}
