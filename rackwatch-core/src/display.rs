//! Character display sink.
//!
//! The display is opened once at startup by whoever builds the sink. If the
//! hardware is missing the sink is simply never registered, so a headless
//! box does not log a render error on every tick.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::models::{Sample, Status};
use crate::sinks::{Sink, SinkError};

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("line {index} out of range, display has {rows} rows")]
    LineOutOfRange { index: usize, rows: usize },
    #[error("display bus error: {0}")]
    Bus(String),
    #[error("display not ready: {0}")]
    NotReady(String),
}

/// A small row-addressed text display (16x2 LCD and friends).
///
/// Implementations are blocking; [`DisplaySink`] calls them from the
/// blocking thread pool.
pub trait CharacterDisplay: Send {
    /// Number of rows, fixed after initialisation.
    fn rows(&self) -> usize;

    fn columns(&self) -> usize;

    fn clear(&mut self) -> Result<(), DisplayError>;

    /// Writes `text` starting at column 0 of `row`. `row` is already
    /// range-checked and `text` already cut to [`columns`](Self::columns).
    fn write_row(&mut self, row: usize, text: &str) -> Result<(), DisplayError>;

    fn set_line(&mut self, index: usize, text: &str) -> Result<(), DisplayError> {
        let rows = self.rows();
        if index >= rows {
            return Err(DisplayError::LineOutOfRange { index, rows });
        }
        let clipped: String = text.chars().take(self.columns()).collect();
        self.write_row(index, &clipped)
    }
}

/// The two lines shown for a sample.
pub fn render_lines(sample: &Sample) -> [String; 2] {
    match (sample.status, sample.reading) {
        (Status::Error, _) | (_, None) => ["Sensor error".to_string(), String::new()],
        (status, Some(r)) => {
            let marker = if status == Status::High { " !!" } else { "" };
            [
                format!("Temp: {:.1} C{marker}", r.temperature),
                format!("Humidity: {:.1} %", r.humidity),
            ]
        }
    }
}

pub struct DisplaySink {
    display: Arc<Mutex<Box<dyn CharacterDisplay>>>,
}

impl DisplaySink {
    pub fn new<D: CharacterDisplay + 'static>(display: D) -> Self {
        Self { display: Arc::new(Mutex::new(Box::new(display))) }
    }
}

#[async_trait]
impl Sink for DisplaySink {
    fn name(&self) -> &'static str {
        "display"
    }

    async fn deliver(&self, sample: &Sample) -> Result<(), SinkError> {
        let lines = render_lines(sample);
        let display = Arc::clone(&self.display);

        tokio::task::spawn_blocking(move || {
            let mut display = display.lock();
            display.clear()?;
            let rows = display.rows();
            for (index, line) in lines.iter().enumerate().take(rows) {
                display.set_line(index, line)?;
            }
            Ok::<_, DisplayError>(())
        })
        .await
        .map_err(SinkError::delivery)?
        .map_err(SinkError::delivery)
    }
}
