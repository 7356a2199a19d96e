//! A deterministic in-memory [`ReadingSource`] for tests and examples
//! (section 10.4): a queue of canned readings, returned in order, falling
//! back to repeating the last one once exhausted.

use std::sync::Mutex;

use async_trait::async_trait;
use pb_shared_types::{EnergyReading, ReadingSource, ReadingSourceError};

pub struct FakeReadingSource {
    readings: Mutex<Vec<EnergyReading>>,
    cursor: Mutex<usize>,
}

impl FakeReadingSource {
    pub fn new(readings: Vec<EnergyReading>) -> Self {
        Self {
            readings: Mutex::new(readings),
            cursor: Mutex::new(0),
        }
    }

    pub fn single(reading: EnergyReading) -> Self {
        Self::new(vec![reading])
    }
}

#[async_trait]
impl ReadingSource for FakeReadingSource {
    async fn fetch(&self) -> Result<EnergyReading, ReadingSourceError> {
        let readings = self.readings.lock().expect("fake reading queue poisoned");
        if readings.is_empty() {
            return Err(ReadingSourceError::Transport("no readings queued".into()));
        }
        let mut cursor = self.cursor.lock().expect("fake reading cursor poisoned");
        let index = (*cursor).min(readings.len() - 1);
        if *cursor < readings.len() - 1 {
            *cursor += 1;
        }
        Ok(readings[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pb_shared_types::SourceStatus;

    fn reading(generation_mw: f64, consumption_mw: f64) -> EnergyReading {
        EnergyReading::new(Utc::now(), generation_mw, consumption_mw, Vec::new())
    }

    #[tokio::test]
    async fn returns_queued_readings_in_order_then_repeats_last() {
        let source = FakeReadingSource::new(vec![reading(3.0, 2.0), reading(2.5, 2.4)]);
        assert_eq!(source.fetch().await.unwrap().generation_mw, 3.0);
        assert_eq!(source.fetch().await.unwrap().generation_mw, 2.5);
        assert_eq!(source.fetch().await.unwrap().generation_mw, 2.5);
    }

    #[test]
    fn margin_percent_guards_zero_generation() {
        let r = reading(0.0, 0.0);
        assert_eq!(r.margin_percent, 0.0);
    }

    #[test]
    fn source_status_is_carried_through() {
        let r = EnergyReading::new(
            Utc::now(),
            3.0,
            2.0,
            vec![SourceStatus {
                name: "solar".into(),
                status: "ok".into(),
                value_mw: Some(3.0),
            }],
        );
        assert_eq!(r.sources[0].name, "solar");
    }
}
