use std::collections::BTreeMap;
use std::future::Future;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// `measure_timings` query flag accepted by every report.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TimingParams {
    #[serde(default)]
    pub measure_timings: bool,
}

/// Seconds spent per named step, plus `total`.
pub type Timings = BTreeMap<&'static str, f64>;

/// Collects step timings when the caller asked for them.
#[derive(Debug)]
pub struct Stopwatch {
    started: Instant,
    laps: Option<Timings>,
}

impl Stopwatch {
    pub fn new(params: TimingParams) -> Self {
        Self {
            started: Instant::now(),
            laps: params.measure_timings.then(Timings::new),
        }
    }

    /// Awaits `step`, recording its duration under `name`.
    pub async fn time<F, T>(&mut self, name: &'static str, step: F) -> T
    where
        F: Future<Output = T>,
    {
        let lap = Instant::now();
        let out = step.await;
        if let Some(laps) = self.laps.as_mut() {
            laps.insert(name, lap.elapsed().as_secs_f64());
        }
        out
    }

    pub fn finish(self) -> Option<Timings> {
        let total = self.started.elapsed().as_secs_f64();
        self.laps.map(|mut laps| {
            laps.insert("total", total);
            laps
        })
    }
}

/// A report body with optional timings appended to it.
#[derive(Debug, Serialize)]
pub struct Timed<T> {
    #[serde(flatten)]
    pub body: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<Timings>,
}

impl<T> Timed<T> {
    pub fn new(body: T, stopwatch: Stopwatch) -> Self {
        Self {
            body,
            timings: stopwatch.finish(),
        }
    }
}

/// `{"data": [...]}`, the envelope of the tabular reports.
#[derive(Debug, Serialize)]
pub struct DataEnvelope<T> {
    pub data: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_stopwatch_reports_nothing() {
        let mut watch = Stopwatch::new(TimingParams::default());
        let value = watch.time("query", async { 7 }).await;
        assert_eq!(value, 7);
        assert!(watch.finish().is_none());
    }

    #[tokio::test]
    async fn test_enabled_stopwatch_records_steps_and_total() {
        let mut watch = Stopwatch::new(TimingParams { measure_timings: true });
        watch.time("query", async {}).await;
        let timings = watch.finish().expect("timings");
        assert!(timings.contains_key("query"));
        assert!(timings["total"] >= timings["query"]);
    }

    #[test]
    fn test_timed_flattens_body() {
        let body = DataEnvelope { data: vec![1, 2] };
        let json = serde_json::to_value(Timed { body, timings: None }).expect("serialize");
        assert_eq!(json, serde_json::json!({"data": [1, 2]}));
    }
}
