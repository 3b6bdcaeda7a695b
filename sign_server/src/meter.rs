//! Throughput counters of the data path.
//!
//! Connection tasks and the worker tick [`Event`]s on the global [`METER`]. A background task
//! takes the counts every few seconds and logs them as rates.
use std::{
    fmt::Write,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

const REPORT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Landmark message received on a data socket.
    Landmarks,
    /// Prediction produced by the worker.
    Prediction,
    /// Landmark message discarded, either malformed or because the queue was full.
    Dropped,
}

impl Event {
    pub const ALL: [Event; 3] = [Event::Landmarks, Event::Prediction, Event::Dropped];

    fn name(self) -> &'static str {
        match self {
            Event::Landmarks => "landmarks",
            Event::Prediction => "predictions",
            Event::Dropped => "dropped",
        }
    }
}

pub struct Meter {
    counts: [AtomicU64; Event::ALL.len()],
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            counts: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    pub fn tick(&self, event: Event) {
        self.counts[event as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Count of `event` since the last call.
    pub fn take(&self, event: Event) -> u64 {
        self.counts[event as usize].swap(0, Ordering::Relaxed)
    }

    /// Take all counts and format them as per-second rates over `elapsed`.
    ///
    /// `None` if nothing happened.
    pub fn take_report(&self, elapsed: Duration) -> Option<String> {
        let counts = Event::ALL.map(|event| (event, self.take(event)));
        if counts.iter().all(|(_, count)| *count == 0) {
            return None;
        }

        let secs = elapsed.as_secs_f32().max(f32::EPSILON);
        let mut report = String::from("Per second:");
        for (event, count) in counts {
            write!(report, " {} {:.1}", event.name(), count as f32 / secs).ok();
        }

        Some(report)
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut report_interval = interval(REPORT_INTERVAL);
        report_interval.tick().await;
        let mut last = Instant::now();

        loop {
            report_interval.tick().await;
            if let Some(report) = METER.take_report(last.elapsed()) {
                log::info!("{report}");
            }
            last = Instant::now();
        }
    })
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_take_resets_count() {
        let meter = Meter::new();
        meter.tick(Event::Landmarks);
        meter.tick(Event::Landmarks);
        meter.tick(Event::Dropped);

        assert_eq!(meter.take(Event::Landmarks), 2);
        assert_eq!(meter.take(Event::Landmarks), 0);
        assert_eq!(meter.take(Event::Prediction), 0);
        assert_eq!(meter.take(Event::Dropped), 1);
    }

    #[test]
    fn test_report_rates() {
        let meter = Meter::new();
        assert_eq!(meter.take_report(Duration::from_secs(2)), None);

        for _ in 0..6 {
            meter.tick(Event::Landmarks);
        }
        meter.tick(Event::Prediction);
        meter.tick(Event::Prediction);
        meter.tick(Event::Dropped);

        assert_eq!(
            meter.take_report(Duration::from_secs(2)).as_deref(),
            Some("Per second: landmarks 3.0 predictions 1.0 dropped 0.5")
        );
        assert_eq!(meter.take_report(Duration::from_secs(2)), None);
    }
}
