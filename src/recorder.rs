//! At-most-once finalization gate.
//!
//! A track is finalized the first time it has both a locked speed and a
//! non-empty plate. Finalizing persists one record, sends one notification if
//! the status is a violation, and marks the track so that nothing happens for
//! it again. Store and notifier failures are logged; the mark is kept either way.

use chrono::{DateTime, Local};
use std::collections::HashSet;

use crate::notify::{Notification, Notifier, NOTIFICATION_TIME_FORMAT};
use crate::policy::Status;
use crate::storage::{ViolationRecord, ViolationStore};
use crate::TrackId;

pub const RECORD_DATE_FORMAT: &str = "%Y-%m-%d";
pub const RECORD_TIME_FORMAT: &str = "%H:%M:%S";

/// Everything the recorder needs to decide for one track on one frame.
#[derive(Clone, Debug)]
pub struct FinalizeRequest<'a> {
    pub track_id: TrackId,
    pub class_name: &'a str,
    /// `None` until the speed estimator has locked a value.
    pub locked_speed: Option<f64>,
    pub plate: &'a str,
    pub status: Status,
    pub at: DateTime<Local>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Recorded { notified: bool },
    AlreadyFinalized,
    MissingPlate,
    SpeedNotLocked,
}

pub struct ViolationRecorder {
    store: Box<dyn ViolationStore>,
    notifier: Box<dyn Notifier>,
    finalized: HashSet<TrackId>,
    store_failures: u64,
    notify_failures: u64,
}

impl ViolationRecorder {
    pub fn new(store: Box<dyn ViolationStore>, notifier: Box<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            finalized: HashSet::new(),
            store_failures: 0,
            notify_failures: 0,
        }
    }

    pub fn finalize(&mut self, req: FinalizeRequest<'_>) -> FinalizeOutcome {
        if self.finalized.contains(&req.track_id) {
            return FinalizeOutcome::AlreadyFinalized;
        }
        if req.plate.is_empty() {
            return FinalizeOutcome::MissingPlate;
        }
        let Some(speed) = req.locked_speed else {
            return FinalizeOutcome::SpeedNotLocked;
        };

        let record = ViolationRecord {
            date: req.at.format(RECORD_DATE_FORMAT).to_string(),
            time: req.at.format(RECORD_TIME_FORMAT).to_string(),
            track_id: req.track_id,
            class_name: req.class_name.to_string(),
            speed,
            numberplate: req.plate.to_string(),
            status: req.status,
        };
        if let Err(e) = self.store.insert_violation(&record) {
            self.store_failures += 1;
            log::error!("failed to persist record for track {}: {}", req.track_id, e);
        }

        let mut notified = false;
        if req.status.is_violation() {
            let notification = Notification {
                track_id: req.track_id,
                numberplate: record.numberplate.clone(),
                speed,
                status: req.status,
                timestamp: req.at.format(NOTIFICATION_TIME_FORMAT).to_string(),
            };
            match self.notifier.send(&notification) {
                Ok(()) => notified = true,
                Err(e) => {
                    self.notify_failures += 1;
                    log::error!(
                        "{} notifier failed for track {}: {}",
                        self.notifier.name(),
                        req.track_id,
                        e
                    );
                }
            }
        }

        self.finalized.insert(req.track_id);
        log::info!(
            "track {} finalized: plate={} speed={} km/h status={}",
            req.track_id,
            record.numberplate,
            speed,
            req.status
        );
        FinalizeOutcome::Recorded { notified }
    }

    pub fn is_finalized(&self, track_id: TrackId) -> bool {
        self.finalized.contains(&track_id)
    }

    /// Clears the mark for a recycled track id.
    pub fn reset(&mut self, track_id: TrackId) {
        self.finalized.remove(&track_id);
    }

    pub fn finalized_count(&self) -> usize {
        self.finalized.len()
    }

    pub fn store_failures(&self) -> u64 {
        self.store_failures
    }

    pub fn notify_failures(&self) -> u64 {
        self.notify_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::storage::InMemoryViolationStore;
    use anyhow::{anyhow, Result};
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 14, 8, 15, 0).unwrap()
    }

    fn request(track_id: TrackId, plate: &str, speed: Option<f64>, status: Status) -> FinalizeRequest<'_> {
        FinalizeRequest {
            track_id,
            class_name: "car",
            locked_speed: speed,
            plate,
            status,
            at: at(),
        }
    }

    #[test]
    fn records_once_and_notifies_violations() {
        let store = InMemoryViolationStore::new();
        let notifier = MemoryNotifier::new();
        let mut recorder = ViolationRecorder::new(Box::new(store.clone()), Box::new(notifier.clone()));

        let first = recorder.finalize(request(7, "MH12AB1234", Some(648.0), Status::OverSpeed));
        assert_eq!(first, FinalizeOutcome::Recorded { notified: true });
        for _ in 0..5 {
            assert_eq!(
                recorder.finalize(request(7, "MH12AB1234", Some(648.0), Status::OverSpeed)),
                FinalizeOutcome::AlreadyFinalized
            );
        }

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, "2026-10-14");
        assert_eq!(records[0].time, "08:15:00");
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].timestamp, "2026-10-14 08:15:00");
    }

    #[test]
    fn compliant_vehicle_is_recorded_without_notification() {
        let store = InMemoryViolationStore::new();
        let notifier = MemoryNotifier::new();
        let mut recorder = ViolationRecorder::new(Box::new(store.clone()), Box::new(notifier.clone()));
        assert_eq!(
            recorder.finalize(request(1, "KA01AB1234", Some(36.0), Status::None)),
            FinalizeOutcome::Recorded { notified: false }
        );
        assert_eq!(store.len(), 1);
        assert!(notifier.sent().is_empty());
    }

    #[test]
    fn preconditions_leave_track_open() {
        let store = InMemoryViolationStore::new();
        let mut recorder = ViolationRecorder::new(Box::new(store.clone()), Box::new(MemoryNotifier::new()));
        assert_eq!(
            recorder.finalize(request(2, "", Some(90.0), Status::OverSpeed)),
            FinalizeOutcome::MissingPlate
        );
        assert_eq!(
            recorder.finalize(request(2, "MH12AB1234", None, Status::Blacklisted)),
            FinalizeOutcome::SpeedNotLocked
        );
        assert!(!recorder.is_finalized(2));
        assert!(store.is_empty());
    }

    struct DownStore;

    impl ViolationStore for DownStore {
        fn insert_violation(&mut self, _record: &ViolationRecord) -> Result<()> {
            Err(anyhow!("database connection not available"))
        }
    }

    struct DownNotifier;

    impl Notifier for DownNotifier {
        fn name(&self) -> &'static str {
            "down"
        }
        fn send(&mut self, _n: &Notification) -> Result<()> {
            Err(anyhow!("smtp unreachable"))
        }
    }

    #[test]
    fn collaborator_failures_still_finalize() {
        let mut recorder = ViolationRecorder::new(Box::new(DownStore), Box::new(DownNotifier));
        assert_eq!(
            recorder.finalize(request(3, "MH12AB1234", Some(70.0), Status::Blacklisted)),
            FinalizeOutcome::Recorded { notified: false }
        );
        assert!(recorder.is_finalized(3));
        assert_eq!(recorder.store_failures(), 1);
        assert_eq!(recorder.notify_failures(), 1);
        assert_eq!(
            recorder.finalize(request(3, "MH12AB1234", Some(70.0), Status::Blacklisted)),
            FinalizeOutcome::AlreadyFinalized
        );
        assert_eq!(recorder.store_failures(), 1);
    }
}
