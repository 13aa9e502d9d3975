//! Violation policy.
//!
//! `evaluate` is the pure decision: blacklist membership first, then the speed
//! threshold. `PolicyEvaluator` binds it to a live `PolicyStore`, reading the
//! threshold and blacklist at evaluation time so operator changes apply to
//! every later decision and never to earlier ones.

mod store;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;

use crate::frame::{Rgb, COLOR_BLACKLISTED, COLOR_NEUTRAL, COLOR_OVER_SPEED};

pub use store::{InMemoryPolicyStore, PolicyStore, SqlitePolicyStore, DEFAULT_BLACKLIST_REASON};

/// Used when no threshold has ever been read successfully.
pub const DEFAULT_THRESHOLD_KMH: f64 = 50.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    None,
    OverSpeed,
    Blacklisted,
}

impl Status {
    /// Stored form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::None => "NONE",
            Status::OverSpeed => "OVER_SPEED",
            Status::Blacklisted => "BLACKLISTED",
        }
    }

    /// Operator-facing form; empty for `None`.
    pub fn label(&self) -> &'static str {
        match self {
            Status::None => "",
            Status::OverSpeed => "OVER SPEED",
            Status::Blacklisted => "BLACKLISTED",
        }
    }

    /// Violations trigger a notification when recorded.
    pub fn is_violation(&self) -> bool {
        !matches!(self, Status::None)
    }

    pub fn color(&self) -> Rgb {
        match self {
            Status::None => COLOR_NEUTRAL,
            Status::OverSpeed => COLOR_OVER_SPEED,
            Status::Blacklisted => COLOR_BLACKLISTED,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "NONE" | "" => Ok(Status::None),
            "OVER_SPEED" | "OVER SPEED" => Ok(Status::OverSpeed),
            "BLACKLISTED" => Ok(Status::Blacklisted),
            other => Err(anyhow!("unknown violation status '{}'", other)),
        }
    }
}

/// Membership check over canonical plates.
pub trait Blacklist {
    fn contains_plate(&self, plate: &str) -> bool;
}

impl Blacklist for HashSet<String> {
    fn contains_plate(&self, plate: &str) -> bool {
        self.contains(plate)
    }
}

impl Blacklist for BTreeSet<String> {
    fn contains_plate(&self, plate: &str) -> bool {
        self.contains(plate)
    }
}

/// Classify one vehicle. First match wins:
/// non-empty blacklisted plate, then `speed > threshold`, then `None`.
pub fn evaluate<B: Blacklist + ?Sized>(
    plate: &str,
    speed: f64,
    threshold: f64,
    blacklist: &B,
) -> Status {
    if !plate.is_empty() && blacklist.contains_plate(plate) {
        Status::Blacklisted
    } else if speed > threshold {
        Status::OverSpeed
    } else {
        Status::None
    }
}

/// Store-backed blacklist. Lookup failures count as "not listed".
struct StoreBlacklist<'a> {
    store: &'a dyn PolicyStore,
}

impl Blacklist for StoreBlacklist<'_> {
    fn contains_plate(&self, plate: &str) -> bool {
        match self.store.is_blacklisted(plate) {
            Ok(listed) => listed,
            Err(e) => {
                log::warn!("blacklist check failed for {}: {}", plate, e);
                false
            }
        }
    }
}

pub struct PolicyEvaluator {
    store: Arc<dyn PolicyStore>,
    default_threshold: f64,
    last_known_threshold: Option<f64>,
}

impl PolicyEvaluator {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            default_threshold: DEFAULT_THRESHOLD_KMH,
            last_known_threshold: None,
        }
    }

    pub fn with_default_threshold(mut self, kmh: f64) -> Self {
        self.default_threshold = kmh;
        self
    }

    /// Fresh threshold from the store, falling back to the last value read and
    /// then to the configured default.
    pub fn current_threshold(&mut self) -> f64 {
        match self.store.threshold() {
            Ok(kmh) => {
                self.last_known_threshold = Some(kmh);
                kmh
            }
            Err(e) => {
                let fallback = self.last_known_threshold.unwrap_or(self.default_threshold);
                log::warn!("threshold read failed ({}); using {} km/h", e, fallback);
                fallback
            }
        }
    }

    pub fn evaluate(&self, plate: &str, speed: f64, threshold: f64) -> Status {
        evaluate(
            plate,
            speed,
            threshold,
            &StoreBlacklist {
                store: self.store.as_ref(),
            },
        )
    }

    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn blacklist(plates: &[&str]) -> HashSet<String> {
        plates.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn blacklist_takes_precedence_over_speed() {
        let list = blacklist(&["MH12AB1234"]);
        assert_eq!(evaluate("MH12AB1234", 10.0, 50.0, &list), Status::Blacklisted);
        assert_eq!(evaluate("MH12AB1234", 900.0, 50.0, &list), Status::Blacklisted);
    }

    #[test]
    fn speed_must_strictly_exceed_threshold() {
        let list = blacklist(&[]);
        assert_eq!(evaluate("KA01AB1234", 50.0, 50.0, &list), Status::None);
        assert_eq!(evaluate("KA01AB1234", 50.01, 50.0, &list), Status::OverSpeed);
    }

    #[test]
    fn empty_plate_is_never_blacklisted() {
        let list = blacklist(&[""]);
        assert_eq!(evaluate("", 10.0, 50.0, &list), Status::None);
        assert_eq!(evaluate("", 60.0, 50.0, &list), Status::OverSpeed);
    }

    #[test]
    fn evaluate_is_deterministic() {
        let list = blacklist(&["A1", "B2"]);
        for (plate, speed, threshold) in [("A1", 1.0, 2.0), ("C3", 70.0, 80.0), ("C3", 90.0, 80.0)] {
            let first = evaluate(plate, speed, threshold, &list);
            for _ in 0..10 {
                assert_eq!(evaluate(plate, speed, threshold, &list), first);
            }
        }
    }

    #[test]
    fn status_round_trips_through_stored_form() {
        for status in [Status::None, Status::OverSpeed, Status::Blacklisted] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert_eq!("OVER SPEED".parse::<Status>().unwrap(), Status::OverSpeed);
        assert!("SPEEDING".parse::<Status>().is_err());
    }

    struct FlakyStore {
        inner: InMemoryPolicyStore,
        down: AtomicBool,
    }

    impl PolicyStore for FlakyStore {
        fn threshold(&self) -> Result<f64> {
            if self.down.load(Ordering::SeqCst) {
                return Err(anyhow!("settings table unavailable"));
            }
            self.inner.threshold()
        }
        fn set_threshold(&self, kmh: f64) -> Result<()> {
            self.inner.set_threshold(kmh)
        }
        fn is_blacklisted(&self, plate: &str) -> Result<bool> {
            if self.down.load(Ordering::SeqCst) {
                return Err(anyhow!("blacklist table unavailable"));
            }
            self.inner.is_blacklisted(plate)
        }
        fn add(&self, plate: &str) -> Result<bool> {
            self.inner.add(plate)
        }
        fn remove(&self, plate: &str) -> Result<bool> {
            self.inner.remove(plate)
        }
        fn list(&self) -> Result<Vec<String>> {
            self.inner.list()
        }
    }

    #[test]
    fn threshold_falls_back_to_last_known_then_default() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryPolicyStore::new(DEFAULT_THRESHOLD_KMH),
            down: AtomicBool::new(true),
        });
        let mut evaluator = PolicyEvaluator::new(store.clone()).with_default_threshold(45.0);
        assert_eq!(evaluator.current_threshold(), 45.0);

        store.down.store(false, Ordering::SeqCst);
        store.set_threshold(80.0).unwrap();
        assert_eq!(evaluator.current_threshold(), 80.0);

        store.down.store(true, Ordering::SeqCst);
        assert_eq!(evaluator.current_threshold(), 80.0);
    }

    #[test]
    fn blacklist_lookup_failure_is_not_listed() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryPolicyStore::new(DEFAULT_THRESHOLD_KMH),
            down: AtomicBool::new(false),
        });
        store.add("MH12AB1234").unwrap();
        let evaluator = PolicyEvaluator::new(store.clone());
        assert_eq!(evaluator.evaluate("MH12AB1234", 10.0, 50.0), Status::Blacklisted);

        store.down.store(true, Ordering::SeqCst);
        assert_eq!(evaluator.evaluate("MH12AB1234", 10.0, 50.0), Status::None);
    }
}
