// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Requeue interval calculation for reconcilers.
//!
//! The calculator keeps one failure counter per request key. A success or an
//! ignorable error clears the counter, a fatal error clears it and stops
//! requeueing, and a retryable error bumps it and backs off exponentially
//! between the configured minimum and maximum intervals.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;

use crate::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_JITTER, DEFAULT_MAX_INTERVAL, DEFAULT_MIN_INTERVAL,
};
use crate::errors::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorClass {
    /// Transient; try again after a backoff.
    Retryable,
    /// Retrying cannot help until the object changes.
    Fatal,
    /// Expected condition, e.g. deleting something already gone.
    Ignorable,
}

pub trait Classify {
    fn class(&self) -> ErrorClass;
}

#[derive(Debug)]
pub enum Outcome<'a, E> {
    Success,
    Failed(&'a E),
}

impl<'a, T, E> From<&'a std::result::Result<T, E>> for Outcome<'a, E> {
    fn from(res: &'a std::result::Result<T, E>) -> Self {
        match res {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Failed(e),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    After(Duration),
    Never,
}

impl fmt::Display for Requeue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requeue::After(d) => write!(f, "requeue after {:?}", d),
            Requeue::Never => write!(f, "await change"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntervalConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Growth factor applied per consecutive failure.
    pub multiplier: f64,
    /// Fraction of the delay added at random, in `[0, 1)`.
    pub jitter: f64,
    /// Requeue after a success; `None` waits for the next change.
    pub resync: Option<Duration>,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_JITTER,
            resync: None,
        }
    }
}

impl IntervalConfig {
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            min_interval,
            max_interval,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_interval.is_zero() {
            return Err(Error::invalid_config("minimum interval must be positive"));
        }
        if self.min_interval > self.max_interval {
            return Err(Error::invalid_config(format!(
                "minimum interval {:?} is larger than maximum interval {:?}",
                self.min_interval, self.max_interval
            )));
        }
        if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
            return Err(Error::invalid_config(format!(
                "multiplier must be at least 1, got {}",
                self.multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(Error::invalid_config(format!(
                "jitter must be in [0, 1), got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

pub struct IntervalCalculator<K> {
    config: IntervalConfig,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K> IntervalCalculator<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new(config: IntervalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            failures: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &IntervalConfig {
        &self.config
    }

    /// Records the outcome of a reconcile for `key` and returns when it
    /// should run again.
    pub fn next<E: Classify>(&self, key: &K, outcome: Outcome<'_, E>) -> Requeue {
        let class = match outcome {
            Outcome::Success => None,
            Outcome::Failed(err) => Some(err.class()),
        };
        match class {
            None | Some(ErrorClass::Ignorable) => {
                self.forget(key);
                self.resync()
            }
            Some(ErrorClass::Fatal) => {
                self.forget(key);
                warn!("fatal reconcile error for {:?}, not requeueing", key);
                Requeue::Never
            }
            Some(ErrorClass::Retryable) => {
                let failures = {
                    let mut map = self.lock();
                    let count = map.entry(key.clone()).or_insert(0);
                    *count = count.saturating_add(1);
                    *count
                };
                let delay = self.jittered(self.backoff_for(failures));
                debug!(
                    "{:?} failed {} time(s), requeue after {:?}",
                    key, failures, delay
                );
                Requeue::After(delay)
            }
        }
    }

    pub fn next_for_result<T, E: Classify>(
        &self,
        key: &K,
        res: &std::result::Result<T, E>,
    ) -> Requeue {
        self.next::<E>(key, Outcome::from(res))
    }

    pub fn failures(&self, key: &K) -> u32 {
        self.lock().get(key).copied().unwrap_or(0)
    }

    pub fn forget(&self, key: &K) {
        self.lock().remove(key);
    }

    /// Number of keys with a non-zero failure count.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> IntervalCalculator<K> {
    /// Delay after `failures` consecutive failures, without jitter.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let min = self.config.min_interval.as_secs_f64();
        let max = self.config.max_interval.as_secs_f64();
        let exp = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = min * self.config.multiplier.powi(exp);
        if !secs.is_finite() || secs >= max {
            return self.config.max_interval;
        }
        Duration::from_secs_f64(secs).max(self.config.min_interval)
    }

    /// Un-jittered delays for the first `n` consecutive failures.
    pub fn schedule(&self, n: u32) -> Vec<Duration> {
        (1..=n).map(|i| self.backoff_for(i)).collect()
    }

    fn resync(&self) -> Requeue {
        match self.config.resync {
            Some(d) => Requeue::After(d),
            None => Requeue::Never,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter == 0.0 {
            return delay;
        }
        let factor = 1.0 + self.config.jitter * rand::random::<f64>();
        let secs = (delay.as_secs_f64() * factor).min(self.config.max_interval.as_secs_f64());
        Duration::from_secs_f64(secs).max(self.config.min_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::{Classify, ErrorClass, IntervalCalculator, IntervalConfig, Outcome, Requeue};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug)]
    struct TestError(ErrorClass);

    impl Classify for TestError {
        fn class(&self) -> ErrorClass {
            self.0
        }
    }

    const RETRY: TestError = TestError(ErrorClass::Retryable);
    const FATAL: TestError = TestError(ErrorClass::Fatal);
    const IGNORE: TestError = TestError(ErrorClass::Ignorable);

    fn calculator() -> IntervalCalculator<&'static str> {
        IntervalCalculator::new(IntervalConfig::new(
            Duration::from_secs(5),
            Duration::from_secs(60),
        ))
        .unwrap()
    }

    #[test]
    pub fn test_retryable_errors_back_off_exponentially_up_to_max() {
        let calc = calculator();
        let delays: Vec<Requeue> = (0..6)
            .map(|_| calc.next(&"svc", Outcome::Failed(&RETRY)))
            .collect();
        let secs = |s| Requeue::After(Duration::from_secs(s));
        assert_eq!(
            delays,
            vec![secs(5), secs(10), secs(20), secs(40), secs(60), secs(60)]
        );
        assert_eq!(calc.failures(&"svc"), 6);
    }

    #[test]
    pub fn test_success_resets_the_counter() {
        let calc = calculator();
        calc.next(&"svc", Outcome::Failed(&RETRY));
        calc.next(&"svc", Outcome::Failed(&RETRY));
        assert_eq!(calc.next::<TestError>(&"svc", Outcome::Success), Requeue::Never);
        assert_eq!(calc.failures(&"svc"), 0);
        assert_eq!(calc.tracked(), 0);
        assert_eq!(
            calc.next(&"svc", Outcome::Failed(&RETRY)),
            Requeue::After(Duration::from_secs(5))
        );
    }

    #[test]
    pub fn test_success_requeues_after_resync_when_configured() {
        let mut config = IntervalConfig::new(Duration::from_secs(5), Duration::from_secs(60));
        config.resync = Some(Duration::from_secs(600));
        let calc: IntervalCalculator<&str> = IntervalCalculator::new(config).unwrap();
        assert_eq!(
            calc.next::<TestError>(&"svc", Outcome::Success),
            Requeue::After(Duration::from_secs(600))
        );
        assert_eq!(
            calc.next(&"svc", Outcome::Failed(&IGNORE)),
            Requeue::After(Duration::from_secs(600))
        );
    }

    #[test]
    pub fn test_fatal_errors_stop_requeueing_and_reset() {
        let calc = calculator();
        calc.next(&"svc", Outcome::Failed(&RETRY));
        assert_eq!(calc.next(&"svc", Outcome::Failed(&FATAL)), Requeue::Never);
        assert_eq!(calc.failures(&"svc"), 0);
    }

    #[test]
    pub fn test_ignorable_errors_count_as_success() {
        let calc = calculator();
        calc.next(&"svc", Outcome::Failed(&RETRY));
        assert_eq!(calc.next(&"svc", Outcome::Failed(&IGNORE)), Requeue::Never);
        assert_eq!(calc.failures(&"svc"), 0);
    }

    #[test]
    pub fn test_keys_are_tracked_independently() {
        let calc = calculator();
        calc.next(&"a", Outcome::Failed(&RETRY));
        calc.next(&"a", Outcome::Failed(&RETRY));
        calc.next(&"b", Outcome::Failed(&RETRY));
        assert_eq!(calc.failures(&"a"), 2);
        assert_eq!(calc.failures(&"b"), 1);
        calc.forget(&"a");
        assert_eq!(calc.failures(&"a"), 0);
        assert_eq!(calc.tracked(), 1);
    }

    #[test]
    pub fn test_next_for_result_classifies_errors() {
        let calc = calculator();
        let failed: Result<(), TestError> = Err(RETRY);
        assert_eq!(
            calc.next_for_result(&"svc", &failed),
            Requeue::After(Duration::from_secs(5))
        );
        let ok: Result<(), TestError> = Ok(());
        assert_eq!(calc.next_for_result(&"svc", &ok), Requeue::Never);
    }

    #[test]
    pub fn test_backoff_saturates_for_huge_failure_counts() {
        let calc = calculator();
        assert_eq!(calc.backoff_for(0), Duration::from_secs(5));
        assert_eq!(calc.backoff_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    pub fn test_multiplier_of_one_gives_constant_interval() {
        let mut config = IntervalConfig::new(Duration::from_secs(3), Duration::from_secs(30));
        config.multiplier = 1.0;
        let calc: IntervalCalculator<u32> = IntervalCalculator::new(config).unwrap();
        assert_eq!(calc.schedule(4), vec![Duration::from_secs(3); 4]);
    }

    #[test]
    pub fn test_schedule_is_non_decreasing_and_bounded() {
        let calc = calculator();
        let schedule = calc.schedule(20);
        assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
        assert!(schedule
            .iter()
            .all(|d| *d >= Duration::from_secs(5) && *d <= Duration::from_secs(60)));
    }

    #[test]
    pub fn test_jitter_stays_within_bounds() {
        let mut config = IntervalConfig::new(Duration::from_secs(5), Duration::from_secs(60));
        config.jitter = 0.5;
        let calc: IntervalCalculator<&str> = IntervalCalculator::new(config).unwrap();
        for _ in 0..50 {
            match calc.next(&"svc", Outcome::Failed(&RETRY)) {
                Requeue::After(d) => {
                    assert!(d >= Duration::from_secs(5));
                    assert!(d <= Duration::from_secs(60));
                }
                Requeue::Never => panic!("retryable error must requeue"),
            }
        }
    }

    #[test]
    pub fn test_failure_counter_saturates_at_max() {
        let calc = calculator();
        calc.failures.lock().unwrap().insert("svc", u32::MAX);
        assert_eq!(
            calc.next(&"svc", Outcome::Failed(&RETRY)),
            Requeue::After(Duration::from_secs(60))
        );
        assert_eq!(calc.failures(&"svc"), u32::MAX);
    }

    #[test]
    pub fn test_poisoned_lock_is_recovered() {
        let calc = Arc::new(calculator());
        let holder = calc.clone();
        let res = std::thread::spawn(move || {
            let _guard = holder.failures.lock().unwrap();
            panic!("panicked while holding the failure map");
        })
        .join();
        assert!(res.is_err());
        assert!(calc.failures.is_poisoned());

        calc.lock().insert("svc", u32::MAX);
        assert_eq!(
            calc.next(&"svc", Outcome::Failed(&RETRY)),
            Requeue::After(Duration::from_secs(60))
        );
        assert_eq!(calc.failures(&"svc"), u32::MAX);
        assert_eq!(calc.next::<TestError>(&"svc", Outcome::Success), Requeue::Never);
        assert_eq!(calc.tracked(), 0);
    }

    #[test]
    pub fn test_invalid_configs_are_rejected() {
        let zero = IntervalConfig::new(Duration::ZERO, Duration::from_secs(1));
        assert!(IntervalCalculator::<u32>::new(zero).is_err());

        let inverted = IntervalConfig::new(Duration::from_secs(10), Duration::from_secs(1));
        assert!(IntervalCalculator::<u32>::new(inverted).is_err());

        let mut shrinking = IntervalConfig::default();
        shrinking.multiplier = 0.5;
        assert!(shrinking.validate().is_err());

        let mut nan = IntervalConfig::default();
        nan.multiplier = f64::NAN;
        assert!(nan.validate().is_err());

        let mut jitter = IntervalConfig::default();
        jitter.jitter = 1.0;
        assert!(jitter.validate().is_err());

        assert!(IntervalConfig::default().validate().is_ok());
    }

    #[tokio::test]
    pub async fn test_concurrent_failures_are_all_counted() {
        let calc = Arc::new(calculator());
        let tasks = (0..32).map(|i| {
            let calc = calc.clone();
            tokio::spawn(async move {
                let key = if i % 2 == 0 { "even" } else { "odd" };
                calc.next(&key, Outcome::Failed(&RETRY));
            })
        });
        for res in futures::future::join_all(tasks).await {
            res.unwrap();
        }
        assert_eq!(calc.failures(&"even"), 16);
        assert_eq!(calc.failures(&"odd"), 16);
    }
}
