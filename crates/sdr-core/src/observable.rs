//! Observable values.
//!
//! Reactive value cells built on `tokio::sync::watch` so any number of
//! subscribers (presentation layers, loggers, tests) see every change without
//! polling. Used by the gain panel to mirror the hardware-applied gain of each
//! stage.
//!
//! # Example
//!
//! ```rust,ignore
//! let gain = Observable::new("gain:LNA", 20.0)
//!     .with_units("dB")
//!     .with_range_introspectable(0.0, 49.6);
//!
//! let mut rx = gain.subscribe();
//! gain.set(30.0)?;
//! assert_eq!(*rx.borrow_and_update(), 30.0);
//! ```

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Validator callback type.
pub type Validator<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Opaque handle returned when registering an observer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverHandle(pub u64);

impl ObserverHandle {
    /// Allocate a process-unique handle.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct ObservableSharedState<T> {
    metadata: ObservableMetadata,
    validator: Option<Validator<T>>,
}

/// Descriptive and constraint metadata for an observable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservableMetadata {
    /// Value name (unique within its owner).
    pub name: String,
    /// Human readable description.
    pub description: Option<String>,
    /// Physical units ("dB", "Hz").
    pub units: Option<String>,
    /// Read-only values reject `set()`.
    pub read_only: bool,
    /// Type hint ("float", "int", ...); empty when unknown.
    #[serde(default)]
    pub dtype: String,
    /// Lower bound, when bounded.
    #[serde(default)]
    pub min_value: Option<f64>,
    /// Upper bound, when bounded.
    #[serde(default)]
    pub max_value: Option<f64>,
    /// Widget increment hint.
    #[serde(default)]
    pub step: Option<f64>,
}

/// A thread-safe value with change notifications.
///
/// Clones share the same watch channel and metadata.
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: watch::Sender<T>,
    shared: Arc<RwLock<ObservableSharedState<T>>>,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.read();
        f.debug_struct("Observable")
            .field("metadata", &shared.metadata)
            .field("has_validator", &shared.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new observable with an initial value.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            shared: Arc::new(RwLock::new(ObservableSharedState {
                metadata: ObservableMetadata {
                    name: name.into(),
                    ..Default::default()
                },
                validator: None,
            })),
        }
    }

    /// Add a description.
    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.shared.write().metadata.description = Some(description.into());
        self
    }

    /// Add units.
    pub fn with_units(self, units: impl Into<String>) -> Self {
        self.shared.write().metadata.units = Some(units.into());
        self
    }

    /// Mark read-only.
    pub fn read_only(self) -> Self {
        self.shared.write().metadata.read_only = true;
        self
    }

    /// Add a custom validator.
    pub fn with_validator<F>(self, validator: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.shared.write().validator = Some(Arc::new(validator));
        self
    }

    /// Current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Value name.
    pub fn name(&self) -> String {
        self.shared.read().metadata.name.clone()
    }

    /// Metadata snapshot.
    pub fn metadata(&self) -> ObservableMetadata {
        self.shared.read().metadata.clone()
    }

    /// Validate a value without storing it.
    pub fn validate(&self, value: &T) -> Result<()> {
        let guard = self.shared.read();
        if guard.metadata.read_only {
            return Err(anyhow!("Parameter '{}' is read-only", guard.metadata.name));
        }
        if let Some(validator) = &guard.validator {
            validator(value)?;
        }
        Ok(())
    }

    /// Store a new value and notify subscribers.
    pub fn set(&self, value: T) -> Result<()> {
        self.validate(&value)?;
        self.sender.send_replace(value);
        Ok(())
    }

    /// Subscribe to changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Observable<f64> {
    /// Bound the value to `[min, max]` and publish the bounds as metadata.
    ///
    /// Non-finite values are rejected by the installed validator.
    ///
    /// # Panics
    ///
    /// Panics if `min` or `max` is not finite, or if `min > max`.
    pub fn with_range_introspectable(self, min: f64, max: f64) -> Self {
        assert!(
            min.is_finite() && max.is_finite(),
            "Range bounds must be finite: min={}, max={}",
            min,
            max
        );
        assert!(min <= max, "min must be <= max: min={}, max={}", min, max);

        {
            let mut guard = self.shared.write();
            guard.metadata.min_value = Some(min);
            guard.metadata.max_value = Some(max);
            guard.metadata.dtype = "float".to_string();
            guard.validator = Some(Arc::new(move |value: &f64| {
                if !value.is_finite() {
                    return Err(anyhow!("Value must be finite, got {:?}", value));
                }
                if *value < min || *value > max {
                    Err(anyhow!("Value {:?} out of range [{:?}, {:?}]", value, min, max))
                } else {
                    Ok(())
                }
            }));
        }
        self
    }

    /// Publish a widget increment hint.
    pub fn with_step(self, step: f64) -> Self {
        self.shared.write().metadata.step = Some(step);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_get_set() {
        let obs = Observable::new("gain:IF", 8.0);
        assert_eq!(obs.get(), 8.0);
        obs.set(16.0).unwrap();
        assert_eq!(obs.get(), 16.0);
        assert_eq!(obs.name(), "gain:IF");
    }

    #[test]
    fn range_metadata_and_validation() {
        let obs = Observable::new("gain:BB", 20.0)
            .with_units("dB")
            .with_step(2.0)
            .with_range_introspectable(0.0, 62.0);
        let meta = obs.metadata();
        assert_eq!(meta.min_value, Some(0.0));
        assert_eq!(meta.max_value, Some(62.0));
        assert_eq!(meta.step, Some(2.0));
        assert_eq!(meta.dtype, "float");
        assert!(obs.set(70.0).is_err());
        assert!(obs.set(f64::NAN).is_err());
        assert_eq!(obs.get(), 20.0);
    }

    #[test]
    fn read_only_rejects_set() {
        let obs = Observable::new("rate", 1.0).read_only();
        assert!(obs.set(2.0).is_err());
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let obs = Observable::new("gain:RF", 0.0);
        let mut rx = obs.subscribe();
        assert_eq!(obs.subscriber_count(), 1);
        obs.set(14.0).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 14.0);
    }

    #[test]
    fn observer_handles_are_unique() {
        let a = ObserverHandle::next();
        let b = ObserverHandle::next();
        assert_ne!(a, b);
    }
}
