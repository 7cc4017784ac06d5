//! Gain panel: one bounded control per adjustable gain stage of a channel.
//!
//! The panel does no hardware I/O of its own. Every change goes through
//! [`Session::set_gain`] and the control then holds the value the hardware
//! actually applied. Presentation layers follow a control either through a
//! watch receiver ([`GainPanel::subscribe`]) or a callback
//! ([`GainPanel::observe`]); both are torn down with the panel.

use crate::session::Session;
use parking_lot::Mutex;
use sdr_core::error::{SdrError, SdrResult};
use sdr_core::observable::{Observable, ObserverHandle};
use sdr_core::ranges::GainRange;
use std::sync::Arc;
use tokio::sync::watch;

type GainCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// A bounded numeric control for one gain stage.
#[derive(Debug)]
pub struct GainControl {
    name: String,
    range: GainRange,
    step: f64,
    value: Observable<f64>,
}

impl GainControl {
    fn new(name: String, range: GainRange, current: f64) -> Self {
        let (min, max) = (range.start(), range.stop());
        let step = match range.step() {
            step if step > 0.0 => step,
            _ => (max - min) / 10.0,
        };
        let value = Observable::new(format!("gain:{}", name), current.clamp(min, max))
            .with_units("dB")
            .with_step(step)
            .with_range_introspectable(min, max);
        Self {
            name,
            range,
            step,
            value,
        }
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage range.
    pub fn range(&self) -> &GainRange {
        &self.range
    }

    /// Lower bound.
    pub fn min(&self) -> f64 {
        self.range.start()
    }

    /// Upper bound.
    pub fn max(&self) -> f64 {
        self.range.stop()
    }

    /// Increment hint: the stage step, or a tenth of the span for
    /// continuous stages.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Midpoint the control resets to.
    pub fn midpoint(&self) -> f64 {
        (self.min() + self.max()) / 2.0
    }

    /// Last applied gain.
    pub fn value(&self) -> f64 {
        self.value.get()
    }

    /// Underlying observable.
    pub fn observable(&self) -> &Observable<f64> {
        &self.value
    }
}

struct Observer {
    handle: ObserverHandle,
    stage: String,
    callback: GainCallback,
}

/// Gain controls of one logical channel.
pub struct GainPanel {
    session: Arc<Session>,
    chan: usize,
    controls: Vec<GainControl>,
    observers: Mutex<Vec<Observer>>,
}

impl GainPanel {
    /// Build controls for every adjustable stage of `chan`, initialized from
    /// the current hardware gains.
    pub fn new(session: Arc<Session>, chan: usize) -> SdrResult<Self> {
        let controls = session
            .gain_stages(chan)?
            .into_iter()
            .filter(|stage| stage.is_configurable())
            .map(|stage| -> SdrResult<GainControl> {
                let current = session.get_gain(&stage.name, chan)?;
                Ok(GainControl::new(stage.name, stage.range, current))
            })
            .collect::<SdrResult<Vec<_>>>()?;
        tracing::debug!(chan, stages = controls.len(), "gain panel created");
        Ok(Self {
            session,
            chan,
            controls,
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Logical channel of the panel.
    pub fn channel(&self) -> usize {
        self.chan
    }

    /// Controls in stage declaration order.
    pub fn controls(&self) -> &[GainControl] {
        &self.controls
    }

    /// Control of one stage.
    pub fn control(&self, name: &str) -> SdrResult<&GainControl> {
        self.controls.iter().find(|c| c.name == name).ok_or_else(|| {
            let names: Vec<&str> = self.controls.iter().map(|c| c.name.as_str()).collect();
            SdrError::out_of_range(
                format!("gain:{}", name),
                name,
                format!("one of [{}]", names.join(", ")),
            )
        })
    }

    /// Set a stage through the session. `None` requests the exact midpoint
    /// of its range; a stage with a step grid rounds that request like any
    /// other, and the control mirrors the rounded value. Returns the applied
    /// gain.
    ///
    /// A request equal to the gain the hardware already has is not sent.
    pub fn set_named_gain(&self, name: &str, gain: Option<f64>) -> SdrResult<f64> {
        let control = self.control(name)?;
        let requested = gain.unwrap_or_else(|| control.midpoint());
        let current = self.session.get_gain(name, self.chan)?;
        if requested == current {
            tracing::trace!(stage = name, gain = current, "gain unchanged");
            return Ok(current);
        }
        let applied = self.session.set_gain(requested, name, self.chan)?;
        self.publish(control, applied);
        Ok(applied)
    }

    /// Re-read every stage from the session and publish changes.
    pub fn refresh(&self) -> SdrResult<()> {
        for control in &self.controls {
            let current = self.session.get_gain(&control.name, self.chan)?;
            if current != control.value() {
                self.publish(control, current);
            }
        }
        Ok(())
    }

    /// Watch the applied gain of one stage. The receiver sees the channel
    /// close when the panel is dropped.
    pub fn subscribe(&self, name: &str) -> SdrResult<watch::Receiver<f64>> {
        Ok(self.control(name)?.value.subscribe())
    }

    /// Call `callback` with every applied gain of one stage.
    pub fn observe<F>(&self, name: &str, callback: F) -> SdrResult<ObserverHandle>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let stage = self.control(name)?.name.clone();
        let handle = ObserverHandle::next();
        self.observers.lock().push(Observer {
            handle,
            stage,
            callback: Arc::new(callback),
        });
        Ok(handle)
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unobserve(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|o| o.handle != handle);
        observers.len() != before
    }

    /// Registered callbacks.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    fn publish(&self, control: &GainControl, applied: f64) {
        if let Err(e) = control.value.set(applied) {
            // The session clamps into the same range, so this only trips on
            // a backend reporting a value outside its own range.
            tracing::warn!(stage = %control.name, applied, error = %e, "applied gain rejected by control");
            return;
        }
        // Callbacks run unlocked so they may observe or unobserve.
        let callbacks: Vec<GainCallback> = self
            .observers
            .lock()
            .iter()
            .filter(|o| o.stage == control.name)
            .map(|o| o.callback.clone())
            .collect();
        for callback in callbacks {
            callback(applied);
        }
    }
}

impl std::fmt::Debug for GainPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GainPanel")
            .field("chan", &self.chan)
            .field("controls", &self.controls)
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl Drop for GainPanel {
    fn drop(&mut self) {
        let observers = self.observers.get_mut().len();
        self.observers.get_mut().clear();
        tracing::debug!(chan = self.chan, observers, "gain panel dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BackendRegistry;
    use sdr_core::types::Direction;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn panel(args: &str) -> GainPanel {
        let registry = BackendRegistry::simulated().unwrap();
        let session = Arc::new(Session::open(args, None, Direction::Source, &registry).unwrap());
        GainPanel::new(session, 0).unwrap()
    }

    #[test]
    fn controls_cover_adjustable_stages() {
        let rx = panel("hackrf");
        let names: Vec<&str> = rx.controls().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["RF", "IF", "BB"]);
        assert_eq!(rx.control("IF").unwrap().step(), 8.0);

        let registry = BackendRegistry::simulated().unwrap();
        let session = Arc::new(Session::open("hackrf", None, Direction::Sink, &registry).unwrap());
        let tx = GainPanel::new(session, 0).unwrap();
        assert_eq!(tx.controls().len(), 2);
        assert!(tx.control("BB").is_err());
    }

    #[test]
    fn stage_step_comes_from_its_range() {
        let registry = BackendRegistry::simulated().unwrap();
        let session = Arc::new(Session::open("rtl=1", None, Direction::Source, &registry).unwrap());
        let panel = GainPanel::new(session, 0).unwrap();
        assert_eq!(panel.control("IF").unwrap().step(), 1.0);
        // The LNA table has uneven gaps; its step is the smallest one.
        assert!(panel.control("LNA").unwrap().step() > 0.0);
    }

    #[test]
    fn reset_goes_to_midpoint() {
        let panel = panel("uhd");
        assert_eq!(panel.set_named_gain("PGA", None).unwrap(), 38.0);
        assert_eq!(panel.control("PGA").unwrap().value(), 38.0);
    }

    #[test]
    fn applied_value_is_published() {
        let panel = panel("hackrf");
        let mut rx = panel.subscribe("IF").unwrap();
        assert_eq!(panel.set_named_gain("IF", Some(21.0)).unwrap(), 24.0);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 24.0);
    }

    #[test]
    fn unchanged_request_is_a_no_op() {
        let panel = panel("hackrf");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        panel
            .observe("IF", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        panel.set_named_gain("IF", Some(16.0)).unwrap();
        panel.set_named_gain("IF", Some(16.0)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unobserve_stops_callbacks() {
        let panel = panel("hackrf");
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let handle = panel
            .observe("BB", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(panel.unobserve(handle));
        assert!(!panel.unobserve(handle));
        panel.set_named_gain("BB", Some(10.0)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let panel = panel("hackrf");
        assert!(matches!(
            panel.set_named_gain("VGA", Some(1.0)),
            Err(SdrError::ParameterOutOfRange { .. })
        ));
        assert!(panel.observe("VGA", |_| {}).is_err());
    }

    #[test]
    fn callback_may_unobserve_itself() {
        let panel = Arc::new(panel("hackrf"));
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(Mutex::new(None::<ObserverHandle>));

        let weak = Arc::downgrade(&panel);
        let (seen, own) = (calls.clone(), slot.clone());
        let handle = panel
            .observe("IF", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                if let (Some(panel), Some(handle)) = (weak.upgrade(), *own.lock()) {
                    panel.unobserve(handle);
                }
            })
            .unwrap();
        *slot.lock() = Some(handle);

        panel.set_named_gain("IF", Some(16.0)).unwrap();
        panel.set_named_gain("IF", Some(32.0)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(panel.observer_count(), 0);
    }

    #[test]
    fn callback_may_register_a_sibling() {
        let panel = Arc::new(panel("hackrf"));
        let weak = Arc::downgrade(&panel);
        panel
            .observe("RF", move |_| {
                if let Some(panel) = weak.upgrade() {
                    panel.observe("RF", |_| {}).unwrap();
                }
            })
            .unwrap();
        panel.set_named_gain("RF", Some(14.0)).unwrap();
        assert_eq!(panel.observer_count(), 2);
    }

    #[tokio::test]
    async fn receivers_close_when_panel_drops() {
        let panel = panel("hackrf");
        let mut rx = panel.subscribe("RF").unwrap();
        drop(panel);
        assert!(rx.changed().await.is_err());
    }
}
