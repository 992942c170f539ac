//! Rolling ECG traces
//!
//! Keeps the most recent samples of each channel in a fixed-width window, the
//! shape a strip-chart plot needs. Each ECG batch shifts the window left and
//! appends the new samples on the right.

use std::collections::VecDeque;

use crate::events::DcmEvent;
use crate::protocol::EcgSample;
use crate::session::ConnectionState;

/// Default window width in samples
pub const DEFAULT_TRACE_LEN: usize = 2000;

/// Which side of the heart a trace belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chamber {
    /// Atrial channel, the first half of an ECG packet
    Atrial,
    /// Ventricular channel, the second half of an ECG packet
    Ventricular,
}

#[derive(Debug, Clone)]
struct Trace {
    samples: VecDeque<f32>,
    visible: bool,
}

impl Trace {
    fn new(capacity: usize) -> Self {
        Self {
            samples: std::iter::repeat(0.0).take(capacity).collect(),
            visible: true,
        }
    }

    fn push(&mut self, batch: &[f32], capacity: usize) {
        let batch = &batch[batch.len().saturating_sub(capacity)..];
        let overflow = (self.samples.len() + batch.len()).saturating_sub(capacity);
        self.samples.drain(..overflow);
        self.samples.extend(batch.iter().copied());
    }
}

/// Atrial and ventricular rolling windows
#[derive(Debug, Clone)]
pub struct EcgTrace {
    capacity: usize,
    atrial: Trace,
    ventricular: Trace,
    batches: u64,
}

impl Default for EcgTrace {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_LEN)
    }
}

impl EcgTrace {
    /// Create zero-filled traces of `capacity` samples each
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            atrial: Trace::new(capacity),
            ventricular: Trace::new(capacity),
            batches: 0,
        }
    }

    /// Window width in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of batches received
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Append one ECG batch to both traces
    pub fn update(&mut self, sample: &EcgSample) {
        self.update_channels(&sample.atrial, &sample.ventricular);
    }

    /// Append arbitrary-length batches to the traces
    pub fn update_channels(&mut self, atrial: &[f32], ventricular: &[f32]) {
        self.atrial.push(atrial, self.capacity);
        self.ventricular.push(ventricular, self.capacity);
        self.batches += 1;
    }

    /// Follow the event stream: ECG batches are appended, and losing the
    /// pacemaker resets the windows. Returns whether the traces changed.
    pub fn observe(&mut self, event: &DcmEvent) -> bool {
        match event {
            DcmEvent::EcgData(sample) => {
                self.update(sample);
                true
            }
            DcmEvent::ConnectionStateChanged {
                state: ConnectionState::NotConnected,
                ..
            } => {
                self.clear();
                true
            }
            _ => false,
        }
    }

    /// Window contents, oldest first
    pub fn samples(&self, chamber: Chamber) -> Vec<f32> {
        self.trace(chamber).samples.iter().copied().collect()
    }

    /// Most recent sample
    pub fn latest(&self, chamber: Chamber) -> Option<f32> {
        self.trace(chamber).samples.back().copied()
    }

    /// Show or hide a channel; the window keeps updating while hidden
    pub fn set_visible(&mut self, chamber: Chamber, visible: bool) {
        match chamber {
            Chamber::Atrial => self.atrial.visible = visible,
            Chamber::Ventricular => self.ventricular.visible = visible,
        }
    }

    /// Whether a channel is shown
    pub fn is_visible(&self, chamber: Chamber) -> bool {
        self.trace(chamber).visible
    }

    /// Reset both windows to zero
    pub fn clear(&mut self) {
        let (atrial, ventricular) = (self.atrial.visible, self.ventricular.visible);
        *self = Self::new(self.capacity);
        self.atrial.visible = atrial;
        self.ventricular.visible = ventricular;
    }

    fn trace(&self, chamber: Chamber) -> &Trace {
        match chamber {
            Chamber::Atrial => &self.atrial,
            Chamber::Ventricular => &self.ventricular,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_zeroed() {
        let trace = EcgTrace::new(5);
        assert_eq!(trace.samples(Chamber::Atrial), vec![0.0; 5]);
        assert_eq!(trace.samples(Chamber::Ventricular).len(), 5);
    }

    #[test]
    fn test_shift_and_append() {
        let mut trace = EcgTrace::new(5);
        trace.update_channels(&[1.0, 2.0], &[3.0, 4.0]);
        assert_eq!(trace.samples(Chamber::Atrial), vec![0.0, 0.0, 0.0, 1.0, 2.0]);
        assert_eq!(trace.samples(Chamber::Ventricular), vec![0.0, 0.0, 0.0, 3.0, 4.0]);

        trace.update_channels(&[5.0, 6.0, 7.0, 8.0], &[9.0; 4]);
        assert_eq!(trace.samples(Chamber::Atrial), vec![2.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(trace.latest(Chamber::Ventricular), Some(9.0));
        assert_eq!(trace.batches(), 2);
    }

    #[test]
    fn test_batch_longer_than_window_keeps_newest() {
        let mut trace = EcgTrace::new(3);
        trace.update_channels(&[1.0, 2.0, 3.0, 4.0, 5.0], &[]);
        assert_eq!(trace.samples(Chamber::Atrial), vec![3.0, 4.0, 5.0]);
        assert_eq!(trace.samples(Chamber::Ventricular), vec![0.0; 3]);
    }

    #[test]
    fn test_observe_follows_events() {
        let mut trace = EcgTrace::new(12);
        let sample = EcgSample {
            atrial: [1.0; 10],
            ventricular: [2.0; 10],
        };

        assert!(trace.observe(&DcmEvent::EcgData(sample)));
        assert_eq!(trace.batches(), 1);
        assert_eq!(trace.latest(Chamber::Atrial), Some(1.0));
        assert_eq!(&trace.samples(Chamber::Ventricular)[..2], &[0.0, 0.0]);

        let notice = DcmEvent::Notice {
            message: "Please plug in a pacemaker!".to_string(),
        };
        assert!(!trace.observe(&notice));
        assert_eq!(trace.batches(), 1);

        let registered = DcmEvent::ConnectionStateChanged {
            state: ConnectionState::Registered,
            info: "SN1".to_string(),
        };
        assert!(!trace.observe(&registered));

        let lost = DcmEvent::ConnectionStateChanged {
            state: ConnectionState::NotConnected,
            info: "SN1".to_string(),
        };
        assert!(trace.observe(&lost));
        assert_eq!(trace.batches(), 0);
        assert_eq!(trace.samples(Chamber::Atrial), vec![0.0; 12]);
    }

    #[test]
    fn test_visibility_survives_clear() {
        let mut trace = EcgTrace::new(4);
        trace.set_visible(Chamber::Ventricular, false);
        trace.update_channels(&[1.0], &[1.0]);
        trace.clear();
        assert!(!trace.is_visible(Chamber::Ventricular));
        assert!(trace.is_visible(Chamber::Atrial));
        assert_eq!(trace.samples(Chamber::Atrial), vec![0.0; 4]);
        assert_eq!(trace.batches(), 0);
    }
}
