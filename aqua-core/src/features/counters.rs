//! Per-server counter deltas.

use super::schema::CounterColumn;
use crate::error::{AquaError, Result};

/// The last counter values seen for one server.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterSnapshot {
    /// Frame timestamp the values were read at.
    pub timestamp: f64,
    /// Raw counter values, one per column.
    pub values: Vec<f64>,
}

/// Turns cumulative counters into per-poll deltas.
///
/// Each server starts from the columns' baselines at timestamp 0.
#[derive(Debug, Clone)]
pub struct CounterTracker {
    cumulative: Vec<bool>,
    last: Vec<CounterSnapshot>,
}

impl CounterTracker {
    /// Track `n_servers` servers over `columns`.
    pub fn new(columns: &[CounterColumn], n_servers: usize) -> Self {
        let baseline = CounterSnapshot {
            timestamp: 0.0,
            values: columns.iter().map(|c| c.baseline).collect(),
        };
        Self {
            cumulative: columns.iter().map(|c| c.cumulative).collect(),
            last: vec![baseline; n_servers],
        }
    }

    /// Number of counter columns.
    pub fn width(&self) -> usize {
        self.cumulative.len()
    }

    /// Last snapshot of a server.
    pub fn last(&self, server: usize) -> Option<&CounterSnapshot> {
        self.last.get(server)
    }

    /// Record `values` for `server` and return its feature columns.
    pub fn update(&mut self, server: usize, timestamp: f64, values: &[f64]) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(values.len());
        self.update_into(server, timestamp, values, &mut out)?;
        Ok(out)
    }

    /// Like [`update`](Self::update), appending the columns to `out`.
    ///
    /// Cumulative columns yield `value - previous`; gauges pass through.
    /// A timestamp older than the stored one is an error and leaves the
    /// snapshot untouched.
    pub fn update_into(
        &mut self,
        server: usize,
        timestamp: f64,
        values: &[f64],
        out: &mut Vec<f64>,
    ) -> Result<()> {
        let max = self.last.len();
        let last = self
            .last
            .get_mut(server)
            .ok_or(AquaError::ServerOutOfRange { server, max })?;
        if timestamp < last.timestamp {
            return Err(AquaError::NonMonotonicTimestamp {
                server,
                previous: last.timestamp,
                current: timestamp,
            });
        }
        if values.len() != self.cumulative.len() {
            return Err(AquaError::Serialization(format!(
                "expected {} counters for server {}, got {}",
                self.cumulative.len(),
                server,
                values.len()
            )));
        }

        for ((&value, previous), &cumulative) in values
            .iter()
            .zip(last.values.iter_mut())
            .zip(&self.cumulative)
        {
            out.push(if cumulative { value - *previous } else { value });
            *previous = value;
        }
        last.timestamp = timestamp;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ScalarKind;

    fn column(name: &str, cumulative: bool) -> CounterColumn {
        CounterColumn {
            name: name.to_string(),
            kind: ScalarKind::U32,
            offset: 0,
            cumulative,
            baseline: 0.0,
        }
    }

    #[test]
    fn cumulative_counter_yields_deltas() {
        let mut tracker = CounterTracker::new(&[column("n_flow", true)], 2);
        assert_eq!(tracker.update(1, 1.0, &[5.0]).unwrap(), vec![5.0]);
        assert_eq!(tracker.update(1, 2.0, &[5.0]).unwrap(), vec![0.0]);
        assert_eq!(tracker.update(1, 3.0, &[8.0]).unwrap(), vec![3.0]);
        assert_eq!(tracker.last(0).unwrap().values, vec![0.0]);
    }

    #[test]
    fn gauges_pass_through() {
        let mut tracker = CounterTracker::new(&[column("n_flow_on", false), column("n_fct", true)], 1);
        assert_eq!(tracker.update(0, 1.0, &[4.0, 2.0]).unwrap(), vec![4.0, 2.0]);
        assert_eq!(tracker.update(0, 1.0, &[3.0, 6.0]).unwrap(), vec![3.0, 4.0]);
    }

    #[test]
    fn timestamp_regression_is_rejected() {
        let mut tracker = CounterTracker::new(&[column("n_flow", true)], 1);
        tracker.update(0, 2.0, &[1.0]).unwrap();
        let err = tracker.update(0, 1.5, &[9.0]).unwrap_err();
        assert!(matches!(err, AquaError::NonMonotonicTimestamp { server: 0, .. }));
        assert!(err.is_fatal());
        assert_eq!(tracker.last(0).unwrap().values, vec![1.0]);
    }

    #[test]
    fn baseline_seeds_first_delta() {
        let mut col = column("n_packet", true);
        col.baseline = 10.0;
        let mut tracker = CounterTracker::new(&[col], 1);
        let mut out = vec![-1.0];
        tracker.update_into(0, 0.5, &[12.0], &mut out).unwrap();
        assert_eq!(out, vec![-1.0, 2.0]);
    }

    #[test]
    fn unknown_server_is_rejected() {
        let mut tracker = CounterTracker::new(&[column("n_flow", true)], 1);
        assert!(matches!(
            tracker.update(3, 1.0, &[1.0]),
            Err(AquaError::ServerOutOfRange { server: 3, max: 1 })
        ));
    }
}
