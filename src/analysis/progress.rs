use std::sync::Mutex;

/// Observer for per-file progress, called with values in `[0.0, 1.0]`.
///
/// May be invoked from rayon worker threads.
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Sync);

/// Fraction of a file's progress reached once the samples are decoded and
/// converted to mono at the target rate.
pub const PREPARED: f64 = 0.10;

/// Progress ranges of the three estimation phases.
pub const FEATURES: (f64, f64) = (0.10, 0.40);
pub const INFERENCE: (f64, f64) = (0.40, 0.70);
pub const TEMPO: (f64, f64) = (0.70, 1.00);

/// Forwards progress to an optional observer, dropping any value that would
/// move backwards.
pub struct ProgressReporter<'a> {
    sink: Option<ProgressFn<'a>>,
    last: Mutex<f64>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: Option<ProgressFn<'a>>) -> Self {
        Self {
            sink,
            last: Mutex::new(0.0),
        }
    }

    pub fn report(&self, value: f64) {
        let Some(sink) = self.sink else {
            return;
        };
        if !value.is_finite() {
            return;
        }
        let value = value.clamp(0.0, 1.0);
        // Held across the callback so concurrent reporters cannot reorder values.
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if value > *last {
            *last = value;
            sink(value);
        }
    }

    pub fn phase(&self, range: (f64, f64)) -> Phase<'_, 'a> {
        Phase {
            reporter: self,
            start: range.0,
            end: range.1,
        }
    }
}

/// A sub-range of a `ProgressReporter`. Fractions in `[0, 1]` map linearly
/// onto `[start, end]`.
pub struct Phase<'r, 'a> {
    reporter: &'r ProgressReporter<'a>,
    start: f64,
    end: f64,
}

impl Phase<'_, '_> {
    pub fn report(&self, fraction: f64) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.reporter
            .report(self.start + (self.end - self.start) * fraction);
    }

    pub fn finish(&self) {
        self.reporter.report(self.end);
    }
}
