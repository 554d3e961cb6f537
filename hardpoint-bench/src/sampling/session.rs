//! Sampling session loop
//!
//! A [`SamplingSession`] owns the ordered record sequence and the elapsed
//! time origin. Every tick asks a [`TickSource`] for one record, stamps it
//! with the next 1-based index and the elapsed time at tick start, appends
//! it, and hands it to the optional [`RecordSink`].
//!
//! Termination is checked once per tick, before the tick runs. Ticks are not
//! interrupted.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use super::clock::Clock;
use super::record::SampleRecord;
use crate::SamplingError;

/// Producer of one record per tick.
pub trait TickSource {
    /// Gather readings and build the record for `index` at `elapsed`.
    fn tick(&mut self, index: u64, elapsed: Duration) -> Result<SampleRecord, SamplingError>;
}

impl<F> TickSource for F
where
    F: FnMut(u64, Duration) -> Result<SampleRecord, SamplingError>,
{
    fn tick(&mut self, index: u64, elapsed: Duration) -> Result<SampleRecord, SamplingError> {
        self(index, elapsed)
    }
}

/// Consumer notified of every record as it is appended.
pub trait RecordSink {
    fn append(&mut self, record: &SampleRecord) -> Result<(), SamplingError>;
}

/// External boolean polled once per tick.
pub type FlagPoll<S> = Box<dyn FnMut(&mut S) -> Result<bool, SamplingError>>;

/// When a session run stops.
pub enum TerminationPolicy<S> {
    /// Loop while elapsed session time is below the duration
    FixedDuration(Duration),
    /// Loop while the flag reads true
    ExternalFlag(FlagPoll<S>),
}

impl<S> TerminationPolicy<S> {
    /// # Errors
    /// [`SamplingError::Config`] for a negative, non-finite or out-of-range
    /// number of seconds.
    pub fn fixed_secs(seconds: f64) -> Result<Self, SamplingError> {
        Duration::try_from_secs_f64(seconds)
            .map(TerminationPolicy::FixedDuration)
            .map_err(|e| SamplingError::Config(format!("invalid duration {seconds} s: {e}")))
    }

    pub fn external_flag(
        poll: impl FnMut(&mut S) -> Result<bool, SamplingError> + 'static,
    ) -> Self {
        TerminationPolicy::ExternalFlag(Box::new(poll))
    }
}

impl<S> fmt::Debug for TerminationPolicy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationPolicy::FixedDuration(d) => f.debug_tuple("FixedDuration").field(d).finish(),
            TerminationPolicy::ExternalFlag(_) => f.write_str("ExternalFlag"),
        }
    }
}

/// One segment of a stepped session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Phase {
    pub duration: Duration,
    /// Change applied to the held setpoint at the start of the phase
    pub setpoint_delta: i64,
}

impl Phase {
    pub fn new(duration: Duration, setpoint_delta: i64) -> Self {
        Self {
            duration,
            setpoint_delta,
        }
    }

    /// Phases holding each `pattern` multiple of `step` for `duration`.
    ///
    /// `[0, 1, -1, -1, 1]` gives the position-repeatability sequence
    /// `sp, sp+step, sp, sp-step, sp`.
    pub fn stepped(pattern: &[i64], step: i64, duration: Duration) -> Vec<Phase> {
        pattern
            .iter()
            .map(|multiple| Phase::new(duration, multiple * step))
            .collect()
    }
}

/// Ordered record stream plus elapsed-time origin.
pub struct SamplingSession<C: Clock> {
    clock: C,
    poll_interval: Duration,
    origin: Option<Duration>,
    records: Vec<SampleRecord>,
    sink: Option<Box<dyn RecordSink>>,
}

impl<C: Clock> SamplingSession<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            poll_interval: Duration::ZERO,
            origin: None,
            records: Vec::new(),
            sink: None,
        }
    }

    /// Minimum spacing between tick starts; zero samples as fast as the
    /// sources answer.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn take_sink(&mut self) -> Option<Box<dyn RecordSink>> {
        self.sink.take()
    }

    /// Fix the elapsed-time origin now, unless already fixed.
    pub fn start(&mut self) {
        if self.origin.is_none() {
            self.origin = Some(self.clock.now());
        }
    }

    /// Time since the origin, zero before [`SamplingSession::start`].
    pub fn elapsed(&self) -> Duration {
        self.origin
            .map(|origin| self.clock.now().saturating_sub(origin))
            .unwrap_or_default()
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<SampleRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sample until the policy says stop. Returns the records this run added.
    ///
    /// `FixedDuration` is measured from the session origin, which is fixed by
    /// the first run.
    ///
    /// # Errors
    /// Any source, flag or sink error aborts the run. Records produced before
    /// the failure remain in the session.
    pub fn run<S: TickSource>(
        &mut self,
        source: &mut S,
        policy: &mut TerminationPolicy<S>,
    ) -> Result<usize, SamplingError> {
        self.start();
        let before = self.records.len();

        match policy {
            TerminationPolicy::FixedDuration(limit) => {
                let limit = *limit;
                self.run_while(source, |elapsed, _| Ok(elapsed < limit))?;
            }
            TerminationPolicy::ExternalFlag(poll) => {
                self.run_while(source, |_, s| poll(s))?;
            }
        }

        let added = self.records.len() - before;
        info!(
            "Sampling run finished: {added} records in {:.3} s",
            self.elapsed().as_secs_f64()
        );
        Ok(added)
    }

    /// Run consecutive fixed-duration phases.
    ///
    /// `on_boundary` is called with the phase number and phase before each
    /// phase samples. Phase `k` ends once elapsed time reaches the sum of the
    /// durations of phases `0..=k`. Deadlines past the representable time
    /// are rejected before the first phase starts.
    pub fn run_stepped<S, F>(
        &mut self,
        source: &mut S,
        phases: &[Phase],
        mut on_boundary: F,
    ) -> Result<usize, SamplingError>
    where
        S: TickSource,
        F: FnMut(&mut S, usize, &Phase) -> Result<(), SamplingError>,
    {
        let mut deadlines = Vec::with_capacity(phases.len());
        let mut deadline = Duration::ZERO;
        for (number, phase) in phases.iter().enumerate() {
            deadline = deadline.checked_add(phase.duration).ok_or_else(|| {
                SamplingError::Config(format!("phase {number} ends beyond the representable time"))
            })?;
            deadlines.push(deadline);
        }

        self.start();
        let before = self.records.len();

        for ((number, phase), deadline) in phases.iter().enumerate().zip(deadlines) {
            on_boundary(source, number, phase)?;

            let start = self.records.len();
            self.run_while(source, |elapsed, _| Ok(elapsed < deadline))?;
            debug!(
                "Phase {number} complete: {} records, deadline {:.3} s",
                self.records.len() - start,
                deadline.as_secs_f64()
            );
        }

        let added = self.records.len() - before;
        info!("Stepped sampling finished: {} phases, {added} records", phases.len());
        Ok(added)
    }

    fn run_while<S, P>(&mut self, source: &mut S, mut keep_going: P) -> Result<(), SamplingError>
    where
        S: TickSource,
        P: FnMut(Duration, &mut S) -> Result<bool, SamplingError>,
    {
        let mut next_tick = self.elapsed();

        loop {
            let elapsed = self.elapsed();
            if !keep_going(elapsed, source)? {
                return Ok(());
            }

            self.tick(source, elapsed)?;

            if !self.poll_interval.is_zero() {
                next_tick = next_tick.max(elapsed) + self.poll_interval;
                let now = self.elapsed();
                if next_tick > now {
                    self.clock.sleep(next_tick - now);
                }
            }
        }
    }

    fn tick<S: TickSource>(&mut self, source: &mut S, elapsed: Duration) -> Result<(), SamplingError> {
        let index = self.records.len() as u64 + 1;
        let record = source.tick(index, elapsed)?;
        self.records.push(record);

        if let (Some(sink), Some(record)) = (self.sink.as_mut(), self.records.last()) {
            sink.append(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::ManualClock;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Counter;

    impl TickSource for Counter {
        fn tick(&mut self, index: u64, elapsed: Duration) -> Result<SampleRecord, SamplingError> {
            Ok(SampleRecord::new(index, elapsed).with("Index", index as i64))
        }
    }

    #[test]
    fn test_zero_duration_produces_nothing() {
        let mut session = SamplingSession::new(ManualClock::new());
        let mut source = Counter;

        let added = session
            .run(&mut source, &mut TerminationPolicy::FixedDuration(Duration::ZERO))
            .unwrap();

        assert_eq!(added, 0);
        assert!(session.is_empty());
    }

    #[test]
    fn test_indices_are_one_based_and_contiguous() {
        let clock = ManualClock::new();
        let mut session =
            SamplingSession::new(clock.clone()).with_poll_interval(Duration::from_millis(100));
        let mut source = Counter;

        session
            .run(&mut source, &mut TerminationPolicy::fixed_secs(0.5).unwrap())
            .unwrap();

        let indices: Vec<u64> = session.records().iter().map(|r| r.index()).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
        assert_eq!(session.records()[4].elapsed(), Duration::from_millis(400));
    }

    #[test]
    fn test_flag_checked_every_tick() {
        let mut session = SamplingSession::new(ManualClock::new());
        let mut source = Counter;
        let polls = Rc::new(RefCell::new(0));
        let counter = polls.clone();
        let mut policy = TerminationPolicy::external_flag(move |_: &mut Counter| {
            *counter.borrow_mut() += 1;
            Ok(*counter.borrow() <= 3)
        });

        let added = session.run(&mut source, &mut policy).unwrap();

        assert_eq!(added, 3);
        assert_eq!(*polls.borrow(), 4);
    }

    #[test]
    fn test_flag_error_aborts() {
        let mut session = SamplingSession::new(ManualClock::new());
        let mut source = Counter;
        let mut policy = TerminationPolicy::external_flag(|_: &mut Counter| {
            Err(SamplingError::unavailable("PLC", "flag read failed"))
        });

        let err = session.run(&mut source, &mut policy).unwrap_err();

        assert!(matches!(err, SamplingError::SourceUnavailable { .. }));
        assert!(session.is_empty());
    }

    #[test]
    fn test_source_failure_keeps_partial_records() {
        let clock = ManualClock::new();
        let mut session =
            SamplingSession::new(clock.clone()).with_poll_interval(Duration::from_millis(10));
        let mut source = |index: u64, elapsed: Duration| {
            if index == 4 {
                Err(SamplingError::unavailable("IDS 206", "axis read failed"))
            } else {
                Ok(SampleRecord::new(index, elapsed))
            }
        };

        let err = session
            .run(&mut source, &mut TerminationPolicy::fixed_secs(1.0).unwrap())
            .unwrap_err();

        assert!(matches!(err, SamplingError::SourceUnavailable { .. }));
        assert_eq!(session.len(), 3);
    }

    #[test]
    fn test_slow_source_not_paced_further() {
        let clock = ManualClock::new();
        let tick_clock = clock.clone();
        let mut session =
            SamplingSession::new(clock.clone()).with_poll_interval(Duration::from_millis(10));
        // Each tick takes 25 ms, longer than the poll interval
        let mut source = move |index: u64, elapsed: Duration| {
            tick_clock.advance(Duration::from_millis(25));
            Ok(SampleRecord::new(index, elapsed))
        };

        session
            .run(&mut source, &mut TerminationPolicy::fixed_secs(0.1).unwrap())
            .unwrap();

        let stamps: Vec<u128> = session.records().iter().map(|r| r.elapsed().as_millis()).collect();
        assert_eq!(stamps, vec![0, 25, 50, 75]);
    }

    #[test]
    fn test_stepped_phase_boundaries() {
        let clock = ManualClock::new();
        let mut session =
            SamplingSession::new(clock.clone()).with_poll_interval(Duration::from_millis(250));
        let mut source = Counter;
        let phases = Phase::stepped(&[0, 1, -1], 2000, Duration::from_secs(1));
        let mut boundaries = Vec::new();

        let added = session
            .run_stepped(&mut source, &phases, |_, number, _| {
                boundaries.push((number, clock.now()));
                Ok(())
            })
            .unwrap();

        assert_eq!(added, 12);
        assert_eq!(
            boundaries,
            vec![
                (0, Duration::ZERO),
                (1, Duration::from_secs(1)),
                (2, Duration::from_secs(2)),
            ]
        );
        assert_eq!(session.records()[11].elapsed(), Duration::from_millis(2750));
    }

    #[test]
    fn test_fixed_secs_rejects_unrepresentable() {
        for seconds in [f64::INFINITY, f64::NAN, -1.0, 1e30] {
            assert!(matches!(
                TerminationPolicy::<Counter>::fixed_secs(seconds),
                Err(SamplingError::Config(_))
            ));
        }
        assert!(matches!(
            TerminationPolicy::<Counter>::fixed_secs(0.25),
            Ok(TerminationPolicy::FixedDuration(d)) if d == Duration::from_millis(250)
        ));
    }

    #[test]
    fn test_stepped_deadline_overflow_is_error() {
        let mut session = SamplingSession::new(ManualClock::new());
        let mut source = Counter;
        let phases = [Phase::new(Duration::MAX, 0), Phase::new(Duration::from_secs(1), 0)];
        let mut boundaries = 0;

        let err = session
            .run_stepped(&mut source, &phases, |_, _, _| {
                boundaries += 1;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, SamplingError::Config(_)));
        assert_eq!(boundaries, 0);
        assert!(session.is_empty());
    }

    #[test]
    fn test_stepped_pattern() {
        let phases = Phase::stepped(&[0, 1, -1, -1, 1], 2000, Duration::from_secs(10));
        let deltas: Vec<i64> = phases.iter().map(|p| p.setpoint_delta).collect();
        assert_eq!(deltas, vec![0, 2000, -2000, -2000, 2000]);
    }
}
