//! Incremental tracking of recent notebook runs.
//!
//! The tracker keeps a bounded, most-recent-first snapshot of runs and
//! refreshes it cheaply: new runs are fetched incrementally past the newest
//! job already seen, and only non-terminal entries are re-described.
//! Interactive callers drive it from a timer via [`RefreshSchedule`], which
//! backs off while nothing changes.

use std::cell::{Cell, RefCell};
use std::cmp::min;
use std::time::Instant;

use tracing::{debug, trace};

use crate::prelude::*;
use crate::request::JOB_NAME_PREFIX;
use crate::runs::{describe_run, JobNamePager};

/// Where the tracker gets run information from. The production source is the
/// platform's job history; tests script their own.
pub trait RunSource {
    /// List runs newer than `latest_seen` (all of them when `None`), most
    /// recent first, at most `max`.
    fn list_since(&self, latest_seen: Option<&str>, max: usize) -> Result<Vec<RunDescription>>;

    /// Re-describe one run.
    fn describe(&self, job_name: &str) -> Result<RunDescription>;
}

/// The platform-backed [`RunSource`].
pub struct PlatformRuns;

impl RunSource for PlatformRuns {
    fn list_since(&self, latest_seen: Option<&str>, max: usize) -> Result<Vec<RunDescription>> {
        let pager = JobNamePager::new(|token: Option<&str>| {
            let mut args = vec![
                "sagemaker",
                "list-processing-jobs",
                "--name-contains",
                JOB_NAME_PREFIX,
                "--max-results",
                "30",
            ];
            if let Some(token) = token {
                args.push("--next-token");
                args.push(token);
            }
            crate::aws::retry_throttled(|| crate::aws::aws_parse_json(&args))
        });
        let mut runs = vec![];
        for name in pager {
            let name = name?;
            if latest_seen == Some(name.as_str()) {
                break;
            }
            runs.push(describe_run(&name)?);
            if runs.len() >= max {
                break;
            }
        }
        Ok(runs)
    }

    fn describe(&self, job_name: &str) -> Result<RunDescription> {
        describe_run(job_name)
    }
}

/// A bounded snapshot of recent runs, updated in place.
pub struct RunTracker {
    source: Box<dyn RunSource>,
    runs: RefCell<Vec<RunDescription>>,
    capacity: usize,
    refreshing: Cell<bool>,
    listeners: RefCell<Vec<Box<dyn Fn(&[RunDescription])>>>,
}

impl RunTracker {
    /// Track at most `capacity` runs from `source`.
    pub fn new(source: Box<dyn RunSource>, capacity: usize) -> Self {
        RunTracker {
            source,
            runs: RefCell::new(vec![]),
            capacity,
            refreshing: Cell::new(false),
            listeners: RefCell::new(vec![]),
        }
    }

    /// Track the default number of runs from the platform.
    pub fn platform() -> Self {
        RunTracker::new(Box::new(PlatformRuns), 20)
    }

    /// The current snapshot, most recent first.
    pub fn runs(&self) -> Vec<RunDescription> {
        self.runs.borrow().clone()
    }

    /// Register a callback fired after every update that changed the
    /// snapshot.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&[RunDescription]) + 'static,
    {
        self.listeners.borrow_mut().push(Box::new(listener));
    }

    /// Refresh the snapshot. Returns whether anything changed. An update
    /// requested while another is already running is dropped, not queued.
    pub fn update(&self) -> Result<bool> {
        if self.refreshing.replace(true) {
            trace!("dropping overlapping tracker update");
            return Ok(false);
        }
        let result = self.refresh();
        if let Ok(true) = result {
            let snapshot = self.runs.borrow().clone();
            for listener in self.listeners.borrow().iter() {
                listener(&snapshot);
            }
        }
        self.refreshing.set(false);
        result
    }

    fn refresh(&self) -> Result<bool> {
        let latest_seen = self.runs.borrow().first().map(|desc| desc.job.clone());
        let new_runs = self
            .source
            .list_since(latest_seen.as_deref(), self.capacity)?;
        let mut changed = !new_runs.is_empty();

        // Terminal runs never change again, so only in-flight entries get
        // re-described.
        let mut refreshed = vec![];
        for desc in self.runs.borrow().iter() {
            if desc.status.is_terminal() {
                refreshed.push(desc.clone());
            } else {
                let updated = self.source.describe(&desc.job)?;
                if updated != *desc {
                    changed = true;
                }
                refreshed.push(updated);
            }
        }

        let mut merged = new_runs;
        merged.extend(refreshed);
        if merged.len() > self.capacity {
            merged.truncate(self.capacity);
            changed = true;
        }
        if changed {
            debug!("tracker snapshot changed, {} runs", merged.len());
            *self.runs.borrow_mut() = merged;
        }
        Ok(changed)
    }
}

/// Adaptive pacing for tracker updates: quick while runs are changing, slow
/// while nothing happens.
#[derive(Clone, Copy, Debug)]
pub struct RefreshSchedule {
    base: Duration,
    max: Duration,
    interval: Duration,
    next_due: Instant,
}

impl RefreshSchedule {
    /// Start a schedule that first fires `base` from now and never waits
    /// longer than `max` between updates.
    pub fn new(base: Duration, max: Duration) -> Self {
        RefreshSchedule {
            base,
            max,
            interval: base,
            next_due: Instant::now() + base,
        }
    }

    /// A schedule suited to interactive status displays.
    pub fn interactive() -> Self {
        RefreshSchedule::new(Duration::from_secs(10), Duration::from_secs(300))
    }

    /// Is an update due at `now`?
    pub fn due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// The current interval between updates.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record the outcome of an update finishing at `now`. A change resets
    /// the pace to `base`; an unchanged snapshot doubles the interval up to
    /// `max`.
    pub fn completed(&mut self, now: Instant, changed: bool) {
        self.interval = if changed {
            self.base
        } else {
            min(self.interval * 2, self.max)
        };
        self.next_due = now + self.interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn desc(job: &str, status: Status) -> RunDescription {
        RunDescription {
            notebook: "weather.ipynb".to_owned(),
            rule: String::new(),
            parameters: "{}".to_owned(),
            job: job.to_owned(),
            status,
            failure: None,
            created: Utc::now(),
            start: None,
            end: None,
            elapsed: None,
            result: None,
            input: String::new(),
            image: "notebook-runner".to_owned(),
            instance: "ml.m5.large".to_owned(),
            role: "BasicExecuteNotebookRole-us-west-2".to_owned(),
        }
    }

    /// A source scripted with successive `list_since` results and a fixed
    /// `describe` table, counting calls.
    struct ScriptedSource {
        pages: RefCell<VecDeque<Vec<RunDescription>>>,
        describes: RefCell<HashMap<String, RunDescription>>,
        describe_calls: Rc<Cell<usize>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Vec<RunDescription>>) -> Self {
            ScriptedSource {
                pages: RefCell::new(pages.into()),
                describes: RefCell::new(HashMap::new()),
                describe_calls: Rc::new(Cell::new(0)),
            }
        }

        fn will_describe(&self, desc: RunDescription) {
            self.describes.borrow_mut().insert(desc.job.clone(), desc);
        }
    }

    impl RunSource for ScriptedSource {
        fn list_since(
            &self,
            _latest_seen: Option<&str>,
            _max: usize,
        ) -> Result<Vec<RunDescription>> {
            Ok(self.pages.borrow_mut().pop_front().unwrap_or_default())
        }

        fn describe(&self, job_name: &str) -> Result<RunDescription> {
            self.describe_calls.set(self.describe_calls.get() + 1);
            Ok(self.describes.borrow()[job_name].clone())
        }
    }

    #[test]
    fn new_runs_land_at_the_front() {
        let source = ScriptedSource::new(vec![
            vec![desc("papermill-a", Status::Completed)],
            vec![desc("papermill-b", Status::InProgress)],
        ]);
        let tracker = RunTracker::new(Box::new(source), 20);

        assert!(tracker.update().unwrap());
        assert_eq!(tracker.runs().len(), 1);

        assert!(tracker.update().unwrap());
        let runs = tracker.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].job, "papermill-b");
        assert_eq!(runs[1].job, "papermill-a");
    }

    #[test]
    fn only_in_flight_runs_are_redescribed() {
        let source = ScriptedSource::new(vec![
            vec![
                desc("papermill-b", Status::InProgress),
                desc("papermill-a", Status::Completed),
            ],
            vec![],
        ]);
        source.will_describe(desc("papermill-b", Status::Completed));
        let calls = Rc::clone(&source.describe_calls);
        let tracker = RunTracker::new(Box::new(source), 20);

        assert!(tracker.update().unwrap());
        // Second update: only papermill-b is non-terminal.
        assert!(tracker.update().unwrap());
        assert_eq!(calls.get(), 1);
        assert_eq!(tracker.runs()[0].status, Status::Completed);

        // Third update: everything is terminal and nothing is new.
        assert!(!tracker.update().unwrap());
    }

    #[test]
    fn snapshot_is_bounded() {
        let source = ScriptedSource::new(vec![
            vec![desc("papermill-a", Status::Completed)],
            vec![
                desc("papermill-c", Status::Completed),
                desc("papermill-b", Status::Completed),
            ],
        ]);
        let tracker = RunTracker::new(Box::new(source), 2);
        tracker.update().unwrap();
        tracker.update().unwrap();
        let runs = tracker.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].job, "papermill-c");
        assert_eq!(runs[1].job, "papermill-b");
    }

    #[test]
    fn reentrant_updates_are_dropped() {
        let source = ScriptedSource::new(vec![vec![desc("papermill-a", Status::Completed)]]);
        let tracker = Rc::new(RunTracker::new(Box::new(source), 20));
        let inner_result = Rc::new(Cell::new(None));

        let tracker_for_listener = Rc::clone(&tracker);
        let inner_for_listener = Rc::clone(&inner_result);
        tracker.add_listener(move |_| {
            inner_for_listener.set(Some(tracker_for_listener.update().unwrap()));
        });

        assert!(tracker.update().unwrap());
        assert_eq!(inner_result.get(), Some(false));
    }

    #[test]
    fn schedule_backs_off_and_resets() {
        let now = Instant::now();
        let mut schedule = RefreshSchedule::new(Duration::from_secs(10), Duration::from_secs(40));
        assert!(!schedule.due(now));
        assert!(schedule.due(now + Duration::from_secs(10)));

        schedule.completed(now, false);
        assert_eq!(schedule.interval(), Duration::from_secs(20));
        schedule.completed(now, false);
        assert_eq!(schedule.interval(), Duration::from_secs(40));
        schedule.completed(now, false);
        assert_eq!(schedule.interval(), Duration::from_secs(40));

        schedule.completed(now, true);
        assert_eq!(schedule.interval(), Duration::from_secs(10));
        assert!(schedule.due(now + Duration::from_secs(10)));
    }
}
