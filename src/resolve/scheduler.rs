use std::cmp::min;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use crate::frame::Normalizer;
use crate::log::debug;
use crate::log::info;
use crate::log::trace;
use crate::pe::ExportCache;
use crate::CallStackUnit;
use crate::ModuleRegistry;
use crate::ResolveOpts;
use crate::SymbolProvider;

use super::Orchestrator;
use super::ResolutionCache;
use super::Sessions;


/// The type of callback invoked with the completion percentage of a
/// run.
pub type ProgressFn = dyn Fn(u8) + Send + Sync;


#[derive(Debug, Default)]
struct ControlState {
    cancelled: AtomicBool,
    completed: AtomicUsize,
    total: AtomicUsize,
}


/// A handle for observing and cancelling a resolution run from another
/// thread.
///
/// Cancellation is cooperative: workers check for it before starting
/// on a call stack, so a cancelled run may still finish the call
/// stacks currently in flight.
#[derive(Clone, Debug, Default)]
pub struct RunControl {
    state: Arc<ControlState>,
}

impl RunControl {
    /// Create a new, not yet cancelled, handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the run.
    pub fn cancel(&self) {
        let () = self.state.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Retrieve the percentage of call stacks processed so far.
    pub fn progress(&self) -> u8 {
        let total = self.state.total.load(Ordering::Relaxed);
        let completed = self.state.completed.load(Ordering::Relaxed);
        percent(completed, total)
    }

    fn start(&self, total: usize) {
        let () = self.state.completed.store(0, Ordering::Relaxed);
        let () = self.state.total.store(total, Ordering::Relaxed);
    }

    /// Record the completion of a call stack, returning the number
    /// completed so far.
    fn complete_one(&self) -> usize {
        self.state.completed.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0
    }
    (completed.min(total) * 100 / total) as u8
}


/// Drives the resolution of a set of call stacks on a pool of worker
/// threads.
///
/// Call stacks are striped across workers: worker `w` of `W` handles
/// every unit `i` with `i % W == w`.
pub(crate) struct Scheduler<'run> {
    pub provider: &'run dyn SymbolProvider,
    pub search_paths: &'run [PathBuf],
    pub recursive: bool,
    pub max_workers: Option<NonZeroUsize>,
    pub registry: &'run ModuleRegistry,
    pub exports: &'run ExportCache,
    pub opts: &'run ResolveOpts,
    pub control: &'run RunControl,
    pub progress: Option<&'run (dyn Fn(u8) + Send + Sync + 'run)>,
}

impl Debug for Scheduler<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Scheduler")
            .field("provider", &self.provider)
            .field("search_paths", &self.search_paths)
            .field("recursive", &self.recursive)
            .field("max_workers", &self.max_workers)
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl Scheduler<'_> {
    fn worker_count(&self, units: usize) -> usize {
        let parallelism = self
            .max_workers
            .or_else(|| thread::available_parallelism().ok())
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        min(units, parallelism)
    }

    /// Resolve all `units`.
    ///
    /// Returns `false` if the run got cancelled, in which case some
    /// units may not have been resolved.
    pub fn run(&self, units: &[CallStackUnit]) -> bool {
        let workers = self.worker_count(units.len());
        let () = self.control.start(units.len());
        info!("resolving {} call stacks using {workers} workers", units.len());

        let cache = ResolutionCache::new();
        let cache = &cache;
        let () = thread::scope(|scope| {
            for worker in 0..workers {
                let _handle = scope.spawn(move || self.work(worker, workers, units, cache));
            }
        });

        let cancelled = self.control.is_cancelled();
        if cancelled {
            info!("run got cancelled");
        }
        !cancelled
    }

    fn work(&self, worker: usize, workers: usize, units: &[CallStackUnit], cache: &ResolutionCache) {
        trace!("worker {worker} starting");

        let mut sessions = Sessions::new(self.provider, self.search_paths, self.recursive);
        let normalizer = Normalizer {
            registry: self.registry,
            exports: self.exports,
            search_paths: self.search_paths,
            recursive: self.recursive,
            symbolized: self.opts.relookup && self.opts.code_info,
        };
        let orchestrator = Orchestrator::new(cache, self.opts);

        for unit in units.iter().skip(worker).step_by(workers) {
            if self.control.is_cancelled() {
                debug!("worker {worker} observed cancellation");
                break
            }

            let text = self.resolve_unit(unit, &normalizer, &orchestrator, &mut sessions);
            let () = unit.set_resolved(text);

            let completed = self.control.complete_one();
            if let Some(progress) = self.progress {
                let () = progress(percent(completed, units.len()));
            }
        }

        trace!("worker {worker} done");
    }

    fn resolve_unit(
        &self,
        unit: &CallStackUnit,
        normalizer: &Normalizer<'_>,
        orchestrator: &Orchestrator<'_>,
        sessions: &mut Sessions<'_>,
    ) -> String {
        let frames = if self.opts.single_line_frames {
            unit.text.split_whitespace().collect::<Vec<_>>()
        } else {
            unit.text.lines().collect::<Vec<_>>()
        };

        frames
            .into_iter()
            .map(str::trim)
            .filter(|frame| !frame.is_empty())
            .map(|frame| orchestrator.resolve_frame(normalizer.normalize(frame), sessions))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
