//! Worker leases: a tree-wide bound on how many threads do build work at
//! once.
//!
//! A thread doing build work holds a lease. Leases taken on a thread that
//! runs on behalf of another thread's lease (see
//! [`WorkerLeaseService::with_shared_lease`]) record that lease as their
//! parent. A thread that is about to wait on other build work gives its
//! permit back with [`WorkerLeaseService::blocking`].
//!
//! The service also tracks build execution units, from submission until
//! they finish, and which build each blocked unit waits for. From that it
//! can tell when no unit is able to make progress.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

use tracing::{debug, warn};

use crate::build::BuildIdentity;
use crate::cycle::CycleDetector;
use crate::util::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerLease {
    id: u64,
    parent: Option<u64>,
}

impl WorkerLease {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn parent(&self) -> Option<u64> {
        self.parent
    }
}

impl fmt::Display for WorkerLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parent {
            Some(parent) => write!(f, "worker lease {} (child of {parent})", self.id),
            None => write!(f, "worker lease {}", self.id),
        }
    }
}

/// Snapshot of a worker pool in which nothing can move.
///
/// Two stalls with the same [`generation`](Self::generation) mean no lease,
/// unit or blocked thread changed in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stall {
    generation: u64,
    diagnostics: String,
}

impl Stall {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> String {
        self.diagnostics
    }
}

struct Holding {
    lease: WorkerLease,
    /// The permit was handed back by `blocking` and not yet re-acquired.
    released: bool,
    thread: String,
}

struct Waiter {
    since: Instant,
    thread: String,
}

struct Blocked {
    thread: String,
    on: Option<BuildIdentity>,
}

#[derive(Default)]
struct Leases {
    in_use: usize,
    holders: HashMap<ThreadId, Holding>,
    parents: HashMap<ThreadId, WorkerLease>,
    waiting: HashMap<ThreadId, Waiter>,
    blocked: HashMap<ThreadId, Blocked>,
    /// Units submitted to the executor that have not started yet.
    queued_units: usize,
    /// Running units, by the thread that runs them.
    units: HashMap<ThreadId, BuildIdentity>,
    generation: u64,
}

impl Leases {
    fn changed(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

pub struct WorkerLeaseService {
    max_workers: usize,
    /// How many units the executor runs at once.
    unit_capacity: usize,
    leases: Mutex<Leases>,
    available: Condvar,
    next_id: AtomicU64,
}

impl WorkerLeaseService {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            unit_capacity: usize::MAX,
            leases: Mutex::new(Leases::default()),
            available: Condvar::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Bounds how many units can run at once. Queued units are expected to
    /// start while fewer than `capacity` units run.
    pub fn with_unit_capacity(mut self, capacity: usize) -> Self {
        self.unit_capacity = capacity.max(1);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn current_worker_lease(&self) -> Option<WorkerLease> {
        lock(&self.leases)
            .holders
            .get(&thread::current().id())
            .map(|holding| holding.lease)
    }

    /// Runs `f` while holding a worker lease, acquiring one if this thread
    /// has none.
    pub fn run_as_worker_thread<R>(&self, f: impl FnOnce() -> R) -> R {
        let current = thread::current();
        {
            let leases = lock(&self.leases);
            if leases.holders.contains_key(&current.id()) {
                drop(leases);
                return f();
            }
        }

        let mut leases = self.wait_for_permit(lock(&self.leases));
        let lease = WorkerLease {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            parent: leases.parents.get(&current.id()).map(|p| p.id),
        };
        leases.holders.insert(
            current.id(),
            Holding {
                lease,
                released: false,
                thread: thread_label(&current),
            },
        );
        drop(leases);
        debug!(lease = %lease, "worker lease acquired");

        let _guard = HeldLease {
            service: self,
            thread: current.id(),
        };
        f()
    }

    /// Runs `f` on behalf of `parent`: leases taken by this thread inside
    /// `f` are children of `parent`.
    pub fn with_shared_lease<R>(&self, parent: Option<WorkerLease>, f: impl FnOnce() -> R) -> R {
        let Some(parent) = parent else {
            return f();
        };
        let thread = thread::current().id();
        let previous = lock(&self.leases).parents.insert(thread, parent);
        let _guard = SharedLease {
            service: self,
            thread,
            previous,
        };
        f()
    }

    /// Records a unit of build work handed to the executor. Pair with
    /// [`run_as_unit`](Self::run_as_unit) on the thread that runs it, or
    /// with [`forget_unit`](Self::forget_unit) if it never runs.
    pub fn queue_unit(&self) {
        let mut leases = lock(&self.leases);
        leases.queued_units += 1;
        leases.changed();
    }

    pub fn forget_unit(&self) {
        let mut leases = lock(&self.leases);
        leases.queued_units = leases.queued_units.saturating_sub(1);
        leases.changed();
    }

    /// Runs a queued unit of `build`'s work on the current thread.
    pub fn run_as_unit<R>(&self, build: &BuildIdentity, f: impl FnOnce() -> R) -> R {
        let thread = thread::current().id();
        {
            let mut leases = lock(&self.leases);
            leases.queued_units = leases.queued_units.saturating_sub(1);
            leases.units.insert(thread, build.clone());
            leases.changed();
        }
        let _guard = RunningUnit {
            service: self,
            thread,
        };
        f()
    }

    /// Gives back this thread's permit while `f` waits on other work, then
    /// takes a permit again.
    pub fn blocking<R>(&self, f: impl FnOnce() -> R) -> R {
        self.block_on(None, f)
    }

    /// Like [`blocking`](Self::blocking), recording that the current unit
    /// waits for work of `build`.
    pub fn blocking_on<R>(&self, build: &BuildIdentity, f: impl FnOnce() -> R) -> R {
        self.block_on(Some(build.clone()), f)
    }

    fn block_on<R>(&self, on: Option<BuildIdentity>, f: impl FnOnce() -> R) -> R {
        let current = thread::current();
        let thread = current.id();
        let (previous, released) = {
            let mut leases = lock(&self.leases);
            let previous = leases.blocked.insert(
                thread,
                Blocked {
                    thread: thread_label(&current),
                    on,
                },
            );
            let released = match leases.holders.get_mut(&thread) {
                Some(holding) if !holding.released => {
                    holding.released = true;
                    true
                }
                _ => false,
            };
            if released {
                leases.in_use -= 1;
                self.available.notify_all();
            }
            leases.changed();
            (previous, released)
        };

        let value = {
            let _guard = BlockedThread {
                service: self,
                thread,
                previous,
            };
            f()
        };

        if released {
            let mut leases = self.wait_for_permit(lock(&self.leases));
            if let Some(holding) = leases.holders.get_mut(&thread) {
                holding.released = false;
            }
        }
        value
    }

    /// Reports a stall: units are outstanding, but every running unit is
    /// blocked on another build, no thread holds or is about to take a
    /// permit, and queued units have no free executor thread.
    ///
    /// A stall seen once may be a moment between two steps. Callers confirm
    /// it by seeing the same generation again after a while.
    pub fn health_check(&self) -> Option<Stall> {
        let leases = lock(&self.leases);
        if leases.units.is_empty() && leases.queued_units == 0 {
            return None;
        }
        if leases.in_use > 0 || !leases.waiting.is_empty() {
            return None;
        }
        if leases.queued_units > 0 && leases.units.len() < self.unit_capacity {
            return None;
        }
        let mut units: BTreeMap<&BuildIdentity, (&str, &BuildIdentity)> = BTreeMap::new();
        for (thread, build) in &leases.units {
            match leases.blocked.get(thread) {
                Some(Blocked {
                    thread,
                    on: Some(other),
                }) => {
                    units.insert(build, (thread.as_str(), other));
                }
                // Working, or waiting on something other than a build.
                _ => return None,
            }
        }

        let mut lines = vec![format!(
            "no build can make progress: {} running builds are blocked, {} queued builds have not started",
            units.len(),
            leases.queued_units
        )];
        let waits_for = CycleDetector::new();
        let mut cycle = None;
        for (build, (thread, other)) in &units {
            lines.push(format!(
                "  build {} on thread {thread} waits for build {}",
                build.path(),
                other.path()
            ));
            if cycle.is_none() {
                cycle = waits_for.add_edge((*build).clone(), (*other).clone());
            }
        }
        if let Some(cycle) = cycle {
            lines.push(format!(
                "  builds wait for each other: {}",
                cycle.render(|build| build.path().to_string())
            ));
        }

        Some(Stall {
            generation: leases.generation,
            diagnostics: lines.join("\n"),
        })
    }

    /// Logs the threads holding and waiting for permits.
    pub fn log_state(&self) {
        let leases = lock(&self.leases);
        let mut holders: Vec<String> = leases
            .holders
            .values()
            .map(|h| {
                let released = if h.released { " (released)" } else { "" };
                format!("thread {} holds {}{released}", h.thread, h.lease)
            })
            .collect();
        holders.sort();
        let mut waiters: Vec<String> = leases
            .waiting
            .values()
            .map(|w| format!("thread {} waiting {}ms", w.thread, w.since.elapsed().as_millis()))
            .collect();
        waiters.sort();
        warn!(
            in_use = leases.in_use,
            max = self.max_workers,
            holders = ?holders,
            waiters = ?waiters,
            "worker lease state"
        );
    }

    fn wait_for_permit<'a>(&'a self, mut leases: MutexGuard<'a, Leases>) -> MutexGuard<'a, Leases> {
        if leases.in_use >= self.max_workers {
            let current = thread::current();
            leases.waiting.insert(
                current.id(),
                Waiter {
                    since: Instant::now(),
                    thread: thread_label(&current),
                },
            );
            while leases.in_use >= self.max_workers {
                leases = self
                    .available
                    .wait(leases)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            leases.waiting.remove(&current.id());
        }
        leases.in_use += 1;
        leases.changed();
        leases
    }
}

struct HeldLease<'a> {
    service: &'a WorkerLeaseService,
    thread: ThreadId,
}

impl Drop for HeldLease<'_> {
    fn drop(&mut self) {
        let mut leases = lock(&self.service.leases);
        if let Some(holding) = leases.holders.remove(&self.thread) {
            if !holding.released {
                leases.in_use -= 1;
                self.service.available.notify_all();
            }
            leases.changed();
        }
    }
}

struct SharedLease<'a> {
    service: &'a WorkerLeaseService,
    thread: ThreadId,
    previous: Option<WorkerLease>,
}

impl Drop for SharedLease<'_> {
    fn drop(&mut self) {
        let mut leases = lock(&self.service.leases);
        match self.previous.take() {
            Some(previous) => {
                leases.parents.insert(self.thread, previous);
            }
            None => {
                leases.parents.remove(&self.thread);
            }
        }
    }
}

struct RunningUnit<'a> {
    service: &'a WorkerLeaseService,
    thread: ThreadId,
}

impl Drop for RunningUnit<'_> {
    fn drop(&mut self) {
        let mut leases = lock(&self.service.leases);
        leases.units.remove(&self.thread);
        leases.changed();
    }
}

struct BlockedThread<'a> {
    service: &'a WorkerLeaseService,
    thread: ThreadId,
    previous: Option<Blocked>,
}

impl Drop for BlockedThread<'_> {
    fn drop(&mut self) {
        let mut leases = lock(&self.service.leases);
        match self.previous.take() {
            Some(previous) => {
                leases.blocked.insert(self.thread, previous);
            }
            None => {
                leases.blocked.remove(&self.thread);
            }
        }
        leases.changed();
    }
}

fn thread_label(thread: &thread::Thread) -> String {
    format!("'{}' ({:?})", thread.name().unwrap_or("unnamed"), thread.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_permits_bound_concurrency() {
        let service = Arc::new(WorkerLeaseService::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..6)
            .map(|_| {
                let service = Arc::clone(&service);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    service.run_as_worker_thread(|| {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(lock(&service.leases).in_use, 0);
    }

    #[test]
    fn test_nested_run_reuses_lease() {
        let service = WorkerLeaseService::new(1);
        let (outer, inner) = service.run_as_worker_thread(|| {
            let outer = service.current_worker_lease();
            let inner = service.run_as_worker_thread(|| service.current_worker_lease());
            (outer, inner)
        });
        assert!(outer.is_some());
        assert_eq!(outer, inner);
        assert!(service.current_worker_lease().is_none());
    }

    #[test]
    fn test_blocking_lets_other_threads_work() {
        let service = Arc::new(WorkerLeaseService::new(1));
        let (parent, child) = service.run_as_worker_thread(|| {
            let parent = service.current_worker_lease();
            let child = service.blocking(|| {
                let service = Arc::clone(&service);
                thread::spawn(move || {
                    service.with_shared_lease(parent, || {
                        service.run_as_worker_thread(|| service.current_worker_lease())
                    })
                })
                .join()
                .unwrap()
            });
            (parent, child)
        });
        let parent = parent.unwrap();
        let child = child.unwrap();
        assert_eq!(child.parent(), Some(parent.id()));
        assert_ne!(child.id(), parent.id());
    }

    /// Starts a unit of `build` on its own thread. The unit waits on
    /// `build_waits_for` (inside `blocking_on`) until `release` fires, or
    /// holds its permit until then when there is nothing to wait for.
    fn spawn_unit(
        service: &Arc<WorkerLeaseService>,
        build: &str,
        build_waits_for: Option<&str>,
    ) -> (mpsc::Sender<()>, thread::JoinHandle<()>) {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let service = Arc::clone(service);
        let build = BuildIdentity::from_path(build);
        let waits_for = build_waits_for.map(BuildIdentity::from_path);
        service.queue_unit();
        let handle = thread::spawn(move || {
            service.run_as_unit(&build, || {
                service.run_as_worker_thread(|| match &waits_for {
                    Some(other) => service.blocking_on(other, || {
                        started_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                    }),
                    None => {
                        started_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                    }
                })
            })
        });
        started_rx.recv().unwrap();
        (release_tx, handle)
    }

    #[test]
    fn test_busy_pool_is_healthy() {
        let service = Arc::new(WorkerLeaseService::new(1));
        let (release, worker) = spawn_unit(&service, ":a", None);
        service.queue_unit();

        // One unit works while another has not started: not a stall.
        assert_eq!(service.health_check(), None);

        release.send(()).unwrap();
        worker.join().unwrap();
        service.forget_unit();
        assert_eq!(service.health_check(), None);
    }

    #[test]
    fn test_units_waiting_on_each_other_stall() {
        let service = Arc::new(WorkerLeaseService::new(4));
        let (release_a, a) = spawn_unit(&service, ":a", Some(":b"));
        let (release_b, b) = spawn_unit(&service, ":b", Some(":a"));

        let stall = service.health_check().expect("units waiting on each other");
        assert_eq!(service.health_check().map(|s| s.generation()), Some(stall.generation()));
        let diagnostics = stall.diagnostics();
        assert!(diagnostics.contains("build :a on thread"), "{diagnostics}");
        assert!(diagnostics.contains("waits for build :b"), "{diagnostics}");
        assert!(
            diagnostics.contains("builds wait for each other: :b -> :a -> :b"),
            "{diagnostics}"
        );

        release_a.send(()).unwrap();
        release_b.send(()).unwrap();
        a.join().unwrap();
        b.join().unwrap();
        assert_eq!(service.health_check(), None);
    }

    #[test]
    fn test_queued_unit_with_free_executor_thread_is_not_a_stall() {
        let service = Arc::new(WorkerLeaseService::new(2).with_unit_capacity(2));
        let (release, worker) = spawn_unit(&service, ":a", Some(":b"));
        service.queue_unit();
        assert_eq!(service.health_check(), None);

        service.forget_unit();
        assert!(service.health_check().is_some());

        release.send(()).unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_blocked_unit_with_unstarted_work_stalls() {
        let service = Arc::new(WorkerLeaseService::new(2).with_unit_capacity(1));
        let (release, worker) = spawn_unit(&service, ":a", Some(":b"));
        service.queue_unit();

        let stall = service.health_check().expect("only a blocked unit is running");
        assert!(stall.diagnostics().contains("1 queued builds have not started"));

        // A unit starting counts as progress, even beyond the capacity.
        let (release_b, b) = spawn_unit(&service, ":b", None);
        service.forget_unit();
        assert_eq!(service.health_check(), None);

        release_b.send(()).unwrap();
        b.join().unwrap();
        let later = service.health_check().expect("only a blocked unit is left");
        assert_ne!(later.generation(), stall.generation());

        release.send(()).unwrap();
        worker.join().unwrap();
    }
}
