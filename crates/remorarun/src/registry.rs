//! # Frontend Registry
//!
//! Maps calling threads to their dispatchers. A thread's `Frontend` is created on
//! its first call and lives until `shutdown`.
//!
//! Only the calling thread ever creates its own entry, so a dispatcher is built
//! with no map shard held and inserted afterwards. Each dispatcher sits behind
//! its own mutex, and a call holds only that mutex. A thread blocked on the
//! network, whether connecting or mid-call, doesn't stall lookups from other
//! threads.

use std::fmt::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::ThreadId;

use dashmap::DashMap;
use remoralink::EndpointCursor;

use crate::frontend;
use crate::frontend::Frontend;
use crate::frontend::Stats;
use crate::logging;
use crate::settings::Settings;

/// Builds the dispatcher for a thread that has none yet.
pub type FrontendFactory =
    Box<dyn Fn(&Settings, &EndpointCursor) -> frontend::Result<Frontend> + Send + Sync>;

pub struct FrontendRegistry {
    settings: Settings,
    cursor: EndpointCursor,
    factory: FrontendFactory,
    frontends: DashMap<ThreadId, Arc<Mutex<Frontend>>>,
    open: AtomicBool,
}

impl FrontendRegistry {
    /// A registry whose dispatchers connect through the configured suites, one
    /// suite per new dispatcher in configuration order.
    ///
    /// Installs the stderr logger with `settings.log_filter` unless the process
    /// already has one.
    pub fn init(settings: Settings) -> Self {
        logging::init(&settings.log_filter);
        Self::with_factory(settings, Frontend::connect)
    }

    /// A registry with a custom dispatcher constructor.
    pub fn with_factory<F>(settings: Settings, factory: F) -> Self
    where
        F: Fn(&Settings, &EndpointCursor) -> frontend::Result<Frontend> + Send + Sync + 'static,
    {
        Self {
            settings,
            cursor: EndpointCursor::new(),
            factory: Box::new(factory),
            frontends: DashMap::new(),
            open: AtomicBool::new(true),
        }
    }

    /// Runs `f` on the calling thread's dispatcher, creating it first if needed.
    ///
    /// Creation failures are logged and returned; nothing is retried.
    pub fn with_frontend<R, F>(&self, f: F) -> frontend::Result<R>
    where
        F: FnOnce(&mut Frontend) -> R,
    {
        if !self.open.load(Ordering::Acquire) {
            return Err(frontend::Error::NotInitialized);
        }
        let id = thread::current().id();
        let existing = self.frontends.get(&id).map(|entry| Arc::clone(entry.value()));
        let frontend = match existing {
            Some(frontend) => frontend,
            None => self.create(id)?,
        };
        let mut guard = lock(&frontend);
        Ok(f(&mut *guard))
    }

    fn create(&self, id: ThreadId) -> frontend::Result<Arc<Mutex<Frontend>>> {
        tracing::debug!(thread = ?id, "creating frontend");
        let created = (self.factory)(&self.settings, &self.cursor)
            .inspect_err(|e| tracing::error!(thread = ?id, error = %e, "can't create frontend"))?;
        if !self.is_open() {
            return Err(frontend::Error::NotInitialized);
        }
        let entry = self.frontends.entry(id).or_insert(Arc::new(Mutex::new(created)));
        Ok(Arc::clone(entry.value()))
    }

    /// Number of live dispatchers.
    pub fn len(&self) -> usize {
        self.frontends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frontends.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cursor(&self) -> &EndpointCursor {
        &self.cursor
    }

    /// Tears down every dispatcher and returns their combined statistics.
    ///
    /// With `dump_stats` set, each dispatcher's report and the combined total
    /// go to stderr. Later calls to `with_frontend` fail with `NotInitialized`.
    pub fn shutdown(&self) -> Stats {
        self.open.store(false, Ordering::Release);
        let ids: Vec<ThreadId> = self.frontends.iter().map(|entry| *entry.key()).collect();

        let mut dispatchers = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, frontend)) = self.frontends.remove(&id) {
                dispatchers.push(*lock(&frontend).stats());
            }
        }
        let total = dispatchers.iter().fold(Stats::default(), |mut total, stats| {
            total.merge(stats);
            total
        });
        if self.settings.dump_stats {
            eprint!("{}", report(&dispatchers, &total));
        }
        tracing::info!(
            routines = total.routines_executed,
            sent = total.bytes_sent,
            received = total.bytes_received,
            "frontends shut down"
        );
        total
    }
}

impl Drop for FrontendRegistry {
    fn drop(&mut self) {
        if self.is_open() {
            self.shutdown();
        }
    }
}

/// Per-dispatcher statistics followed by their total.
pub fn report(dispatchers: &[Stats], total: &Stats) -> String {
    let mut out = String::new();
    for (i, stats) in dispatchers.iter().enumerate() {
        let _ = writeln!(out, "[REMORA_STATS] Dispatcher {}", i);
        let _ = write!(out, "{}", stats);
    }
    let _ = writeln!(out, "[REMORA_STATS] Total over {} dispatcher(s)", dispatchers.len());
    let _ = write!(out, "{}", total);
    out
}

/// A dispatcher whose previous call panicked is still usable; its buffers are
/// reset by the next `prepare`.
fn lock(frontend: &Mutex<Frontend>) -> MutexGuard<'_, Frontend> {
    frontend.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
