//! Read/write-split connection pool for tandem
//!
//! Two bounded FIFO channels (read replicas, write primary) with:
//! - Admission control: grow up to a hard ceiling, then wait with timeout
//! - Pre-connect live-count tick so concurrent growth can't race the ceiling
//! - Health checking on release (exec-count and idle-age ceilings)
//! - A periodic reaper that evicts idle-expired connectors
//! - A registry deduplicating pools by connector-builder key
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = PoolRegistry::new();
//! let pool = registry.get_or_create(PoolConfig::default(), Arc::new(builder));
//!
//! let conn = pool.get(Role::Read).await?;
//! // ... run statements ...
//! pool.put(conn).await;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connector::{Connector, ConnectorBuilder, Role, Status};
use crate::error::{Error, Result, ER_CON_COUNT_ERROR};

/// Pool tuning knobs. Every field has a production default.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Per-role channel capacity (idle connectors parked per role)
    pub size: usize,
    /// Idle TTL: a connector idle this long is evicted
    pub max_idle: Duration,
    /// Lifetime statement budget per connector
    pub max_exec_count: u64,
    /// How often the reaper sweeps the channels
    pub reaper_interval: Duration,
    /// Hard ceiling multiplier: at most `overflow_factor * size` live
    /// connectors per role
    pub overflow_factor: usize,
    /// Consecutive acquisition timeouts before acquisition turns fatal
    pub max_wait_timeout_count: u32,
    /// Pop guard when the channel has idle connectors
    pub pop_timeout: Duration,
    /// Pop timeout for over-capacity waiters
    pub overflow_pop_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            max_idle: Duration::from_secs(8),
            max_exec_count: 1000,
            reaper_interval: Duration::from_secs(12),
            overflow_factor: 3,
            max_wait_timeout_count: 200,
            pop_timeout: Duration::from_secs(1),
            overflow_pop_timeout: Duration::from_secs(4),
        }
    }
}

impl PoolConfig {
    /// Set the per-role channel capacity
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Set the idle TTL
    pub fn with_max_idle(mut self, ttl: Duration) -> Self {
        self.max_idle = ttl;
        self
    }

    /// Set the lifetime statement budget
    pub fn with_max_exec_count(mut self, count: u64) -> Self {
        self.max_exec_count = count;
        self
    }

    /// Set the reaper interval
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Set the ceiling multiplier
    pub fn with_overflow_factor(mut self, factor: usize) -> Self {
        self.overflow_factor = factor;
        self
    }

    /// Set the fatal-threshold timeout count
    pub fn with_max_wait_timeout_count(mut self, count: u32) -> Self {
        self.max_wait_timeout_count = count;
        self
    }

    /// Hard ceiling of live connectors per role
    pub fn ceiling(&self) -> usize {
        self.overflow_factor.max(1) * self.size.max(1)
    }

    fn sanitized(mut self) -> Self {
        self.size = self.size.max(1);
        self.overflow_factor = self.overflow_factor.max(1);
        self
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connectors minted since the pool was created
    pub minted: u64,
    /// Connectors closed (evicted, surplus, or drained)
    pub closed: u64,
    /// Successful acquisitions
    pub acquisitions: u64,
    /// Acquisition attempts that timed out waiting
    pub acquire_timeouts: u64,
    /// Connectors evicted by the reaper
    pub reaped: u64,
}

/// Atomic pool counters for concurrent updates
#[derive(Debug, Default)]
pub struct AtomicPoolStats {
    minted: AtomicU64,
    closed: AtomicU64,
    acquisitions: AtomicU64,
    acquire_timeouts: AtomicU64,
    reaped: AtomicU64,
}

impl AtomicPoolStats {
    fn record_minted(&self) {
        self.minted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_acquisition(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_acquire_timeout(&self) {
        self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reaped(&self) {
        self.reaped.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot current counters
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            minted: self.minted.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
        }
    }
}

/// One role's bounded FIFO of idle connectors plus its live count
struct Channel {
    tx: mpsc::Sender<Connector>,
    rx: Mutex<mpsc::Receiver<Connector>>,
    live: AtomicUsize,
}

impl Channel {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            live: AtomicUsize::new(0),
        }
    }
}

/// Read/write-split connection pool
pub struct Pool {
    config: PoolConfig,
    builder: Arc<dyn ConnectorBuilder>,
    key: String,
    read: Channel,
    write: Channel,
    wait_timeouts: AtomicU32,
    closed: AtomicBool,
    stats: AtomicPoolStats,
    reaper: tokio::sync::OnceCell<tokio::task::JoinHandle<()>>,
}

impl Pool {
    /// Create a pool and start its reaper.
    ///
    /// Must be called from within a tokio runtime (the reaper is a
    /// spawned task holding a weak reference, so an abandoned pool still
    /// drops).
    pub fn new(config: PoolConfig, builder: Arc<dyn ConnectorBuilder>) -> Arc<Self> {
        let config = config.sanitized();
        let size = config.size;
        let interval = config.reaper_interval;
        let pool = Arc::new(Self {
            key: builder.key(),
            config,
            builder,
            read: Channel::new(size),
            write: Channel::new(size),
            wait_timeouts: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            stats: AtomicPoolStats::default(),
            reaper: tokio::sync::OnceCell::new(),
        });

        let weak = Arc::downgrade(&pool);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(pool) = weak.upgrade() else { break };
                pool.reap().await;
            }
        });
        let _ = pool.reaper.set(handle);
        pool
    }

    /// The registry key this pool was created under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Live read connectors (held + idle)
    pub fn read_connect_num(&self) -> usize {
        self.read.live.load(Ordering::Acquire)
    }

    /// Live write connectors (held + idle)
    pub fn write_connect_num(&self) -> usize {
        self.write.live.load(Ordering::Acquire)
    }

    /// Total live connectors
    pub fn connect_num(&self) -> usize {
        self.read_connect_num() + self.write_connect_num()
    }

    /// Idle connectors currently parked for a role
    pub fn idle_count(&self, role: Role) -> usize {
        let chan = self.channel(role);
        self.config.size - chan.tx.capacity()
    }

    /// Consecutive acquisition timeouts so far
    pub fn wait_timeout_count(&self) -> u32 {
        self.wait_timeouts.load(Ordering::Acquire)
    }

    /// Counter snapshot
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    fn channel(&self, role: Role) -> &Channel {
        match role {
            Role::Read => &self.read,
            Role::Write => &self.write,
        }
    }

    fn ceiling(&self) -> usize {
        self.config.ceiling()
    }

    /// Acquire a connector for a role.
    ///
    /// Pops an idle connector when one is parked; otherwise grows until
    /// the hard ceiling, after which the caller waits for a release with
    /// a bounded timeout. Consecutive timeouts past the configured
    /// threshold turn into [`Error::ConnectFatal`].
    pub async fn get(&self, role: Role) -> Result<Connector> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let chan = self.channel(role);
        let mut conn = match self.try_pop_idle(chan).await? {
            Some(conn) => conn,
            None if self.try_tick(chan) => self.grow(chan, role).await?,
            None => self.wait_for_release(chan).await?,
        };

        conn.info_mut().mark_busy();
        self.wait_timeouts.store(0, Ordering::Release);
        self.stats.record_acquisition();
        Ok(conn)
    }

    /// Pop from the idle channel when it visibly has connectors parked.
    /// Contention on the receiver means another task is consuming; fall
    /// through to the grow/wait paths instead of queueing here.
    async fn try_pop_idle(&self, chan: &Channel) -> Result<Option<Connector>> {
        let Ok(mut rx) = chan.rx.try_lock() else {
            return Ok(None);
        };
        if rx.len() == 0 {
            return Ok(None);
        }
        match tokio::time::timeout(self.config.pop_timeout, rx.recv()).await {
            Ok(Some(conn)) => Ok(Some(conn)),
            Ok(None) => Err(Error::acquire("pool channel closed")),
            Err(_) => Ok(None),
        }
    }

    /// Over-capacity path: wait for a holder to release
    async fn wait_for_release(&self, chan: &Channel) -> Result<Connector> {
        if self.wait_timeouts.load(Ordering::Acquire) >= self.config.max_wait_timeout_count {
            return Err(Error::fatal(format!(
                "{} consecutive acquisition timeouts, database appears down",
                self.config.max_wait_timeout_count
            )));
        }

        let waited = tokio::time::timeout(self.config.overflow_pop_timeout, async {
            let mut rx = chan.rx.lock().await;
            rx.recv().await
        })
        .await;

        match waited {
            Ok(Some(conn)) => Ok(conn),
            Ok(None) => Err(Error::acquire("pool channel closed")),
            Err(_) => {
                self.wait_timeouts.fetch_add(1, Ordering::AcqRel);
                self.stats.record_acquire_timeout();
                Err(Error::acquire(format!(
                    "acquisition timed out after {:?}",
                    self.config.overflow_pop_timeout
                )))
            }
        }
    }

    /// Atomically claim a growth slot. The ceiling check and the live
    /// tick are one compare-and-swap, so parallel growers cannot both
    /// observe room and push the count past the ceiling.
    fn try_tick(&self, chan: &Channel) -> bool {
        chan.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.ceiling()).then_some(live + 1)
            })
            .is_ok()
    }

    /// Growth path. The caller has already claimed the growth slot via
    /// [`Pool::try_tick`], before the TCP connect; a failed connect rolls
    /// the tick back.
    async fn grow(&self, chan: &Channel, role: Role) -> Result<Connector> {
        match self.mint(role).await {
            Ok(conn) => Ok(conn),
            Err(err) => {
                chan.live.fetch_sub(1, Ordering::AcqRel);
                if err.errno() != Some(ER_CON_COUNT_ERROR) {
                    return Err(err);
                }
                // Server-side connection cap: fall back to waiting for a
                // release, surfacing the original error on timeout.
                warn!(key = %self.key, "server refused connection (1040), waiting for a release");
                let waited = tokio::time::timeout(self.config.overflow_pop_timeout, async {
                    let mut rx = chan.rx.lock().await;
                    rx.recv().await
                })
                .await;
                match waited {
                    Ok(Some(conn)) => Ok(conn),
                    Ok(None) => Err(Error::acquire("pool channel closed")),
                    Err(_) => {
                        self.wait_timeouts.fetch_add(1, Ordering::AcqRel);
                        self.stats.record_acquire_timeout();
                        Err(err)
                    }
                }
            }
        }
    }

    async fn mint(&self, role: Role) -> Result<Connector> {
        let mut conn = self.builder.build(role)?;
        conn.connect().await?;
        self.stats.record_minted();
        debug!(key = %self.key, %role, "minted connector");
        Ok(conn)
    }

    /// Return a connector to the pool.
    ///
    /// Closed pool, full channel, or a failed health check all close the
    /// connector instead of parking it.
    pub async fn put(&self, mut conn: Connector) {
        conn.info_mut().mark_idle();

        if self.is_closed() || !self.is_healthy(&conn) {
            self.discard(conn).await;
            return;
        }

        let chan = self.channel(conn.role());
        if let Err(send_err) = chan.tx.try_send(conn) {
            self.discard(send_err.into_inner()).await;
        }
    }

    /// Whether a connector may keep serving.
    ///
    /// A busy connector is always healthy: it is never discarded out from
    /// under its holder. An idle one is evicted once it exhausts its
    /// statement budget or its idle TTL.
    pub fn is_healthy(&self, conn: &Connector) -> bool {
        if conn.info().status() == Status::Busy {
            return true;
        }
        conn.exec_count() < self.config.max_exec_count && conn.idle_for() < self.config.max_idle
    }

    async fn discard(&self, mut conn: Connector) {
        self.channel(conn.role()).live.fetch_sub(1, Ordering::AcqRel);
        self.stats.record_closed();
        if let Err(err) = conn.close().await {
            debug!(%err, "closing discarded connector failed");
        }
    }

    /// One reaper sweep: evict idle-expired connectors, bounded by the
    /// channel length observed at sweep start. Uses non-blocking pops so
    /// it never competes with an acquirer beyond a single failed try.
    async fn reap(&self) {
        if self.is_closed() {
            return;
        }
        for role in [Role::Read, Role::Write] {
            let chan = self.channel(role);
            let Ok(mut rx) = chan.rx.try_lock() else {
                continue;
            };
            let budget = rx.len();
            for _ in 0..budget {
                let Ok(conn) = rx.try_recv() else { break };
                if conn.idle_for() >= self.config.max_idle {
                    debug!(key = %self.key, %role, "reaping idle-expired connector");
                    self.stats.record_reaped();
                    self.discard(conn).await;
                } else if let Err(send_err) = chan.tx.try_send(conn) {
                    self.discard(send_err.into_inner()).await;
                }
            }
        }
    }

    /// Close the pool: stop the reaper, refuse further gets, and close
    /// every idle connector. Held connectors are closed as their holders
    /// release them.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.reaper.get() {
            handle.abort();
        }
        for role in [Role::Read, Role::Write] {
            let chan = self.channel(role);
            let mut rx = chan.rx.lock().await;
            while let Ok(conn) = rx.try_recv() {
                self.discard(conn).await;
            }
        }
        debug!(key = %self.key, "pool closed");
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("key", &self.key)
            .field("read_live", &self.read_connect_num())
            .field("write_live", &self.write_connect_num())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Deduplicates pools by connector-builder key.
///
/// Injectable so tests build isolated registries; [`PoolRegistry::global`]
/// is the process-wide default.
#[derive(Default)]
pub struct PoolRegistry {
    pools: std::sync::Mutex<HashMap<String, Arc<Pool>>>,
}

static GLOBAL_REGISTRY: Lazy<PoolRegistry> = Lazy::new(PoolRegistry::default);

impl PoolRegistry {
    /// Create an isolated registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static PoolRegistry {
        &GLOBAL_REGISTRY
    }

    /// Get the pool registered under the builder's key, creating it on
    /// first request. A closed pool under the key is replaced.
    pub fn get_or_create(&self, config: PoolConfig, builder: Arc<dyn ConnectorBuilder>) -> Arc<Pool> {
        let key = builder.key();
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = pools.get(&key) {
            if !pool.is_closed() {
                return pool.clone();
            }
        }
        let pool = Pool::new(config, builder);
        pools.insert(key, pool.clone());
        pool
    }

    /// Whether a pool is registered under the key
    pub fn contains(&self, key: &str) -> bool {
        self.pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Close and unregister the pool under the key
    pub async fn close(&self, key: &str) {
        let pool = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Some(pool) = pool {
            pool.close().await;
        }
    }

    /// Close and unregister every pool
    pub async fn close_all(&self) {
        let pools: Vec<_> = self
            .pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, pool)| pool)
            .collect();
        for pool in pools {
            pool.close().await;
        }
    }
}
