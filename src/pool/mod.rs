//! Bounded connection pool with borrow/return semantics
//!
//! The pool is the only shared mutable state in the crate; all idle/active
//! bookkeeping sits behind one mutex. Borrowed connections are exclusively
//! owned by the borrower through a guard that returns them on drop.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::client::ConnectionFactory;
use crate::utils::{PoolError, Result};

/// Pool tuning knobs
///
/// Defaults mirror the common object-pool defaults: eight connections,
/// LIFO order, block indefinitely when exhausted, no liveness probes,
/// background eviction disabled.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on connections (idle + borrowed)
    pub max_total: usize,
    /// Idle connections kept back from soft eviction
    pub min_idle: usize,
    /// Borrow the most-recently-returned connection first
    pub lifo: bool,
    /// Wait for a return when at capacity instead of failing fast
    pub block_when_exhausted: bool,
    /// Bound on the blocking wait; `None` waits indefinitely
    pub max_wait: Option<Duration>,
    /// Probe connections before handing them out
    pub test_on_borrow: bool,
    /// Probe connections when they are returned
    pub test_on_return: bool,
    /// Probe idle connections during eviction runs
    pub test_while_idle: bool,
    /// Interval between background eviction runs; `None` disables the evictor
    pub time_between_eviction_runs: Option<Duration>,
    /// Idle connections examined per eviction run
    pub num_tests_per_eviction_run: usize,
    /// Evict connections idle longer than this; `None` disables the threshold
    pub min_evictable_idle: Option<Duration>,
    /// Softer threshold applied only while more than `min_idle` sit idle
    pub soft_min_evictable_idle: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 8,
            min_idle: 0,
            lifo: true,
            block_when_exhausted: true,
            max_wait: None,
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: false,
            time_between_eviction_runs: None,
            num_tests_per_eviction_run: 3,
            min_evictable_idle: Some(Duration::from_secs(30 * 60)),
            soft_min_evictable_idle: None,
        }
    }
}

struct IdleConn<C> {
    conn: C,
    returned_at: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConn<C>>,
    active: usize,
    /// Connections pulled out of the idle set by a running eviction pass;
    /// still counted against `max_total`
    under_test: usize,
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Conn>>,
    available: Condvar,
}

/// Bounded pool of connections to one backend node
///
/// Cloning yields another handle to the same pool.
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            factory,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active: 0,
                under_test: 0,
            }),
            available: Condvar::new(),
        });

        if let Some(interval) = inner.config.time_between_eviction_runs {
            spawn_evictor(&inner, interval);
        }

        Self { inner }
    }

    /// Borrow a connection, opening a new one when under capacity
    ///
    /// At capacity this fails with `PoolError::Exhausted` immediately when
    /// blocking is disabled, or after `max_wait` otherwise. With
    /// `test_on_borrow`, a connection that fails its probe is discarded
    /// and the borrow retried once against a fresh one.
    pub fn borrow(&self) -> Result<PooledConnection<F>> {
        let deadline = self.inner.config.max_wait.map(|wait| Instant::now() + wait);
        let mut revalidated = false;

        loop {
            let mut conn = match self.take_or_reserve(deadline)? {
                Some(conn) => conn,
                // Reserved a slot; open a fresh connection outside the lock
                None => match self.inner.factory.create() {
                    Ok(conn) => conn,
                    Err(e) => {
                        self.inner.discard_active();
                        return Err(e.into());
                    }
                },
            };

            if self.inner.config.test_on_borrow && !self.inner.factory.validate(&mut conn) {
                debug!("discarding connection that failed borrow validation");
                drop(conn);
                self.inner.discard_active();
                if revalidated {
                    return Err(PoolError::Exhausted.into());
                }
                revalidated = true;
                continue;
            }

            return Ok(PooledConnection {
                pool: Arc::clone(&self.inner),
                conn: Some(conn),
            });
        }
    }

    /// Take an idle connection, or reserve a slot for a new one (`None`)
    fn take_or_reserve(&self, deadline: Option<Instant>) -> Result<Option<F::Conn>> {
        let inner = &self.inner;
        let cfg = &inner.config;
        let mut state = inner.state.lock();

        loop {
            let idle = if cfg.lifo {
                state.idle.pop_back()
            } else {
                state.idle.pop_front()
            };
            if let Some(idle) = idle {
                state.active += 1;
                return Ok(Some(idle.conn));
            }

            if state.active + state.idle.len() + state.under_test < cfg.max_total {
                state.active += 1;
                return Ok(None);
            }

            if !cfg.block_when_exhausted {
                return Err(PoolError::Exhausted.into());
            }

            match deadline {
                None => inner.available.wait(&mut state),
                Some(deadline) => {
                    if inner.available.wait_until(&mut state, deadline).timed_out()
                        && state.idle.is_empty()
                        && state.active + state.under_test >= cfg.max_total
                    {
                        return Err(PoolError::Exhausted.into());
                    }
                }
            }
        }
    }

    /// Idle connections currently held by the pool
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Connections currently borrowed
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active
    }

    /// Run one eviction pass now
    ///
    /// The background evictor calls this every `time_between_eviction_runs`.
    pub fn evict(&self) {
        self.inner.run_eviction();
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn return_conn(&self, mut conn: F::Conn) {
        let healthy = !self.config.test_on_return || self.factory.validate(&mut conn);

        let mut state = self.state.lock();
        state.active -= 1;
        if healthy {
            state.idle.push_back(IdleConn {
                conn,
                returned_at: Instant::now(),
            });
        } else {
            debug!("discarding connection that failed return validation");
        }
        drop(state);

        self.available.notify_one();
    }

    /// Release a reserved/borrowed slot without recycling the connection
    fn discard_active(&self) {
        let mut state = self.state.lock();
        state.active -= 1;
        drop(state);

        self.available.notify_one();
    }

    fn run_eviction(&self) {
        let cfg = &self.config;

        // Examine the oldest idle connections outside the lock so probes
        // do not stall borrowers.
        let idle_before;
        let mut under_test = Vec::new();
        {
            let mut state = self.state.lock();
            idle_before = state.idle.len();
            let n = cfg.num_tests_per_eviction_run.min(state.idle.len());
            for _ in 0..n {
                if let Some(idle) = state.idle.pop_front() {
                    under_test.push(idle);
                }
            }
            state.under_test += under_test.len();
        }

        let taken = under_test.len();
        let now = Instant::now();
        let mut evicted = 0usize;
        let mut survivors = Vec::with_capacity(under_test.len());

        for mut idle in under_test {
            let idle_for = now.saturating_duration_since(idle.returned_at);

            let hard_evict = cfg.min_evictable_idle.map_or(false, |min| idle_for >= min);
            // soft threshold only applies while more than min_idle sit idle
            let soft_evict = cfg.soft_min_evictable_idle.map_or(false, |soft| {
                idle_for >= soft && idle_before - evicted > cfg.min_idle
            });
            if hard_evict || soft_evict {
                debug!(
                    idle_ms = idle_for.as_millis() as u64,
                    "evicting idle connection"
                );
                evicted += 1;
                continue;
            }

            if cfg.test_while_idle && !self.factory.validate(&mut idle.conn) {
                debug!("discarding idle connection that failed liveness probe");
                evicted += 1;
                continue;
            }

            survivors.push(idle);
        }

        let mut state = self.state.lock();
        state.under_test -= taken;
        for idle in survivors.into_iter().rev() {
            state.idle.push_front(idle);
        }
        drop(state);

        if taken > 0 {
            self.available.notify_all();
        }
    }
}

fn spawn_evictor<F: ConnectionFactory>(inner: &Arc<PoolInner<F>>, interval: Duration) {
    let weak: Weak<PoolInner<F>> = Arc::downgrade(inner);
    let result = thread::Builder::new()
        .name("shardcache-pool-evictor".to_string())
        .spawn(move || loop {
            thread::sleep(interval);
            match weak.upgrade() {
                Some(inner) => inner.run_eviction(),
                None => break, // pool dropped
            }
        });

    if let Err(e) = result {
        warn!("failed to start pool evictor thread: {}", e);
    }
}

/// Exclusively owned borrowed connection, returned to the pool on drop
pub struct PooledConnection<F: ConnectionFactory> {
    pool: Arc<PoolInner<F>>,
    conn: Option<F::Conn>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Drop the connection instead of recycling it
    pub fn invalidate(mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn);
            self.pool.discard_active();
        }
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Conn;

    fn deref(&self) -> &F::Conn {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut F::Conn {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_conn(conn);
        }
    }
}
