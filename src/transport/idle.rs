use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{PoolKey, PooledConn};

struct IdleConn {
    conn: PooledConn,
    idle_since: Instant,
}

/// Idle connections keyed by host, oldest first within each host.
#[derive(Default)]
pub(crate) struct IdleSet {
    by_host: HashMap<PoolKey, Vec<IdleConn>>,
    total: usize,
}

pub(crate) struct IdleLimits {
    pub max_idle_total: usize,
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
}

impl IdleSet {
    pub(crate) fn len(&self) -> usize {
        self.total
    }

    /// Take the most recently idled connection for `key` that has not timed out or closed.
    /// Anything stale found along the way is returned for closing.
    pub(crate) fn checkout(
        &mut self,
        key: &PoolKey,
        now: Instant,
        idle_timeout: Duration,
    ) -> (Option<PooledConn>, Vec<PooledConn>) {
        let mut stale = Vec::new();
        let Some(conns) = self.by_host.get_mut(key) else {
            return (None, stale);
        };

        let mut found = None;
        while let Some(idle) = conns.pop() {
            self.total -= 1;
            if now.duration_since(idle.idle_since) >= idle_timeout || idle.conn.is_closed() {
                stale.push(idle.conn);
                continue;
            }
            found = Some(idle.conn);
            break;
        }

        if conns.is_empty() {
            self.by_host.remove(key);
        }
        (found, stale)
    }

    /// Park a connection. Returns whatever the limits force out, possibly the connection itself.
    pub(crate) fn checkin(
        &mut self,
        conn: PooledConn,
        now: Instant,
        limits: &IdleLimits,
    ) -> Vec<PooledConn> {
        let mut evicted = self.expire(now, limits.idle_timeout);

        let per_host = self.by_host.get(&conn.key).map_or(0, Vec::len);
        if per_host >= limits.max_idle_per_host {
            evicted.push(conn);
            return evicted;
        }

        if limits.max_idle_total > 0 && self.total >= limits.max_idle_total {
            evicted.extend(self.pop_oldest());
        }

        self.total += 1;
        self.by_host.entry(conn.key.clone()).or_default().push(IdleConn {
            conn,
            idle_since: now,
        });
        evicted
    }

    /// Remove every idle connection.
    pub(crate) fn drain(&mut self) -> Vec<PooledConn> {
        self.total = 0;
        self.by_host
            .drain()
            .flat_map(|(_, conns)| conns.into_iter().map(|idle| idle.conn))
            .collect()
    }

    /// Remove connections idle for at least `idle_timeout` as of `now`, or already closed.
    pub(crate) fn expire(&mut self, now: Instant, idle_timeout: Duration) -> Vec<PooledConn> {
        let mut expired = Vec::new();
        for conns in self.by_host.values_mut() {
            let (keep, gone): (Vec<_>, Vec<_>) = conns.drain(..).partition(|idle| {
                now.duration_since(idle.idle_since) < idle_timeout && !idle.conn.is_closed()
            });
            *conns = keep;
            expired.extend(gone.into_iter().map(|idle| idle.conn));
        }
        self.by_host.retain(|_, conns| !conns.is_empty());
        self.total -= expired.len();
        expired
    }

    fn pop_oldest(&mut self) -> Option<PooledConn> {
        let key = self
            .by_host
            .iter()
            .filter_map(|(key, conns)| conns.first().map(|idle| (key, idle.idle_since)))
            .min_by_key(|(_, since)| *since)
            .map(|(key, _)| key.clone())?;

        let conns = self.by_host.get_mut(&key)?;
        let oldest = conns.remove(0);
        if conns.is_empty() {
            self.by_host.remove(&key);
        }
        self.total -= 1;
        Some(oldest.conn)
    }
}
