//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{backend::BackendInstance, LoadBalancer};

/// Round-robin selector.
///
/// The cursor points just past the last instance handed out, so unhealthy
/// instances are skipped without disturbing the rotation of healthy ones.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    fn scan(
        start: usize,
        backends: &[Arc<BackendInstance>],
        tried: &[Arc<BackendInstance>],
    ) -> Option<usize> {
        let len = backends.len();
        let eligible = |b: &Arc<BackendInstance>, avoid_tried: bool| {
            b.is_healthy() && !(avoid_tried && tried.iter().any(|t| Arc::ptr_eq(t, b)))
        };

        // Prefer instances this request has not hit yet.
        for avoid_tried in [true, false] {
            for i in 0..len {
                let index = (start + i) % len;
                if eligible(&backends[index], avoid_tried) {
                    return Some(index);
                }
            }
        }
        None
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(
        &self,
        backends: &[Arc<BackendInstance>],
        tried: &[Arc<BackendInstance>],
    ) -> Option<Arc<BackendInstance>> {
        if backends.is_empty() {
            return None;
        }
        let len = backends.len();

        let mut chosen = None;
        // The closure may run several times under contention; the last run wins.
        let _ = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                chosen = Self::scan(cursor % len, backends, tried);
                chosen.map(|index| (index + 1) % len)
            });

        chosen.map(|index| backends[index].clone())
    }
}
