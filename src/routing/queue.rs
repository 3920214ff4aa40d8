//! Per-route admission queue.
//!
//! A bounded FIFO waiting list in front of a bounded active set. The queue is
//! plain data; the owning route holds it behind its mutex and drives
//! advancement, so admission, removal and advance never interleave.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ProxyError;
use crate::http::request::Request;
use crate::load_balancer::Host;

/// Outcome of backend selection handed to a request leaving the queue.
pub type Grant = Result<Arc<Host>, ProxyError>;

struct Pending {
    request: Arc<Request>,
    grant: Option<oneshot::Sender<Grant>>,
}

#[derive(Default)]
pub struct Queue {
    waiting: VecDeque<Uuid>,
    active: Vec<Uuid>,
    pending: HashMap<Uuid, Pending>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Append a request to the waiting list unless it already holds
    /// `max_waiting` entries.
    pub fn admit(
        &mut self,
        request: Arc<Request>,
        max_waiting: usize,
    ) -> Option<oneshot::Receiver<Grant>> {
        if self.waiting.len() >= max_waiting {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        self.waiting.push_back(request.id);
        self.pending.insert(
            request.id,
            Pending {
                request,
                grant: Some(tx),
            },
        );
        Some(rx)
    }

    /// Move the oldest waiting request into the active set if there is room.
    pub fn next_ready(
        &mut self,
        max_active: usize,
    ) -> Option<(Arc<Request>, oneshot::Sender<Grant>)> {
        while self.active.len() < max_active {
            let id = self.waiting.pop_front()?;
            let Some(pending) = self.pending.get_mut(&id) else {
                continue;
            };
            self.active.push(id);
            if let Some(grant) = pending.grant.take() {
                return Some((pending.request.clone(), grant));
            }
        }
        None
    }

    /// Drop a request from whichever list holds it.
    pub fn remove(&mut self, id: &Uuid) -> bool {
        let known = self.pending.remove(id).is_some();
        if let Some(pos) = self.waiting.iter().position(|w| w == id) {
            self.waiting.remove(pos);
        } else if let Some(pos) = self.active.iter().position(|a| a == id) {
            self.active.swap_remove(pos);
        }
        known
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.pending.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::Connection;

    fn requests(n: usize) -> Vec<Arc<Request>> {
        let conn = Arc::new(Connection::new("127.0.0.1:1234".parse().unwrap(), false));
        (0..n)
            .map(|_| Request::test_request(&conn, "api.example.com"))
            .collect()
    }

    #[test]
    fn test_rejects_when_waiting_is_full() {
        let mut queue = Queue::new();
        let reqs = requests(3);
        assert!(queue.admit(reqs[0].clone(), 2).is_some());
        assert!(queue.admit(reqs[1].clone(), 2).is_some());
        assert!(queue.admit(reqs[2].clone(), 2).is_none());
        assert_eq!(queue.waiting_len(), 2);
        assert!(!queue.contains(&reqs[2].id));
    }

    #[test]
    fn test_fifo_with_bounded_active() {
        let mut queue = Queue::new();
        let reqs = requests(3);
        for r in &reqs {
            queue.admit(r.clone(), 10).unwrap();
        }

        let (first, _) = queue.next_ready(2).unwrap();
        let (second, _) = queue.next_ready(2).unwrap();
        assert!(queue.next_ready(2).is_none());
        assert_eq!(first.id, reqs[0].id);
        assert_eq!(second.id, reqs[1].id);
        assert_eq!(queue.active_len(), 2);
        assert_eq!(queue.waiting_len(), 1);

        assert!(queue.remove(&reqs[0].id));
        let (third, _) = queue.next_ready(2).unwrap();
        assert_eq!(third.id, reqs[2].id);
        assert!(queue.active_len() <= 2);
    }

    #[test]
    fn test_remove_from_waiting() {
        let mut queue = Queue::new();
        let reqs = requests(2);
        queue.admit(reqs[0].clone(), 10).unwrap();
        queue.admit(reqs[1].clone(), 10).unwrap();

        assert!(queue.remove(&reqs[0].id));
        assert!(!queue.remove(&reqs[0].id));
        let (next, _) = queue.next_ready(1).unwrap();
        assert_eq!(next.id, reqs[1].id);
    }
}
