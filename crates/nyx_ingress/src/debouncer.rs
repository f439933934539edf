//! Ingress & Debouncer (C5, §4.5): batches inbound events per session within
//! a sliding quiet window before handing them to the orchestrator. Grounded
//! on the "cancel and replace a single-shot timer task" idiom
//! `mneme_onebot::client::PendingMessageQueue` uses for its own buffering,
//! generalized here to a per-session debounce rather than a single global
//! outbound queue.

use nyx_core::SessionId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

type FlushFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type FlushCallback<T> = Arc<dyn Fn(SessionId, Vec<T>) -> FlushFuture + Send + Sync>;

struct SessionBuffer<T> {
    events: Vec<T>,
    timer: JoinHandle<()>,
}

/// Debounces inbound events per session. At most one pending flush per
/// session; each `add` resets that session's quiet-window timer; flushes
/// run outside the buffer lock and deliver events in arrival order.
pub struct Debouncer<T: Send + 'static> {
    wait_time: Duration,
    buffers: Mutex<HashMap<SessionId, SessionBuffer<T>>>,
    on_flush: FlushCallback<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F, Fut>(wait_time: Duration, on_flush: F) -> Arc<Self>
    where
        F: Fn(SessionId, Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Arc::new(Self {
            wait_time,
            buffers: Mutex::new(HashMap::new()),
            on_flush: Arc::new(move |sid, events| Box::pin(on_flush(sid, events))),
        })
    }

    /// Append `event` to `session_id`'s buffer, cancelling any pending
    /// flush timer and starting a fresh one.
    pub async fn add(self: &Arc<Self>, session_id: SessionId, event: T) {
        let mut guard = self.buffers.lock().await;
        let entry = guard.entry(session_id.clone());
        match entry {
            std::collections::hash_map::Entry::Occupied(mut occ) => {
                occ.get_mut().timer.abort();
                occ.get_mut().events.push(event);
            }
            std::collections::hash_map::Entry::Vacant(vac) => {
                vac.insert(SessionBuffer { events: vec![event], timer: tokio::spawn(async {}) });
            }
        }
        let timer = self.spawn_timer(session_id.clone());
        if let Some(buf) = guard.get_mut(&session_id) {
            buf.timer = timer;
        }
    }

    fn spawn_timer(self: &Arc<Self>, session_id: SessionId) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.wait_time).await;
            this.fire(session_id).await;
        })
    }

    /// Detach the buffer (clearing the timer slot) and invoke the flush
    /// callback without holding the lock, per §4.5.
    async fn fire(self: &Arc<Self>, session_id: SessionId) {
        let events = {
            let mut guard = self.buffers.lock().await;
            guard.remove(&session_id).map(|b| b.events)
        };
        if let Some(events) = events {
            if !events.is_empty() {
                (self.on_flush)(session_id, events).await;
            }
        }
    }

    /// Number of sessions with a buffer pending flush. Test/ops visibility.
    pub async fn pending_sessions(&self) -> usize {
        self.buffers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn single_event_flushes_after_wait_time() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(Duration::from_millis(30), move |sid, events: Vec<&'static str>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((sid, events));
            }
        });

        debouncer.add(SessionId::from("s1"), "hello").await;
        let (sid, events) = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await.unwrap().unwrap();
        assert_eq!(sid, SessionId::from("s1"));
        assert_eq!(events, vec!["hello"]);
    }

    #[tokio::test]
    async fn burst_coalesces_into_one_flush() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(Duration::from_millis(50), move |sid, events: Vec<i32>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((sid, events));
            }
        });

        debouncer.add(SessionId::from("s1"), 1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        debouncer.add(SessionId::from("s1"), 2).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        debouncer.add(SessionId::from("s1"), 3).await;

        let (_, events) = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await.unwrap().unwrap();
        assert_eq!(events, vec![1, 2, 3]);
        assert!(rx.try_recv().is_err(), "should flush exactly once");
    }

    #[tokio::test]
    async fn independent_sessions_flush_independently() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(Duration::from_millis(30), move |sid, events: Vec<i32>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((sid, events));
            }
        });

        debouncer.add(SessionId::from("a"), 1).await;
        debouncer.add(SessionId::from("b"), 2).await;

        let mut seen = std::collections::HashSet::new();
        for _ in 0..2 {
            let (sid, _) = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await.unwrap().unwrap();
            seen.insert(sid);
        }
        assert!(seen.contains(&SessionId::from("a")));
        assert!(seen.contains(&SessionId::from("b")));
    }

    #[tokio::test]
    async fn pending_sessions_reports_buffered_count() {
        let debouncer = Debouncer::new(Duration::from_millis(200), |_: SessionId, _: Vec<i32>| async {});
        debouncer.add(SessionId::from("a"), 1).await;
        assert_eq!(debouncer.pending_sessions().await, 1);
    }
}
