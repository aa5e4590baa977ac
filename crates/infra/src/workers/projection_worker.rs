use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use kedai_core::TenantId;
use kedai_events::{EventBus, EventEnvelope, Subscription};

use crate::projections::Projections;

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Background loop feeding published envelopes to a handler.
///
/// Delivery is at-least-once, so handlers must be idempotent. With a
/// `tenant_id`, envelopes of other tenants are ignored.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    pub fn spawn<B, H, E>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<JsonValue>>,
        H: FnMut(EventEnvelope<JsonValue>) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, tenant_id, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    /// Applies every envelope to `projections`, then hands it to
    /// `after_apply` (live streams, cache invalidation).
    pub fn spawn_projections<B, F>(
        bus: &B,
        projections: Projections,
        mut after_apply: F,
    ) -> io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<JsonValue>>,
        F: FnMut(&EventEnvelope<JsonValue>) + Send + 'static,
    {
        Self::spawn("kedai-projections", bus, None, move |envelope| {
            let failures = projections.apply(&envelope);
            after_apply(&envelope);
            if failures == 0 {
                Ok(())
            } else {
                Err(failures)
            }
        })
    }
}

fn worker_loop<H, E>(
    name: &'static str,
    sub: Subscription<EventEnvelope<JsonValue>>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    handler: &mut H,
) where
    H: FnMut(EventEnvelope<JsonValue>) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(250);
    debug!(worker = name, "worker started");

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(envelope) => {
                if tenant_id.is_some_and(|t| envelope.tenant_id() != t) {
                    continue;
                }

                if let Err(err) = handler(envelope) {
                    warn!(worker = name, error = ?err, "worker handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use kedai_core::AggregateId;
    use kedai_events::InMemoryEventBus;
    use uuid::Uuid;

    fn envelope(tenant_id: TenantId) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            AggregateId::new(),
            "test.stream",
            1,
            serde_json::json!({}),
        )
    }

    fn wait_for(seen: &Arc<Mutex<Vec<TenantId>>>, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().len() < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn tenant_filter_skips_other_tenants() {
        let bus = InMemoryEventBus::new();
        let tenant = TenantId::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let handle = ProjectionWorker::spawn("test-worker", &bus, Some(tenant), move |env| {
            sink.lock().unwrap().push(env.tenant_id());
            Ok::<(), ()>(())
        })
        .unwrap();

        bus.publish(envelope(TenantId::new())).unwrap();
        bus.publish(envelope(tenant)).unwrap();
        wait_for(&seen, 1);
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![tenant]);
    }

    #[test]
    fn projection_worker_runs_hook_after_apply() {
        let bus = InMemoryEventBus::new();
        let tenant = TenantId::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let handle = ProjectionWorker::spawn_projections(&bus, Projections::new(), move |env| {
            sink.lock().unwrap().push(env.tenant_id());
        })
        .unwrap();

        bus.publish(envelope(tenant)).unwrap();
        wait_for(&seen, 1);
        handle.shutdown();

        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
