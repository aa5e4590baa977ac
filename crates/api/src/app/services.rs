use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::info;

use kedai_auth::{SessionTokens, TacIssuer, TacPolicy, TacSender};
use kedai_core::TenantId;
use kedai_events::{EventEnvelope, InMemoryEventBus};
use kedai_infra::{
    command_dispatcher::CommandDispatcher,
    config::AppConfig,
    dashboard::Dashboard,
    event_store::{EventQuery, EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent},
    projections::{ProjectionError, ReadModels},
    workers::{ProjectionWorker, WorkerHandle},
    workflows::{InvoiceWorkflow, LedgerPoster, PosCheckout, ReceiptWorkflow},
};

/// Append, load and audit queries behind one object.
pub trait EventLog: EventStore + EventQuery {}

impl<T> EventLog for T where T: EventStore + EventQuery + ?Sized {}

pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dispatcher = CommandDispatcher<Arc<dyn EventLog>, Bus>;

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: JsonValue,
}

impl RealtimeMessage {
    fn projection_updated(envelope: &EventEnvelope<JsonValue>) -> Self {
        let aggregate_type = envelope.aggregate_type();
        Self {
            tenant_id: envelope.tenant_id(),
            topic: format!("{aggregate_type}.projection_updated"),
            payload: serde_json::json!({
                "kind": "projection_update",
                "aggregate_type": aggregate_type,
                "aggregate_id": envelope.aggregate_id().to_string(),
                "sequence_number": envelope.sequence_number(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("event store: {0}")]
    Store(#[from] EventStoreError),

    #[error("read model rebuild: {0}")]
    Rebuild(#[from] ProjectionError),

    #[error("projection worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Everything a request handler can reach.
pub struct AppServices {
    pub dispatcher: Dispatcher,
    pub events: Arc<dyn EventLog>,
    pub read_models: ReadModels,
    pub dashboard: Arc<Dashboard>,
    pub tokens: SessionTokens,
    pub tac: TacIssuer,
    pub tac_sender: Arc<dyn TacSender>,
    pub config: AppConfig,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
    worker: Option<WorkerHandle>,
}

/// Picks the event store from `config`, rebuilds every read model from the
/// log and starts the projection worker.
pub async fn build_services(config: AppConfig, tac_sender: Arc<dyn TacSender>) -> Result<AppServices, StartupError> {
    let events: Arc<dyn EventLog> = match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresEventStore::connect(url).await?;
            store.ensure_schema().await?;
            info!("using postgres event store");
            Arc::new(store)
        }
        None => {
            info!("using in-memory event store");
            Arc::new(InMemoryEventStore::new())
        }
    };
    let bus: Bus = Arc::new(InMemoryEventBus::new());

    let read_models = ReadModels::in_memory();
    let history: Vec<EventEnvelope<JsonValue>> = events.load_all().await?.iter().map(StoredEvent::to_envelope).collect();
    read_models.projections().rebuild(&history)?;
    info!(events = history.len(), "read models rebuilt");

    let dashboard = Arc::new(Dashboard::new(read_models.clone(), config.dashboard_cache_ttl()));

    // Realtime channel (SSE): lossy broadcast, tenant-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    let worker = {
        let dashboard = dashboard.clone();
        let realtime_tx = realtime_tx.clone();
        ProjectionWorker::spawn_projections(&bus, read_models.projections(), move |envelope| {
            dashboard.invalidate_for(envelope);
            let _ = realtime_tx.send(RealtimeMessage::projection_updated(envelope));
        })?
    };

    let tokens = SessionTokens::new(config.session_secret.as_bytes(), config.session_ttl());
    let tac = TacIssuer::new(TacPolicy {
        ttl: config.tac_ttl(),
        ..TacPolicy::default()
    });

    Ok(AppServices {
        dispatcher: CommandDispatcher::new(events.clone(), bus),
        events,
        read_models,
        dashboard,
        tokens,
        tac,
        tac_sender,
        config,
        realtime_tx,
        worker: Some(worker),
    })
}

impl AppServices {
    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    pub fn invoices(&self) -> InvoiceWorkflow<'_, Arc<dyn EventLog>, Bus> {
        InvoiceWorkflow::new(&self.dispatcher)
    }

    pub fn receipts(&self) -> ReceiptWorkflow<'_, Arc<dyn EventLog>, Bus> {
        ReceiptWorkflow::new(&self.dispatcher)
    }

    pub fn pos(&self) -> PosCheckout<'_, Arc<dyn EventLog>, Bus> {
        PosCheckout::new(&self.dispatcher)
    }

    pub fn ledger(&self) -> LedgerPoster<'_, Arc<dyn EventLog>, Bus> {
        LedgerPoster::new(&self.dispatcher)
    }

    /// Drops expired TAC codes and dashboard entries.
    pub fn purge_expired(&self) {
        self.tac.purge_expired(Utc::now());
        self.dashboard.purge_expired();
    }
}

impl Drop for AppServices {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

/// Build an SSE stream for a tenant (used by `/stream`).
pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
