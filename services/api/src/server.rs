use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryNotifier, InMemoryStore};
use crate::routes::with_submission_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use formflow::config::{AppConfig, EscalationConfig};
use formflow::error::AppError;
use formflow::submissions::SubmissionService;
use formflow::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

type Service = SubmissionService<InMemoryStore, InMemoryNotifier>;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryStore::default());
    let notifier = Arc::new(InMemoryNotifier::default());
    let service = Arc::new(SubmissionService::new(store, notifier));

    spawn_escalation_sweeper(service.clone(), &config.escalation);

    let app = with_submission_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "form workflow service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_escalation_sweeper(service: Arc<Service>, config: &EscalationConfig) {
    let Some(period) = config.interval() else {
        info!("escalation sweeper disabled");
        return;
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = service.sweep_escalations() {
                warn!(error = %err, "escalation sweep failed");
            }
        }
    });
}
