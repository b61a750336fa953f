use homepi_sentinel::automation::{AutomationTrigger, FlipperGarage};
use homepi_sentinel::camera::{
    CameraHealth, CameraRefresher, CaptureSupervisor, FfmpegFrameSource, FrameBuffer, FrameSource,
};
use homepi_sentinel::config::AppConfig;
use homepi_sentinel::detection::DetectionOrchestrator;
use homepi_sentinel::detection_log::MemoryDetectionStore;
use homepi_sentinel::notifier::{LogNotifier, Notifier, TelegramNotifier};
use homepi_sentinel::pantilt::{build_actuator, PanTiltLimits};
use homepi_sentinel::patrol::PatrolStateMachine;
use homepi_sentinel::tracking::TrackingController;
use homepi_sentinel::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homepi_sentinel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
    let config = Arc::new(AppConfig::load(&config_path)?);
    tracing::info!(
        config = %config_path,
        inference_url = %config.inference_url,
        camera = %config.camera.source,
        "Starting homepi-sentinel"
    );

    // Camera pipeline
    let source = Arc::new(FfmpegFrameSource::new(config.camera.clone()));
    let buffer = Arc::new(FrameBuffer::new());
    let health = Arc::new(CameraHealth::new());
    let (refresh_tx, refresh_rx) = mpsc::channel(4);
    let supervisor = Arc::new(CaptureSupervisor::new(
        source.clone(),
        buffer.clone(),
        health.clone(),
        config.capture.clone(),
        refresh_tx,
    ));
    let refresher = Arc::new(CameraRefresher::new(
        source.clone(),
        buffer.clone(),
        health.clone(),
        supervisor.clone(),
        config.refresh.clone(),
    ));

    // Mount, patrol and tracking
    let actuator = build_actuator(&config.pantilt)?;
    let patrol = Arc::new(PatrolStateMachine::new(
        actuator.clone(),
        config.patrol.clone(),
    ));
    let loaded = patrol
        .load_positions(&config.patrol.positions_file)
        .await?;
    let tracker = Arc::new(TrackingController::new(
        actuator.clone(),
        patrol.clone(),
        config.tracking.clone(),
        PanTiltLimits::from(&config.pantilt),
    ));

    // Alerts and automation
    let notifier: Arc<dyn Notifier> = if config.notifications.enabled
        && !config.telegram_bot_token.is_empty()
    {
        Arc::new(TelegramNotifier::new(
            &config.telegram_bot_token,
            &config.telegram_chat_id,
        )?)
    } else {
        tracing::info!("Telegram not configured, notifications go to the log");
        Arc::new(LogNotifier)
    };
    let garage = Arc::new(FlipperGarage::new(config.automation.flipper_port.clone()));
    let automation = Arc::new(AutomationTrigger::new(
        garage,
        Some(notifier.clone()),
        config.automation.clone(),
    ));

    // Detection
    let store = Arc::new(MemoryDetectionStore::default());
    let inference = Arc::new(homepi_sentinel::inference::HttpInferenceClient::new(
        config.inference_url.clone(),
        config.detection.timeout(),
    )?);
    if !inference.health_check().await {
        tracing::warn!(url = %config.inference_url, "Inference server unreachable at startup");
    }
    let orchestrator = Arc::new(DetectionOrchestrator::new(
        buffer.clone(),
        inference,
        store.clone(),
        tracker.clone(),
        automation.clone(),
        notifier,
        config.detection.clone(),
        config.notifications.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        buffer,
        health,
        supervisor: supervisor.clone(),
        refresher: refresher.clone(),
        orchestrator: orchestrator.clone(),
        tracker,
        patrol: patrol.clone(),
        automation,
        store,
    };

    // Bring the pipeline up
    source.open().await?;
    supervisor.start().await;
    let refresh_worker = refresher.spawn_refresh_worker(refresh_rx);
    let freshness_watch = refresher.spawn_freshness_watch();
    orchestrator.start().await;
    if loaded > 0 {
        patrol.start(None).await?;
    }

    // Periodic status line
    let status_state = state.clone();
    let status_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let status = status_state.status().await;
            tracing::info!(
                frame_age_ms = status.frame_age_ms,
                failures = status.camera.consecutive_failures,
                patrol = ?status.patrol.phase,
                detections = status.logged_detections,
                "Pipeline status"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    status_task.abort();
    orchestrator.stop().await;
    patrol.stop().await;
    if let Err(e) = patrol.save_positions(&config.patrol.positions_file).await {
        tracing::warn!(error = %e, "Failed to save patrol positions");
    }
    freshness_watch.abort();
    refresh_worker.abort();
    supervisor.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
