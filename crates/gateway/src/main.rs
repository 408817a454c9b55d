use common::TelemetryGuard;
use detection::DetectionConfig;
use gateway::{build_service, config::GatewayConfig, routes::run_server, state::AppState};

const SERVICE_NAME: &str = "object-detection-gateway";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env();
    let _telemetry = TelemetryGuard::init_or_logging(
        SERVICE_NAME,
        config.otlp_endpoint.as_deref(),
        config.environment,
    )?;

    let detection_config = DetectionConfig::from_env()?;
    tracing::info!(
        environment = config.environment.as_str(),
        model_path = %detection_config.model_path,
        labels_path = %detection_config.labels_path,
        provider = %detection_config.backend.provider,
        default_threshold = %detection_config.default_threshold,
        "Gateway starting"
    );

    let service = build_service(&detection_config)?;
    let state = AppState::new(service, detection_config.max_image_bytes);

    run_server(config, state).await
}
