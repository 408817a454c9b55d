use common::{Environment, env_opt, env_or};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub addr: String,
    pub otlp_endpoint: Option<String>,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            environment: Environment::from_env(),
            addr: env_or("GATEWAY_ADDR", "0.0.0.0:8080"),
            otlp_endpoint: env_opt("OTEL_EXPORTER_OTLP_ENDPOINT"),
        }
    }
}
