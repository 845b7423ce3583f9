use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use courtside_upload::{
    ActiveUploadRegistry, Config, HttpCredentialIssuer, HttpTransport, ServiceConfig,
    UploadEvent, UploadOrchestrator, UploadRequest,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Upload a training video to Courtside storage
#[derive(Debug, Parser)]
#[command(name = "courtside-upload", version, about)]
struct Args {
    /// Video file to upload
    file: PathBuf,

    /// Content type; inferred from the file extension when omitted
    #[arg(long)]
    content_type: Option<String>,

    /// Clip duration in seconds
    #[arg(long)]
    duration: Option<f64>,

    /// Recording frame rate
    #[arg(long)]
    frame_rate: Option<f64>,

    /// Camera angle (e.g. side, front)
    #[arg(long)]
    angle: Option<String>,

    /// Give up after this many seconds, retries included
    #[arg(long)]
    deadline_secs: Option<u64>,
}

impl Args {
    fn into_request(self) -> UploadRequest {
        let mut request = match self.content_type {
            Some(content_type) => UploadRequest::new(self.file, content_type),
            None => UploadRequest::from_path(self.file),
        };
        if let Some(duration) = self.duration {
            request = request.with_duration(duration);
        }
        if let Some(fps) = self.frame_rate {
            request = request.with_frame_rate(fps);
        }
        if let Some(angle) = self.angle {
            request = request.with_angle(angle);
        }
        if let Some(secs) = self.deadline_secs {
            request = request.with_deadline(Duration::from_secs(secs));
        }
        request
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service)?;

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Courtside upload client"
    );

    if let Some(port) = config.service.metrics_port {
        init_metrics(&config.service, port)?;
    }

    let issuer = HttpCredentialIssuer::from_config(&config.api)
        .context("Failed to initialize credential client")?;
    let transport =
        HttpTransport::from_config(&config.transfer).context("Failed to initialize transport")?;
    let registry = Arc::new(ActiveUploadRegistry::new());

    let orchestrator = UploadOrchestrator::new(Arc::new(issuer), Arc::new(transport), registry)
        .with_policy(config.retry_policy())
        .with_expiry_margin(config.credential_expiry_margin());

    let handle = orchestrator
        .start(args.into_request(), Arc::new(log_event_observer()))
        .context("Failed to start upload")?;
    let upload_id = handle.id();

    info!(upload_id = %upload_id, "Upload started");

    let join = handle.join();
    tokio::pin!(join);

    let result = tokio::select! {
        result = &mut join => result,
        _ = shutdown_signal() => {
            warn!(upload_id = %upload_id, "Cancelling upload");
            orchestrator.cancel(&upload_id);
            join.await
        }
    };

    let outcome = result.context("Upload failed")?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}

/// Observer that logs progress in 10% steps and every failed attempt
fn log_event_observer() -> impl Fn(UploadEvent) + Send + Sync {
    let last_decile = AtomicU64::new(0);

    move |event: UploadEvent| match event {
        UploadEvent::StateChanged { attempt, state, .. } => {
            debug!(attempt = attempt, state = ?state, "Upload state changed");
            last_decile.store(0, Ordering::Relaxed);
        }
        UploadEvent::Progress {
            attempt, fraction, ..
        } => {
            let decile = (fraction * 10.0).floor() as u64;
            if decile > last_decile.swap(decile, Ordering::Relaxed) {
                info!(attempt = attempt, percent = decile * 10, "Upload progress");
            }
        }
        UploadEvent::AttemptFailed {
            attempt,
            error,
            will_retry,
            ..
        } => {
            warn!(attempt = attempt, error = %error, will_retry = will_retry, "Upload attempt failed");
        }
        UploadEvent::Succeeded { outcome, .. } => {
            info!(video_id = %outcome.video_id, attempts = outcome.attempts, "Upload succeeded");
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(config: &ServiceConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Prometheus exporter whose series all carry the service name
fn metrics_builder(config: &ServiceConfig) -> PrometheusBuilder {
    PrometheusBuilder::new().add_global_label("service", config.name.clone())
}

/// Expose upload metrics on `port`
fn init_metrics(config: &ServiceConfig, port: u16) -> Result<()> {
    metrics_builder(config)
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(service = %config.name, port = port, "Upload metrics exporter listening");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_build_request() {
        let args = Args::parse_from([
            "courtside-upload",
            "clips/jumper.MOV",
            "--duration",
            "9.5",
            "--angle",
            "side",
            "--deadline-secs",
            "120",
        ]);
        let request = args.into_request();

        assert_eq!(request.content_type(), "video/quicktime");
        assert_eq!(request.metadata().duration_secs, Some(9.5));
        assert_eq!(request.metadata().angle.as_deref(), Some("side"));
        assert_eq!(request.deadline(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_metrics_are_labelled_with_service_name() {
        let config = ServiceConfig {
            name: "courtside-upload-test".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_port: None,
        };
        let recorder = metrics_builder(&config).build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("upload.attempts").increment(1);
        });

        let rendered = handle.render();
        assert!(rendered.contains("upload_attempts"));
        assert!(rendered.contains(r#"service="courtside-upload-test""#));
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let args = Args::parse_from(["courtside-upload", "clip.bin", "--content-type", "video/mp4"]);
        assert_eq!(args.into_request().content_type(), "video/mp4");
    }
}
