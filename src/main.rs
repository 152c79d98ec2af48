use std::process::ExitCode;
use std::sync::Arc;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wicketcast::config::EngineConfig;
use wicketcast::core::api::ApiClient;
use wicketcast::core::audio::{
    AmbienceLoop, AudioEngine, DuckingController, HistorySink, MixerCore,
};
use wicketcast::core::checkpoint::CheckpointStore;
use wicketcast::core::orchestrator::Orchestrator;
use wicketcast::core::queue::EventQueue;
use wicketcast::core::tts::{ElevenLabsTts, SpeechSynthesizer, TtsConfig};

/// Exit codes: 0 normal shutdown, 1 unrecoverable config error, 2 audio
/// device initialization failure.
const EXIT_CONFIG: u8 = 1;
const EXIT_AUDIO: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        error!("Failed to install default crypto provider");
        return ExitCode::from(EXIT_CONFIG);
    }

    // Load configuration
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // Open the audio device before anything else: if it cannot be opened,
    // the process must exit before the queue starts consuming.
    let ambience = match AmbienceLoop::load(&config.ambience_path, config.sample_rate) {
        Ok(ambience) => ambience,
        Err(e) => {
            warn!(
                "Ambience unavailable ({}), running with a silent bed",
                e
            );
            AmbienceLoop::silent()
        }
    };

    let ducking = DuckingController::new(
        config.nominal_ambience_gain,
        config.ducked_ambience_gain,
        config.duck_ramp_ms,
        config.sample_rate,
    );
    let mixer = MixerCore::new(ambience, ducking, config.save_audio);

    let audio = match AudioEngine::start(mixer, config.sample_rate) {
        Ok(audio) => audio,
        Err(e) => {
            error!("Audio device initialization failed: {}", e);
            return ExitCode::from(EXIT_AUDIO);
        }
    };

    match run(config, audio).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

async fn run(config: EngineConfig, audio: AudioEngine) -> anyhow::Result<()> {
    let api = Arc::new(
        ApiClient::new(&config.api_base_url, config.api_timeout)
            .map_err(|e| anyhow!("failed to build API client: {e}"))?,
    );

    let synth: Arc<dyn SpeechSynthesizer> = Arc::new(
        ElevenLabsTts::new(TtsConfig::from_engine(&config))
            .map_err(|e| anyhow!("failed to build TTS client: {e}"))?,
    );

    let queue = EventQueue::load(CheckpointStore::new(config.state_path.clone())).await;

    let history = config
        .save_audio
        .then(|| HistorySink::spawn(config.audio_history_dir.clone(), config.sample_rate));

    let cancel = CancellationToken::new();

    // Ctrl-C / SIGTERM begin a graceful shutdown.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            cancel.cancel();
        });
    }

    info!("Live commentary engine starting");

    let orchestrator = Orchestrator::new(
        config,
        queue,
        api,
        synth,
        audio,
        history,
        cancel,
    );
    orchestrator.run().await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = ctrl_c.await;
                    return;
                }
            };

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
