use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use llm_core::{LlmClient, LlmProvider};
use server::config::ServerConfig;
use server::context::LessonContextBuilder;
use server::persistence::InMemoryInteractionStore;
use server::pipeline::TeachingPipeline;
use server::{build_router, AppState};
use tts_core::HttpSynthesizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting teaching server...");

    let config = ServerConfig::from_env();

    let provider = LlmProvider::from_name(&config.llm_provider);
    let model = config
        .llm_model
        .clone()
        .unwrap_or_else(|| provider.default_model().to_string());
    let mut llm = LlmClient::new(provider, &model)?;
    if let Some(url) = &config.llm_base_url {
        llm = llm.with_base_url(url);
    }
    info!("LLM: {:?} model={}", llm.provider(), llm.model());

    let synthesizer =
        HttpSynthesizer::new(&config.tts_base_url, &config.tts_model, &config.tts_voice)
            .with_api_key(config.tts_api_key.clone())
            .with_format(&config.tts_format);
    info!(
        "TTS: {} voice={} format={}",
        config.tts_model, config.tts_voice, config.tts_format
    );

    let store = Arc::new(InMemoryInteractionStore::with_max_turns(config.history_turns));
    let context = match LessonContextBuilder::from_file(
        &config.lessons_path,
        store.clone(),
        config.history_turns,
    )
    .await
    {
        Ok(builder) => builder,
        Err(e) => {
            warn!("Could not load {}: {e:#}, using an empty lesson catalog.", config.lessons_path);
            LessonContextBuilder::new(HashMap::new(), store.clone(), config.history_turns)
        }
    };
    info!("Loaded {} lessons", context.lesson_count());

    let pipeline_config = config.pipeline_config();
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, generation_timeout={}ms, \
         max_concurrent_synthesis={}",
        config.port,
        config.rate_limit_per_minute,
        pipeline_config.generation_timeout.as_millis(),
        pipeline_config.max_concurrent_synthesis
    );

    let pipeline = TeachingPipeline::new(
        Arc::new(llm),
        Arc::new(synthesizer),
        Arc::new(context),
        store,
        pipeline_config,
    );

    let port = config.port;
    let app = build_router(AppState::new(pipeline, config))?;

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
