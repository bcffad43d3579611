use std::sync::Arc;

use flat_core::{
    build_http_client, spawn_scheduler, AppConfig, CommandListener, CycleOrchestrator,
    HtmlFetcher, JsonFileBackend, NoveltyTracker, SourceFetcher, TelegramApi, TelegramSink,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::load()?;
    let token = config.require_token()?.to_owned();
    let client = build_http_client(config.request_timeout())?;

    let state_path = config.state_file();
    info!(path = %state_path.display(), "loading novelty state");
    let tracker = NoveltyTracker::load(Arc::new(JsonFileBackend::new(&state_path))).await;

    let fetchers: Vec<Arc<dyn SourceFetcher>> = config
        .sources
        .iter()
        .cloned()
        .map(|query| Arc::new(HtmlFetcher::new(query, client.clone())) as Arc<dyn SourceFetcher>)
        .collect();

    let api = TelegramApi::new(client, &config.telegram_api_base, &token);
    let sink = Arc::new(TelegramSink::new(
        api.clone(),
        tracker.clone(),
        config.poll_interval(),
    ));
    let orchestrator = Arc::new(CycleOrchestrator::new(tracker.clone(), fetchers, sink));

    let poller = spawn_scheduler(orchestrator, config.poll_interval());
    let commands = CommandListener::new(api, tracker).spawn();
    info!(
        interval_secs = config.poll_interval().as_secs(),
        sources = config.sources.len(),
        "flat-bot started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    commands.stop().await?;
    poller.stop().await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
