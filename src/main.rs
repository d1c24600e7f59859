use std::sync::Arc;

use availability_monitor::{
    availability_client::HttpAvailabilityClient,
    build_app,
    config::Config,
    history::log_files::CycleLogFile,
    logging,
    monitor::MonitorState,
    notifier::{
        FallbackNotifier, NotificationProvider, ResendNotifier, SmtpNotifier, WebhookNotifier,
    },
    settings::{EnvOverrides, JsonSettingsStore, SettingsStore},
    AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;

    let settings: Arc<dyn SettingsStore> = Arc::new(JsonSettingsStore::new(
        &config.config_file,
        EnvOverrides::from_env(),
    ));

    let mut providers: Vec<Arc<dyn NotificationProvider>> =
        vec![Arc::new(SmtpNotifier::new(settings.clone()))];
    if let Some(api_key) = &config.resend_api_key {
        providers.push(Arc::new(ResendNotifier::new(api_key.clone(), settings.clone())?));
    }
    if let Some(url) = &config.webhook_url {
        providers.push(Arc::new(WebhookNotifier::new(url.clone())?));
    }
    let notifier = Arc::new(FallbackNotifier::new(providers));

    let fetcher = Arc::new(HttpAvailabilityClient::new(
        config.availability_url.clone(),
        config.fetch_timeout,
    )?);
    let monitor = Arc::new(MonitorState::new(
        settings.load().monitor.to_config(),
        fetcher.clone(),
        notifier.clone(),
        Arc::new(CycleLogFile::new(&config.log_dir)),
    ));

    info!(
        availability_url = %fetcher.url(),
        config_file = %config.config_file.display(),
        log_dir = %config.log_dir.display(),
        notification_providers = ?notifier.provider_names(),
        "monitor configured"
    );
    if config.autostart {
        monitor.start();
    }

    let state = AppState::new(
        config.api_token.clone(),
        monitor.clone(),
        settings,
        notifier,
        &config.log_dir,
    );
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        "server starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    monitor.stop();
    info!("server stopped");
    Ok(())
}
