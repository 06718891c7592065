use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use vaultline::{
    config::AppConfig,
    crypto::ServerCrypto,
    integrations::{
        IntegrationDispatcher, IntegrationFactory, IntegrationService, PluginDeps, Reconciler,
    },
    notify::ChangeNotifier,
    observability::init_tracing,
    services::{AllowAll, ItemService, RotationScheduler},
    storage::{
        create_pool, AuditLogRepository, EnvironmentRepository, IntegrationRepository,
        IntegrationRunRepository, ProjectRepository,
    },
    Result, APP_NAME, VERSION,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists; config is read from the environment below
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    init_tracing();
    info!(app_name = APP_NAME, version = VERSION, "Starting vaultline engine");

    let config = AppConfig::from_env()?;
    config.validate()?;

    let pool = create_pool(&config.database).await?;

    let server_crypto = ServerCrypto::new(&config.crypto)?;
    let authorizer = Arc::new(AllowAll);
    let notifier = ChangeNotifier::default();

    let integration_repo = IntegrationRepository::new(pool.clone(), server_crypto.clone());
    let run_repo = IntegrationRunRepository::new(pool.clone());
    let factory = IntegrationFactory::new(PluginDeps::new(
        run_repo.clone(),
        integration_repo.clone(),
        server_crypto,
    ));
    let integration_service = Arc::new(IntegrationService::new(
        ProjectRepository::new(pool.clone()),
        EnvironmentRepository::new(pool.clone()),
        integration_repo.clone(),
        run_repo,
        AuditLogRepository::new(pool.clone()),
        factory.clone(),
        authorizer.clone(),
    ));

    let item_service = ItemService::new(pool, notifier, authorizer)
        .with_dispatcher(Arc::new(IntegrationDispatcher::new(integration_service)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler =
        RotationScheduler::new(item_service, &config.rotation, shutdown_rx.clone()).spawn();
    let reconciler = Reconciler::new(
        integration_repo,
        factory,
        Duration::from_secs(config.reconciler.interval_secs),
        shutdown_rx,
    )
    .spawn();

    info!("Engine started; press Ctrl-C to stop");
    signal::ctrl_c().await.map_err(|e| {
        vaultline::VaultlineError::internal(format!("Failed to listen for shutdown: {}", e))
    })?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;
    let _ = reconciler.await;
    Ok(())
}
