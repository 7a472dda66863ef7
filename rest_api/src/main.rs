use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use log::{info, warn};

use lib::{
    load_engine_config, DispensingDeviceGateway, DosingEngine, DosingStorage, InMemoryDirectory,
    InMemoryDosingStorage, MedicationDirectory, SerialLinkGateway, SimulatedDeviceGateway,
    StaticRuleStore,
};
use models::Bottle;
use rest_api::{load_rest_api_config, load_seed_data, start_server};

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var).ok().map(PathBuf::from)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let rest_config = load_rest_api_config().context("Failed to load REST API configuration")?;
    let engine_config = load_engine_config(env_path("DOSING_CONFIG_FILE"))
        .context("Failed to load dosing engine configuration")?;
    let seed = load_seed_data(env_path("DOSING_SEED_FILE"))
        .context("Failed to load seed data")?;

    // Storage: in-memory, reloaded from the MessagePack snapshot when one
    // exists at the configured path.
    let storage: Arc<InMemoryDosingStorage> = match &engine_config.snapshot_path {
        Some(path) if PathBuf::from(path).exists() => {
            info!("reloading storage snapshot from {}", path);
            Arc::new(InMemoryDosingStorage::from_msgpack_file(path)?)
        }
        Some(path) => Arc::new(InMemoryDosingStorage::new_with_path(path)),
        None => Arc::new(InMemoryDosingStorage::new()),
    };

    let directory = Arc::new(InMemoryDirectory::new());
    for order in &seed.medication_orders {
        directory.upsert_order(order.clone());
    }
    for bottle in &seed.bottles {
        if storage.get_bottle(&bottle.serial_no).await?.is_none() {
            storage
                .put_bottle(Bottle::new(&bottle.serial_no, bottle.volume_ml))
                .await?;
        }
    }
    for order in &seed.orders {
        if storage.get_order(order.id).await?.is_none() {
            storage.put_order(order.clone()).await?;
        }
    }

    // Device gateway: the serial bridge when configured, otherwise the
    // simulated line with a little delivery variance.
    let device: Arc<dyn DispensingDeviceGateway> = match &engine_config.device_addr {
        Some(addr) => {
            info!("using serial-link dispensing gateway at {}", addr);
            Arc::new(SerialLinkGateway::new(
                &engine_config.device_id,
                addr,
                Duration::from_millis(engine_config.device_timeout_ms),
            ))
        }
        None => {
            warn!("no device_addr configured; using the simulated dispensing gateway");
            let sim = SimulatedDeviceGateway::new(&engine_config.device_id).with_jitter(0.01);
            if let Some(serial) = &seed.active_bottle {
                sim.load_bottle(serial);
            }
            Arc::new(sim)
        }
    };

    let rules = Arc::new(StaticRuleStore::from_config(&engine_config));
    let storage_dyn: Arc<dyn DosingStorage> = storage;
    let directory_dyn: Arc<dyn MedicationDirectory> = directory;
    let engine = Arc::new(DosingEngine::new(
        storage_dyn,
        device,
        directory_dyn,
        rules,
        engine_config.clone(),
    ));

    // Background reconciliation for dose events stranded without an outcome.
    let (sweep_tx, sweep_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(lib::run_reconciliation_sweep(
        engine.clone(),
        Duration::from_secs(engine_config.reconcile_interval_secs),
        sweep_rx,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    start_server(&rest_config.host, rest_config.port, shutdown_rx, engine).await?;

    let _ = sweep_tx.send(());
    Ok(())
}
