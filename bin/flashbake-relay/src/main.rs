use std::{sync::Arc, time::Duration};

use flashbake_common::logging;
use flashbake_config::{Config, WindowSource};
use flashbake_relay::{
    bundles::{bundle_relay_task, BundleRelay},
    constants::ConstantsCell,
    head::{HeadTracker, TrackerParams},
    metrics::RelayMetrics,
    rights::{rights_task, AssignmentCache, RightsParams, RightsService},
    window::{window_monitor_task, WindowMonitor, WindowSchedule},
};
use flashbake_tezosio::{
    codec::RpcOperationCodec,
    registry::OnChainRegistry,
    rpc::{traits::ChainRpc, TezosClient},
    transport::HttpBundleTransport,
};
use parking_lot::RwLock;
use tokio::{net::TcpListener, runtime::Handle};
use tracing::*;

use crate::{args::Args, helpers::*};

mod args;
mod errors;
mod helpers;
mod http;

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    if let Err(e) = main_inner(args) {
        eprintln!("FATAL ERROR: {e}");

        return Err(e);
    }

    Ok(())
}

fn main_inner(args: Args) -> anyhow::Result<()> {
    // Start runtime for async IO tasks.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("flashbake-rt")
        .build()?;

    // Init the logging before we do anything else.
    init_logging(runtime.handle())?;

    let config = get_config(&args)?;
    info!(rpc = %config.tezos.rpc_url, "starting relay");

    let res = runtime.block_on(run(config));

    logging::finalize();
    res?;
    info!("exiting");
    Ok(())
}

/// Sets up the logging system given a handle to a runtime context to possibly
/// start the OTLP output on.
fn init_logging(rt: &Handle) -> anyhow::Result<()> {
    let mut lconfig = logging::LoggerConfig::with_base_name("flashbake-relay");

    // Set the OpenTelemetry URL if set.
    let otlp_url = logging::get_otlp_url_from_env();
    if let Some(url) = &otlp_url {
        lconfig.set_otlp_url(url.clone());
    }

    {
        // The OTLP exporter spawns onto the ambient runtime.
        let _g = rt.enter();
        logging::init(lconfig)?;
    }

    // Have to log this after we start the logging formally.
    if let Some(url) = &otlp_url {
        info!(%url, "using OpenTelemetry tracing output");
    }
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let client = Arc::new(
        TezosClient::new(config.tezos.rpc_url.clone())?
            .with_retries(config.tezos.retry_count, config.tezos.retry_interval),
    );
    let chain: Arc<dyn ChainRpc> = client.clone();

    // Nothing is scheduled before the constants are known.
    let constants = ConstantsCell::new(
        chain.clone(),
        Duration::from_millis(config.tezos.constants_retry_ms),
    );
    let consts = constants.get().await?;
    let ttl = consts.max_operations_time_to_live;
    let window_size = match config.rights.window_source {
        WindowSource::Ttl => ttl,
        WindowSource::Cycle => consts.blocks_per_cycle,
    };
    info!(%ttl, %window_size, source = ?config.rights.window_source, "resolved chain constants");

    let schedule = WindowSchedule::with_breakpoints(window_size, &config.rights.breakpoints)?;

    let tracker = Arc::new(HeadTracker::new(
        chain.clone(),
        TrackerParams::from_config(ttl, &config.monitor),
    ));
    let monitor = WindowMonitor::new(schedule.clone());
    let windows = monitor.subscribe();
    let monitor_blocks = tracker.subscribe();
    let rights_blocks = tracker.subscribe();
    let relay_blocks = tracker.subscribe();

    let cache = Arc::new(RwLock::new(AssignmentCache::new(ttl)));
    let registry = Arc::new(OnChainRegistry::new(
        client.clone(),
        config.registry.contract.clone(),
        config.registry.big_map_annotation.clone(),
        config.registry.endpoint_annotation.clone(),
    ));
    let rights = RightsService::new(
        chain.clone(),
        registry,
        schedule,
        RightsParams::from(&config.rights),
        cache.clone(),
    );

    let transport = Arc::new(HttpBundleTransport::new(
        config.bundles.bundle_path.clone(),
        Duration::from_millis(config.bundles.transmit_timeout_ms),
    )?);
    let relay = Arc::new(BundleRelay::new(
        chain,
        Arc::new(RpcOperationCodec::new(client.clone())),
        transport,
        tracker.clone(),
        cache,
        RelayMetrics::new()?,
        Duration::from_secs(config.bundles.expiration_secs),
    ));

    tokio::spawn(window_monitor_task(monitor, monitor_blocks));
    tokio::spawn(rights_task(rights, rights_blocks, windows));
    tokio::spawn(bundle_relay_task(relay.clone(), relay_blocks));
    let tracker_handle = tracker.start();

    let addr = format!("{}:{}", config.relay.host, config.relay.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "relay listening");
    let app = http::router(http::AppState::new(relay, &config.tezos.rpc_url)?);

    let res = tokio::select! {
        res = http::serve(listener, app, shutdown_signal()) => res.map_err(anyhow::Error::from),
        res = tracker_handle => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(anyhow::anyhow!("head tracker panicked: {e}")),
        },
    };

    tracker.stop();
    res
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("got interrupt, shutting down"),
        Err(e) => {
            error!(err = %e, "could not listen for interrupt");
            std::future::pending::<()>().await;
        }
    }
}
