pub mod algo;
pub mod connectivity;
pub mod detailed_router;
pub mod drc;
pub mod error;
pub mod grid;
pub mod utils;
pub mod worker;

use detailed_router::RunSummary;
use detailed_router::dispatch::{Dispatcher, LocalDispatcher, RemoteDispatcher};
use detailed_router::metrics::{LogSink, MetricsSink};
use eda_common::db::core::Design;
use eda_common::util::config::DetailedRoutingConfig;
use error::{Result, RouteError};
use std::sync::atomic::AtomicBool;

/// Detailed-routes `design` in place, logging metrics as it goes.
pub fn route(design: &mut Design, cfg: &DetailedRoutingConfig) -> Result<RunSummary> {
    route_with(design, cfg, &mut LogSink, None)
}

/// Like [`route`], with a custom metrics sink and an abort flag polled
/// between iterations.
pub fn route_with(
    design: &mut Design,
    cfg: &DetailedRoutingConfig,
    sink: &mut dyn MetricsSink,
    abort: Option<&AtomicBool>,
) -> Result<RunSummary> {
    let mut dispatcher: Box<dyn Dispatcher + '_> = if cfg.distributed {
        Box::new(RemoteDispatcher::start(design, cfg, cfg.remote_workers)?)
    } else {
        Box::new(LocalDispatcher::new(cfg))
    };

    if cfg.threads == 0 {
        return detailed_router::run(design, cfg, dispatcher.as_mut(), sink, abort);
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.threads)
        .build()
        .map_err(|e| RouteError::Dispatch(format!("thread pool: {e}")))?;
    log::info!("Using {} worker threads", cfg.threads);
    pool.install(|| detailed_router::run(design, cfg, dispatcher.as_mut(), sink, abort))
}
