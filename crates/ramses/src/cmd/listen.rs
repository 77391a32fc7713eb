use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ramses_gateway::{Filter, Gateway};
use tracing::info;

use crate::cmd::{parse_address, ListenArgs};
use crate::exit::{gateway_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_change, OutputFormat};

const POLL: Duration = Duration::from_millis(250);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.core.gateway_config()?;
    let layout = args.core.system_layout(&config)?;
    let mut filter = Filter::all();
    if let Some(controller) = &args.controller {
        filter = filter.with_controller(parse_address(controller)?);
    }

    let gateway =
        Gateway::open(&args.target, &config).map_err(|err| gateway_error("open failed", err))?;
    let changes = gateway.subscribe(filter);
    if let Some(layout) = &layout {
        gateway.seed(layout);
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let change = match changes.next_timeout(POLL) {
            Ok(Some(change)) => change,
            Ok(None) => continue,
            // the gateway stopped on its own; shutdown reports why
            Err(_) => break,
        };
        print_change(&change, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    let stats = gateway.dedup_stats();
    let stopped = gateway
        .shutdown()
        .map_err(|err| gateway_error("shutdown failed", err))?;
    info!(
        admitted = stats.admitted,
        duplicates = stats.duplicates,
        echoes = stats.echoes,
        "listener stopped"
    );
    match stopped.fault {
        Some(fault) => Err(transport_error("gateway stopped", fault)),
        None => Ok(SUCCESS),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
