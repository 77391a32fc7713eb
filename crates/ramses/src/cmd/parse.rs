use std::fs::File;
use std::io::Read;
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use ramses_gateway::{LineOutcome, Pipeline};
use ramses_transport::{LineReader, TransportError};
use tracing::info;

use crate::cmd::ParseArgs;
use crate::exit::{gateway_error, io_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_change, print_snapshots, OutputFormat};

#[derive(Default)]
struct Tally {
    lines: usize,
    admitted: usize,
    duplicates: usize,
    rejected: usize,
    filtered: usize,
    conflicts: usize,
}

pub fn run(args: ParseArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.core.gateway_config()?;
    let layout = args.core.system_layout(&config)?;
    let mut pipeline = Pipeline::new(&config).map_err(|err| gateway_error("config", err))?;
    if let Some(layout) = &layout {
        let delta = pipeline.seed(layout);
        info!(changes = delta.changes.len(), "seeded layout");
    }

    let input: Box<dyn Read> = if args.file.as_os_str() == "-" {
        Box::new(std::io::stdin())
    } else {
        let file = File::open(&args.file)
            .map_err(|err| io_error(&format!("failed opening {}", args.file.display()), err))?;
        Box::new(file)
    };
    let mut reader = LineReader::new(input);

    let mut tally = Tally::default();
    let mut last_seen: Option<NaiveDateTime> = None;
    loop {
        let line = match reader.read_line() {
            Ok(line) => line,
            Err(TransportError::Disconnected) => break,
            Err(err) => return Err(transport_error("read failed", err)),
        };
        tally.lines += 1;

        match pipeline.process_line(&line, Local::now().naive_local(), Instant::now()) {
            LineOutcome::Empty => {}
            LineOutcome::Rejected(_) => tally.rejected += 1,
            LineOutcome::Filtered(_) => tally.filtered += 1,
            LineOutcome::Duplicate { .. } => tally.duplicates += 1,
            LineOutcome::Admitted(ingested) => {
                tally.admitted += 1;
                tally.conflicts += ingested.errors.len();
                let dtm = ingested.message.dtm();
                last_seen = Some(last_seen.map_or(dtm, |seen| seen.max(dtm)));
                if args.changes {
                    for change in &ingested.delta.changes {
                        print_change(change, format);
                    }
                }
            }
        }
    }

    info!(
        lines = tally.lines,
        admitted = tally.admitted,
        duplicates = tally.duplicates,
        rejected = tally.rejected,
        filtered = tally.filtered,
        apply_errors = tally.conflicts,
        "replay finished"
    );

    if !args.changes {
        // staleness is judged against the end of the log, not the wall clock
        let now = last_seen.unwrap_or_else(|| Local::now().naive_local());
        let model = pipeline.model();
        print_snapshots(&model.snapshots(), now, model.staleness(), format);
    }
    Ok(SUCCESS)
}
