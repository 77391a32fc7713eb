use std::io::IsTerminal;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ramses_gateway::{Liveness, Snapshot, StalenessConfig, StateChange};
use ramses_schema::{Index, Message, Payload};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

const DTM_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

pub fn print_message(message: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_json(message)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["VERB", "SRC", "DST", "CODE", "NAME", "PAYLOAD"])
                .add_row(vec![
                    message.verb().to_string(),
                    message.src().to_string(),
                    message.dst().to_string(),
                    message.code().to_string(),
                    message.name().to_string(),
                    describe_payload(message),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} {} {} -> {} {} ({}) {}",
                message.dtm().format(DTM_FORMAT),
                message.verb(),
                message.src(),
                message.dst(),
                message.code(),
                message.name(),
                describe_payload(message)
            );
        }
    }
}

fn describe_payload(message: &Message) -> String {
    match message.payload() {
        Payload::Malformed { reason } => format!("<malformed: {reason}>"),
        Payload::Opaque => format!("<opaque {}>", message.frame().payload_hex()),
        Payload::Parsed { .. } => {
            let records: Vec<String> = message
                .records()
                .iter()
                .map(|record| {
                    let fields: Vec<String> = record
                        .fields
                        .iter()
                        .map(|field| format!("{}={}", field.kind, field.value))
                        .collect();
                    format!("[{}] {}", index_label(&record.index), fields.join(" "))
                })
                .collect();
            records.join("; ")
        }
    }
}

fn index_label(index: &Index) -> String {
    match index {
        Index::None => "-".to_string(),
        Index::Zone(zone) => format!("zone {zone:02X}"),
        Index::Dhw(dhw) => format!("dhw {dhw:02X}"),
        Index::Domain(domain) => format!("domain {domain:02X}"),
    }
}

#[derive(Serialize)]
struct SnapshotOutput<'a> {
    #[serde(flatten)]
    snapshot: &'a Snapshot,
    liveness: Liveness,
}

pub fn print_snapshots(
    snapshots: &[Snapshot],
    now: NaiveDateTime,
    staleness: &StalenessConfig,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out: Vec<SnapshotOutput<'_>> = snapshots
                .iter()
                .map(|snapshot| SnapshotOutput {
                    snapshot,
                    liveness: snapshot.liveness(now, staleness),
                })
                .collect();
            println!("{}", to_json(&out));
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENTITY", "FIELD", "VALUE", "UPDATED", "STATE"]);
            for snapshot in snapshots {
                let liveness = liveness_name(snapshot.liveness(now, staleness));
                if snapshot.fields.is_empty() {
                    table.add_row(vec![
                        snapshot.id.to_string(),
                        String::new(),
                        String::new(),
                        String::new(),
                        liveness.to_string(),
                    ]);
                }
                for (kind, state) in &snapshot.fields {
                    table.add_row(vec![
                        snapshot.id.to_string(),
                        kind.to_string(),
                        state.value.to_string(),
                        state.dtm.format(DTM_FORMAT).to_string(),
                        liveness.to_string(),
                    ]);
                }
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for snapshot in snapshots {
                println!(
                    "{} ({})",
                    snapshot.id,
                    liveness_name(snapshot.liveness(now, staleness))
                );
                for (kind, state) in &snapshot.fields {
                    println!("  {kind} = {}", state.value);
                }
            }
        }
    }
}

pub fn print_change(change: &StateChange, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_json(change)),
        OutputFormat::Table | OutputFormat::Pretty => println!("{}", describe_change(change)),
    }
}

fn describe_change(change: &StateChange) -> String {
    match change {
        StateChange::EntityCreated { entity } => format!("new {entity}"),
        StateChange::FieldUpdated {
            entity,
            field,
            value,
            dtm,
            ..
        } => format!("{} {entity} {field} = {value}", dtm.format(DTM_FORMAT)),
        StateChange::DeviceBound { device, target } => format!("{device} bound to {target}"),
        StateChange::DeviceUnbound { device } => format!("{device} unbound"),
    }
}

fn liveness_name(liveness: Liveness) -> &'static str {
    match liveness {
        Liveness::Unknown => "unknown",
        Liveness::Tracked => "tracked",
        Liveness::Stale => "stale",
    }
}
