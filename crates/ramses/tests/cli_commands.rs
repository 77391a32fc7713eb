#![cfg(feature = "cli")]

use std::path::PathBuf;
use std::process::Command;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "ramses-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

const PACKET_LOG: &str = "\
# evofw3 0.7.1
2024-01-01T12:00:00.000000 045  I --- 01:145038 --:------ 01:145038 30C9 003 0107D0
2024-01-01T12:00:00.120000 052  I --- 01:145038 --:------ 01:145038 30C9 003 0107D0
2024-01-01T12:00:01.000000 045  I --- 04:189076 --:------ 01:145038 3150 003 0164
2024-01-01T12:00:02.000000 045  I --- 04:189076 --:------ 01:145038 3150 002 0164
2024-01-01T12:00:03.000000 045  I --- 01:145038 --:------ 01:145038 30C9 003 010834
";

fn ramses() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_ramses"));
    command.arg("--log-level").arg("error");
    command
}

fn find_zone(snapshots: &[serde_json::Value], index: u64) -> &serde_json::Value {
    snapshots
        .iter()
        .find(|snapshot| snapshot["id"]["kind"] == "zone" && snapshot["id"]["index"] == index)
        .unwrap_or_else(|| panic!("no zone {index} in output"))
}

#[test]
fn version_prints_package_version() {
    let output = ramses()
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("ramses {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn decode_prints_message_as_json() {
    let output = ramses()
        .arg("--format")
        .arg("json")
        .arg("decode")
        .arg("RP --- 01:145038 18:013393 --:------ 2309 003 0107D0")
        .output()
        .expect("decode should run");

    assert!(output.status.success());
    let message: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("decode should emit json");
    assert_eq!(message["verb"], "RP");
    assert_eq!(message["src"], "01:145038");
    assert_eq!(message["dst"], "18:013393");
    assert_eq!(message["code"], "2309");
    assert_eq!(message["raw"], "0107D0");
}

#[test]
fn decode_rejects_wrong_length_with_60() {
    let output = ramses()
        .arg("decode")
        .arg(" I --- 01:145038 --:------ 01:145038 3B00 003 FCC8")
        .output()
        .expect("decode should run");

    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: decode failed"));
}

#[test]
fn parse_replays_log_into_snapshots() {
    let dir = unique_temp_dir("parse");
    let log = dir.join("packet.log");
    std::fs::write(&log, PACKET_LOG).expect("log should be writable");

    let output = ramses()
        .arg("--format")
        .arg("json")
        .arg("parse")
        .arg(&log)
        .output()
        .expect("parse should run");

    assert!(output.status.success(), "parse failed: {output:?}");
    let snapshots: Vec<serde_json::Value> =
        serde_json::from_slice(&output.stdout).expect("parse should emit a json array");

    let zone = find_zone(&snapshots, 1);
    assert_eq!(zone["fields"]["temperature"]["value"], 21.0);
    assert_eq!(zone["fields"]["temperature"]["seq"], 3);
    assert_eq!(zone["liveness"], "tracked");

    let trv = snapshots
        .iter()
        .find(|snapshot| snapshot["id"]["address"] == "04:189076")
        .expect("device should be tracked");
    assert_eq!(trv["relations"]["parent"]["kind"], "zone");
    assert_eq!(trv["relations"]["parent"]["index"], 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn parse_changes_streams_one_event_per_line() {
    let dir = unique_temp_dir("changes");
    let log = dir.join("packet.log");
    std::fs::write(&log, PACKET_LOG).expect("log should be writable");

    let output = ramses()
        .arg("--format")
        .arg("json")
        .arg("parse")
        .arg(&log)
        .arg("--changes")
        .output()
        .expect("parse should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let temperatures: Vec<f64> = stdout
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).expect("line should be json"))
        .filter(|event| event["event"] == "field_updated" && event["field"] == "temperature")
        .filter_map(|event| event["value"].as_f64())
        .collect();
    assert_eq!(temperatures, vec![20.0, 21.0]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn parse_missing_file_fails() {
    let dir = unique_temp_dir("missing");
    let output = ramses()
        .arg("parse")
        .arg(dir.join("nope.log"))
        .output()
        .expect("parse should run");

    assert_eq!(output.status.code(), Some(1));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invalid_config_is_data_invalid() {
    let dir = unique_temp_dir("config");
    let config = dir.join("config.json");
    std::fs::write(&config, r#"{"dedup_window_ms": 0}"#).expect("config should be writable");
    let log = dir.join("packet.log");
    std::fs::write(&log, PACKET_LOG).expect("log should be writable");

    let output = ramses()
        .arg("parse")
        .arg(&log)
        .arg("--config")
        .arg(&config)
        .output()
        .expect("parse should run");

    assert_eq!(output.status.code(), Some(60));
    let _ = std::fs::remove_dir_all(&dir);
}
