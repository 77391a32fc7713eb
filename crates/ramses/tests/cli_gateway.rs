#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::process::Command;
use std::thread;
use std::time::Duration;

const REPLY: &str = "RP --- 01:145038 18:000730 --:------ 30C9 003 010834";

fn ramses() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_ramses"));
    command.arg("--log-level").arg("error");
    command
}

/// A one-connection serial bridge that echoes what it is sent and, when
/// `answer` is set, replies to every zone temperature request.
fn spawn_bridge(answer: bool) -> (String, thread::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("client should connect");
        let mut writer = stream.try_clone().expect("stream should clone");
        let reader = BufReader::new(stream);
        let mut received = Vec::new();
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let line = line.trim_end().to_string();
            if writer.write_all(format!("{line}\r\n").as_bytes()).is_err() {
                break;
            }
            if answer && line.contains(" 30C9 001 ") {
                let _ = writer.write_all(format!("{REPLY}\r\n").as_bytes());
            }
            received.push(line);
        }
        received
    });

    (addr.to_string(), handle)
}

/// Broadcasts a changing zone temperature until the client hangs up.
fn spawn_broadcaster() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have an address");

    thread::spawn(move || {
        let (mut stream, _): (TcpStream, _) = listener.accept().expect("client should connect");
        for step in 0u16..100 {
            let centi = 2000 + step * 10;
            let line = format!(
                " I --- 01:145038 --:------ 01:145038 30C9 003 01{centi:04X}\r\n"
            );
            if stream.write_all(line.as_bytes()).is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
    });

    addr.to_string()
}

#[test]
fn send_over_tcp_bridge_prints_reply() {
    let (addr, bridge) = spawn_bridge(true);

    let output = ramses()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&addr)
        .arg("--controller")
        .arg("01:145038")
        .arg("--get")
        .arg("zone-temp")
        .arg("--zone")
        .arg("1")
        .output()
        .expect("send should run");

    assert!(output.status.success(), "send failed: {output:?}");
    let reply: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("send should emit json");
    assert_eq!(reply["verb"], "RP");
    assert_eq!(reply["code"], "30C9");
    assert_eq!(reply["src"], "01:145038");

    let received = bridge.join().expect("bridge thread should finish");
    assert_eq!(
        received,
        vec!["RQ --- 18:000730 01:145038 --:------ 30C9 001 01".to_string()]
    );
}

#[test]
fn send_unanswered_exits_4() {
    let (addr, bridge) = spawn_bridge(false);

    let output = ramses()
        .arg("send")
        .arg(&addr)
        .arg("--controller")
        .arg("01:145038")
        .arg("--get")
        .arg("zone-temp")
        .arg("--retries")
        .arg("0")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(4), "unexpected: {output:?}");
    let received = bridge.join().expect("bridge thread should finish");
    assert_eq!(received.len(), 1);
}

#[test]
fn send_to_closed_port_fails_to_open() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        listener.local_addr().expect("listener should have an address")
    };

    let output = ramses()
        .arg("send")
        .arg(addr.to_string())
        .arg("--controller")
        .arg("01:145038")
        .arg("--get")
        .arg("system-mode")
        .output()
        .expect("send should run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("open failed"), "stderr: {stderr}");
}

#[test]
fn listen_count_1_prints_change() {
    let addr = spawn_broadcaster();

    let output = ramses()
        .arg("--format")
        .arg("json")
        .arg("listen")
        .arg(&addr)
        .arg("--count")
        .arg("1")
        .output()
        .expect("listen should run");

    assert!(output.status.success(), "listen failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1);
    let change: serde_json::Value =
        serde_json::from_str(lines[0]).expect("change should be json");
    assert!(change["event"].is_string());
}
