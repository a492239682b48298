use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Command;
use std::thread;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/agent_output.txt")
}

#[test]
fn cli_no_arguments() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("opnsense-agent")?;

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
    Ok(())
}

#[test]
fn cli_collect_url_unspecified() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("opnsense-agent")?;

    cmd.arg("collect").arg("--key").arg("k").arg("--secret").arg("s");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--url <URL>"));
    Ok(())
}

#[test]
fn cli_collect_aborted() -> Result<(), Box<dyn std::error::Error>> {
    // answers the firmware request, then refuses every further connection
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let url = format!("http://{}/api", listener.local_addr()?);
    let server = thread::spawn(move || -> std::io::Result<()> {
        let (stream, _) = listener.accept()?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut line = String::new();
        while reader.read_line(&mut line)? > 0 && line != "\r\n" {
            line.clear();
        }
        let body = r#"{"product": {"product_series": "24.7"}, "status": "none"}"#;
        let mut stream = stream;
        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\
             Connection: close\r\n\r\n{}",
            body.len(),
            body
        )?;
        stream.flush()
    });

    let mut cmd = Command::cargo_bin("opnsense-agent")?;
    cmd.arg("collect")
        .arg("-U")
        .arg(&url)
        .arg("--key")
        .arg("k")
        .arg("--secret")
        .arg("s")
        .arg("--timeout")
        .arg("2");
    cmd.assert()
        .code(3)
        .stdout(predicate::str::starts_with("UNKNOWN: "))
        .stdout(predicate::str::contains("<<<").not());

    server.join().expect("server thread")?;
    Ok(())
}

#[test]
fn cli_discover() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("opnsense-agent")?;

    cmd.arg("discover").arg("--input").arg(fixture());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""check": "gateway""#))
        .stdout(predicate::str::contains(r#""item": "WAN_GW""#))
        .stdout(predicate::str::contains(r#""check": "snapshot""#))
        .stdout(predicate::str::contains("NOMON_GW").not());
    Ok(())
}

#[test]
fn cli_discover_invalid_config() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("opnsense.toml");
    fs::write(&config, "[gatway]\nstatus = \"Online\"\n")?;

    let mut cmd = Command::cargo_bin("opnsense-agent")?;
    cmd.arg("discover")
        .arg("--input")
        .arg(fixture())
        .arg("--config")
        .arg(&config);
    cmd.assert()
        .code(3)
        .stdout(predicate::str::starts_with("UNKNOWN: invalid configuration"));
    Ok(())
}

#[test]
fn cli_check() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let services = dir.path().join("services.json");
    let state_file = dir.path().join("state.json");

    let output = Command::cargo_bin("opnsense-agent")?
        .arg("discover")
        .arg("--input")
        .arg(fixture())
        .output()?;
    assert!(output.status.success());
    fs::write(&services, &output.stdout)?;

    let mut cmd = Command::cargo_bin("opnsense-agent")?;
    cmd.arg("check")
        .arg("--input")
        .arg(fixture())
        .arg("--services")
        .arg(&services)
        .arg("--state-file")
        .arg(&state_file)
        .arg("--now")
        .arg("2024-10-25T20:00:00Z");
    // BACKUP_GW is offline with full packet loss
    cmd.assert()
        .code(2)
        .stdout(predicate::str::contains(
            "GW WAN_GW OK: Online, Monitor 192.168.0.11",
        ))
        .stdout(predicate::str::contains("GW BACKUP_GW CRITICAL"))
        .stdout(predicate::str::contains("OPNsense Firmware OK: 24.7 (Thriving Tiger)"));

    assert!(state_file.exists());
    Ok(())
}

#[test]
fn cli_check_services_missing() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;

    let mut cmd = Command::cargo_bin("opnsense-agent")?;
    cmd.arg("check")
        .arg("--input")
        .arg(fixture())
        .arg("--services")
        .arg(dir.path().join("missing.json"))
        .arg("--state-file")
        .arg(dir.path().join("state.json"));
    cmd.assert()
        .code(3)
        .stdout(predicate::str::starts_with("UNKNOWN: cannot read"));
    Ok(())
}

#[test]
fn cli_check_invalid_time() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("opnsense-agent")?;

    cmd.arg("check")
        .arg("--services")
        .arg("services.json")
        .arg("--now")
        .arg("yesterday");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'yesterday'"));
    Ok(())
}
