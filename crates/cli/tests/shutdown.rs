//! Integration test: `switchboard run` with the console channel exits on SIGINT even while
//! stdin is still open.
#![cfg(unix)]

use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

#[test]
fn sigint_exits_while_stdin_is_open() {
    let config_path = std::env::temp_dir().join(format!(
        "switchboard-shutdown-{}-missing.json",
        std::process::id()
    ));
    let mut child = Command::new(env!("CARGO_BIN_EXE_switchboard"))
        .arg("run")
        .arg("--config")
        .arg(&config_path)
        .env("ENABLED_CHANNELS", "cli")
        .env("RUST_LOG", "info")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn switchboard");
    // Held until the end of the test so the console never sees end of input.
    let _stdin = child.stdin.take().expect("stdin");

    let stderr = child.stderr.take().expect("stderr");
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(line) if line.contains("channel cli started") => break,
            Ok(_) => {}
            Err(_) => {
                let _ = child.kill();
                panic!("console channel did not start within 10s");
            }
        }
    }
    std::thread::sleep(Duration::from_millis(300));

    let status = Command::new("kill")
        .arg("-INT")
        .arg(child.id().to_string())
        .status()
        .expect("run kill");
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    let exit = loop {
        if let Some(exit) = child.try_wait().expect("try_wait") {
            break exit;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("switchboard still running 10s after SIGINT");
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    assert!(exit.success(), "exit status {:?}", exit);
}
