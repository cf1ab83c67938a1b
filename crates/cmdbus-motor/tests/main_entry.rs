//! Integration tests for the `cmdbus-motor` binary.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn help_lists_demonstration_flags() {
    let mut command = cargo_bin_cmd!("cmdbus-motor");
    command.arg("--help");
    command
        .assert()
        .success()
        .stderr(contains("--headless"))
        .stderr(contains("--relay-server"));
}

#[test]
fn zero_periodic_interval_exits_with_failure() {
    let mut command = cargo_bin_cmd!("cmdbus-motor");
    command.args(["--periodic-ms", "0"]);
    command
        .assert()
        .failure()
        .stderr(contains("periodic_ms"));
}

#[test]
fn console_quit_stops_the_motor() {
    let mut command = cargo_bin_cmd!("cmdbus-motor");
    command
        .args(["--periodic-ms", "20", "--log-filter", "off"])
        .write_stdin("MOVE 1.5\nSIMUL 1\nquit\n")
        .timeout(Duration::from_secs(10));
    command.assert().success();
}

fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("reserve port");
    listener.local_addr().expect("reserved address").port()
}

fn connect_with_retry(port: u16) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return stream,
            Err(error) if Instant::now() >= deadline => panic!("relay never came up: {error}"),
            Err(_) => thread::sleep(Duration::from_millis(20)),
        }
    }
}

#[test]
fn headless_motor_is_driven_over_tcp() {
    let port = free_port();
    let mut child = Command::new(env!("CARGO_BIN_EXE_cmdbus-motor"))
        .args([
            "--headless",
            "--relay-server",
            &format!("127.0.0.1:{port}"),
            "--periodic-ms",
            "20",
            "--log-filter",
            "off",
        ])
        .stdin(Stdio::null())
        .spawn()
        .expect("spawn cmdbus-motor");

    let stream = connect_with_retry(port);
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set read timeout");
    let mut writer = stream.try_clone().expect("clone stream");
    writer.write_all(b"MOVE 3.0\n").expect("send move");

    let reached = BufReader::new(stream)
        .lines()
        .map_while(Result::ok)
        .take(2000)
        .any(|line| line == "POS 3.000000");
    assert!(reached, "motor should report the target position");

    writer.write_all(b"quit\n").expect("send quit");
    let status = child.wait().expect("wait for cmdbus-motor");
    assert!(status.success());
}
