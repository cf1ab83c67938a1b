//! Drives a headless task through a relay server over plain TCP.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use cmdbus::{CommandLoop, Dispatcher, Endpoint, Launcher, RelayServer, Validator};
use cmdbus_config::{DEFAULT_RECONNECT_BACKOFF, RelayEndpoint};

#[derive(Debug, Default)]
struct Axis {
    position: f64,
    target: f64,
}

fn axis_task(endpoint: Endpoint) {
    let outbox = endpoint.clone();
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .register_with("move", Validator::float(), |axis: &mut Axis, target| {
            axis.target = target.unwrap_or(axis.target);
            Ok(())
        })
        .register("periodic", move |axis: &mut Axis, _| {
            let remaining = axis.target - axis.position;
            axis.position += remaining / 2.0;
            if (axis.target - axis.position).abs() < 0.01 {
                axis.position = axis.target;
            }
            outbox.send(&format!("STATUS {:.2}", axis.position))?;
            Ok(())
        });
    let final_axis = CommandLoop::new(endpoint, Axis::default(), dispatcher)
        .with_period(Duration::from_millis(20))
        .run();
    assert!((final_axis.position - final_axis.target).abs() < f64::EPSILON);
}

#[test]
fn tcp_peer_moves_a_headless_task_and_stops_it() {
    let server = RelayServer::bind(&RelayEndpoint::new("127.0.0.1", 0)).expect("bind relay");
    let addr = server.local_addr().expect("relay address");
    let launcher = thread::spawn(move || {
        Launcher::new()
            .task(axis_task)
            .bound_relay_server(server)
            .run()
    });

    let stream = TcpStream::connect(addr).expect("connect to relay");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set read timeout");
    let mut writer = stream.try_clone().expect("clone stream");
    let mut lines = BufReader::new(stream).lines();

    writer.write_all(b"MOVE 10.0\n").expect("send move");
    let converged = lines
        .by_ref()
        .map(|line| line.expect("read status line"))
        .take(500)
        .any(|line| line == "STATUS 10.00");
    assert!(converged, "axis should converge on the target");

    writer.write_all(b"quit\n").expect("send quit");
    let quit_sent = Instant::now();
    writer
        .set_read_timeout(Some(DEFAULT_RECONNECT_BACKOFF))
        .expect("tighten read timeout");
    for line in lines {
        line.expect("relay should close the session before the read timeout");
    }
    assert!(
        quit_sent.elapsed() < DEFAULT_RECONNECT_BACKOFF,
        "relay took {:?} to close after quit",
        quit_sent.elapsed()
    );

    launcher
        .join()
        .expect("launcher thread should not panic")
        .expect("launcher should stop cleanly");
}
