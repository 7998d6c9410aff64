//! MQTT-SN over UDP with the standard library as the platform.
//!
//! Connects to a gateway, subscribes to a topic and publishes a counter.
//!
//! ```text
//! RUST_LOG=debug cargo run --example udp_client -- 127.0.0.1:10000
//! ```

use std::cell::RefCell;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::rc::Rc;
use std::time::{Duration, Instant};

use mqttsn_client::{AsyncOpStatus, Client, ConnectionState, QoS};
use tracing_subscriber::EnvFilter;

/// The one-shot timer the client programs.
#[derive(Default)]
struct Timer {
    started: Option<Instant>,
    duration: Duration,
}

impl Timer {
    fn deadline(&self) -> Option<Instant> {
        self.started.map(|at| at + self.duration)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let gateway: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:10000".to_string())
        .parse()?;
    let broadcast: SocketAddr = SocketAddr::new([255, 255, 255, 255].into(), gateway.port());

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_broadcast(true)?;
    let send_socket = socket.try_clone()?;

    let timer = Rc::new(RefCell::new(Timer::default()));
    let program = timer.clone();
    let cancel = timer.clone();

    let mut client = Client::builder()
        .search_gw(false)
        .retry_period(5)
        .on_send(move |frame, to_all| {
            let target = if to_all { broadcast } else { gateway };
            if let Err(e) = send_socket.send_to(frame, target) {
                tracing::warn!("send failed: {}", e);
            }
        })
        .on_program_timer(move |ms| {
            let mut t = program.borrow_mut();
            t.started = Some(Instant::now());
            t.duration = Duration::from_millis(u64::from(ms));
        })
        .on_cancel_timer(move || {
            let mut t = cancel.borrow_mut();
            let elapsed = t.started.take().map(|at| at.elapsed()).unwrap_or_default();
            elapsed.as_millis().min(u128::from(u32::MAX)) as u32
        })
        .on_message(|msg| {
            tracing::info!(
                topic = ?msg.topic,
                payload = %String::from_utf8_lossy(&msg.payload),
                "message"
            );
        })
        .on_gw_disconnect(|| tracing::warn!("gateway lost"))
        .start()?;

    client.connect("udp-demo", 30, true, None, |status| {
        tracing::info!(?status, "connect finished");
    })?;

    let subscribed = Rc::new(RefCell::new(false));
    let mut counter = 0u32;
    let mut next_publish = Instant::now();
    let mut buf = [0u8; 2048];

    loop {
        if client.state() == ConnectionState::Connected && client.active_operation().is_none() {
            if !*subscribed.borrow() {
                let flag = subscribed.clone();
                client.subscribe("demo/echo", QoS::AtLeastOnce, move |status, granted| {
                    tracing::info!(?status, ?granted, "subscribe finished");
                    *flag.borrow_mut() = status == AsyncOpStatus::Successful;
                })?;
            } else if Instant::now() >= next_publish {
                counter += 1;
                let payload = counter.to_string();
                client.publish("demo/echo", QoS::AtLeastOnce, false, payload.as_bytes(), |status| {
                    tracing::info!(?status, "publish finished");
                })?;
                next_publish = Instant::now() + Duration::from_secs(10);
            }
        }

        let deadline = timer.borrow().deadline();
        let wait = deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_millis(1));
        socket.set_read_timeout(Some(wait))?;

        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                tracing::trace!(%from, len, "datagram");
                client.process_data(&buf[..len]);
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                let expired = timer
                    .borrow()
                    .deadline()
                    .is_some_and(|at| Instant::now() >= at);
                if expired {
                    timer.borrow_mut().started = None;
                    client.tick();
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}
