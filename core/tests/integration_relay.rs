//! Relay gateway against a live HTTP relay
//!
//! The relay here is a minimal in-process HTTP/1.1 server keeping messages
//! per cloud, enough to exercise the real `ureq` client end to end.
//!
//! Run with: cargo test --test integration_relay

use anyhow::{Context, Result};
use cloudbus_core::cloud::NoSigner;
use cloudbus_core::config::WwwConfig;
use cloudbus_core::message::decode_message;
use cloudbus_core::transport::{
    Listener, RelayClient, UreqRelayClient, Watermark, WwwGateway,
};
use cloudbus_core::{
    Cloud, DispatchMode, Gateway, GatewaySet, Iden, LocalAgent, Message, MessageBuilder,
    MessageType, Status,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct RelayState {
    clouds: Mutex<HashMap<String, Vec<(Uuid, String)>>>,
    requests: Mutex<Vec<String>>,
    failing: AtomicBool,
}

struct Relay {
    root: String,
    state: Arc<RelayState>,
}

impl Relay {
    fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let root = format!("http://{}", listener.local_addr()?);
        let state = Arc::new(RelayState::default());
        let shared = state.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = shared.clone();
                std::thread::spawn(move || {
                    let _ = serve(stream, &state);
                });
            }
        });
        Ok(Self { root, state })
    }

    fn client(&self) -> Box<dyn RelayClient> {
        Box::new(UreqRelayClient::new(&self.root, Duration::from_secs(5)))
    }

    fn stored(&self, cloud: &Iden) -> usize {
        self.state
            .clouds
            .lock()
            .get(&cloud.uuid().to_string())
            .map_or(0, Vec::len)
    }

    fn last_get(&self) -> Option<String> {
        self.state
            .requests
            .lock()
            .iter()
            .rev()
            .find(|r| r.starts_with("GET /api"))
            .cloned()
    }
}

fn query_param<'a>(target: &'a str, name: &str) -> Option<&'a str> {
    let (_, query) = target.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn serve(stream: TcpStream, state: &RelayState) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut length = 0usize;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header)?;
        if header.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                length = value.trim().parse()?;
            }
        }
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    let body = String::from_utf8(body)?;

    state.requests.lock().push(format!("{} {}", method, target));

    let (status, reply) = if state.failing.load(Ordering::SeqCst) {
        ("500 Internal Server Error", String::new())
    } else if target.starts_with("/ping") {
        ("200 OK", "pong".to_string())
    } else {
        let cloud = query_param(&target, "cloud").unwrap_or_default().to_string();
        let mut clouds = state.clouds.lock();
        let stored = clouds.entry(cloud).or_default();
        if method == "POST" {
            for line in body.lines().filter(|l| !l.is_empty()) {
                stored.push((decode_message(line)?.uuid(), line.to_string()));
            }
            ("200 OK", String::new())
        } else {
            let start = query_param(&target, "message")
                .and_then(|after| Uuid::parse_str(after).ok())
                .and_then(|after| stored.iter().position(|(id, _)| *id == after))
                .map_or(0, |index| index + 1);
            let lines: Vec<&str> = stored[start..].iter().map(|(_, l)| l.as_str()).collect();
            ("200 OK", lines.join("\n"))
        }
    };

    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reply.len(),
        reply
    )?;
    stream.flush()?;
    Ok(())
}

fn www_config(relay: &Relay) -> WwwConfig {
    WwwConfig {
        address: Some(relay.root.clone()),
        max_consecutive_errors: 3,
        ..WwwConfig::default()
    }
}

fn collector(gate: &WwwGateway, cloud: &Iden) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Listener = Arc::new(move |_: &'static str, m: &Message| sink.lock().push(m.clone()));
    gate.add_listener(cloud, listener);
    seen
}

fn ping(cloud: &Iden) -> Result<Message> {
    Ok(MessageBuilder::relaxed(MessageType::Ping, Iden::agent(), cloud.as_entity()).build()?)
}

#[test]
fn test_messages_travel_through_relay() -> Result<()> {
    let relay = Relay::start()?;
    let cloud_uuid = Uuid::new_v4();
    let here = Iden::cloud(cloud_uuid, 1);
    let there = Iden::cloud(cloud_uuid, 2);

    let sender = WwwGateway::new(relay.client(), &www_config(&relay));
    let reader = WwwGateway::new(relay.client(), &www_config(&relay));
    let seen = collector(&reader, &there);

    let first = ping(&here)?;
    let receipt = sender.send(&here, &first)?;
    assert_eq!(receipt.status(), Status::Pending);
    assert!(sender.sync());
    assert_eq!(receipt.status(), Status::Delivered);
    assert_eq!(relay.stored(&here), 1);

    assert!(reader.sync());
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(seen.lock()[0], first);
    assert_eq!(reader.watermark(&there), Some(Watermark::After(first.uuid())));
    let full_fetch = relay.last_get().context("no fetch recorded")?;
    assert!(!full_fetch.contains("message="));

    let second = ping(&here)?;
    sender.send(&here, &second)?;
    sender.sync();
    reader.sync();

    assert_eq!(seen.lock().len(), 2);
    assert_eq!(seen.lock()[1].uuid(), second.uuid());
    let incremental = relay.last_get().context("no fetch recorded")?;
    assert!(incremental.contains(&format!("message={}", first.uuid())));
    Ok(())
}

#[test]
fn test_empty_relay_marks_synced_empty() -> Result<()> {
    let relay = Relay::start()?;
    let cloud = Iden::cloud(Uuid::new_v4(), 1);
    let gate = WwwGateway::new(relay.client(), &www_config(&relay));
    let seen = collector(&gate, &cloud);

    assert_eq!(gate.watermark(&cloud), Some(Watermark::NeverSynced));
    gate.sync();
    assert_eq!(gate.watermark(&cloud), Some(Watermark::SyncedEmpty));
    assert!(seen.lock().is_empty());
    Ok(())
}

#[test]
fn test_outage_forces_full_resync() -> Result<()> {
    let relay = Relay::start()?;
    let cloud = Iden::cloud(Uuid::new_v4(), 1);
    let writer = WwwGateway::new(relay.client(), &www_config(&relay));
    let reader = WwwGateway::new(relay.client(), &www_config(&relay));
    let seen = collector(&reader, &cloud);

    let msg = ping(&cloud)?;
    writer.send(&cloud, &msg)?;
    writer.sync();
    reader.sync();
    assert_eq!(reader.watermark(&cloud), Some(Watermark::After(msg.uuid())));

    relay.state.failing.store(true, Ordering::SeqCst);
    reader.sync();
    reader.sync();
    assert_eq!(reader.consecutive_rx_errors(), 2);
    assert_eq!(reader.watermark(&cloud), Some(Watermark::After(msg.uuid())));
    reader.sync();
    assert_eq!(reader.watermark(&cloud), Some(Watermark::NeverSynced));
    assert_eq!(reader.consecutive_rx_errors(), 0);

    relay.state.failing.store(false, Ordering::SeqCst);
    reader.sync();
    let refetch = relay.last_get().context("no fetch recorded")?;
    assert!(!refetch.contains("message="));
    assert_eq!(reader.watermark(&cloud), Some(Watermark::After(msg.uuid())));
    // the relay history is replayed to listeners
    assert_eq!(seen.lock().len(), 2);
    Ok(())
}

#[test]
fn test_close_flushes_queue() -> Result<()> {
    let relay = Relay::start()?;
    let cloud = Iden::cloud(Uuid::new_v4(), 1);
    let gate = WwwGateway::new(relay.client(), &www_config(&relay));

    gate.send(&cloud, &ping(&cloud)?)?;
    gate.send(&cloud, &ping(&cloud)?)?;
    assert_eq!(gate.pending(&cloud), 2);

    gate.close()?;
    assert_eq!(gate.pending(&cloud), 0);
    assert_eq!(relay.stored(&cloud), 2);
    assert!(gate.send(&cloud, &ping(&cloud)?).is_err());
    Ok(())
}

#[test]
fn test_clouds_meet_on_relay() -> Result<()> {
    let relay = Relay::start()?;
    let cloud_uuid = Uuid::new_v4();

    let mut clouds = Vec::new();
    let mut gates = Vec::new();
    for _ in 0..2 {
        let gate = Arc::new(WwwGateway::new(relay.client(), &www_config(&relay)));
        let set = GatewaySet::new(vec![gate.clone() as Arc<dyn Gateway>])?;
        clouds.push(Cloud::with_parts(cloud_uuid, set, Box::new(NoSigner), DispatchMode::Inline));
        gates.push(gate);
    }

    let agent = Arc::new(LocalAgent::new("far away"));
    clouds[0].join(agent.clone())?;
    gates[0].sync();
    assert!(clouds[1].remote_agent(agent.iden()).is_none());

    gates[1].sync();
    let known = clouds[1]
        .remote_agent(agent.iden())
        .context("presence not received through relay")?;
    assert_eq!(known.entity().last_accepted_sequence(), Some(1));

    // the writer reads its own presence back and drops it
    gates[0].sync();
    assert!(clouds[0].remote_agents().is_empty());
    Ok(())
}
