//! Wire interoperability tests
//!
//! What one process writes, another must read back unchanged, whatever the
//! message type and payload shape.
//!
//! Run with: cargo test --test integration_wire

use anyhow::Result;
use cloudbus_core::cloud::{messages, NoSigner, SharedKeySigner, Signer};
use cloudbus_core::config::HttpConfig;
use cloudbus_core::identity::short_uuid;
use cloudbus_core::message::{decode_bytes, Fault, Healthcheck, Presence, Qne, RestApi, Trace};
use cloudbus_core::transport::{Endpoint, EndpointType, HttpGateway, Network};
use cloudbus_core::{
    decode_message, encode_message, Cloud, DispatchMode, Gateway, GatewaySet, Iden, LocalAgent,
    Message, MessageBuilder, MessageType, Payload,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use uuid::Uuid;

fn lan_endpoints() -> BTreeSet<Endpoint> {
    let network = Network::from_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 24);
    BTreeSet::from([
        Endpoint::new(EndpointType::Udp, network.clone(), 2728),
        Endpoint::http(network, 9999, "http://10.0.0.7:9999/cloudbus"),
    ])
}

fn samples() -> Result<Vec<Message>> {
    let agent = Iden::agent();
    let cloud = Iden::cloud(Uuid::new_v4(), 8_589_934_592);
    let build = |ty: MessageType, payload: Payload| {
        MessageBuilder::relaxed(ty, agent.clone(), cloud.clone())
            .with_payload(payload)
            .sequence(17)
            .build()
    };

    Ok(vec![
        build(MessageType::Presence, Presence::present(lan_endpoints()).into())?,
        build(MessageType::Presence, Presence::absent().into())?,
        build(MessageType::Discovery, Payload::Null)?,
        build(MessageType::App, json!({"order": 42, "items": ["a", "b"]}).into())?,
        build(MessageType::Ping, Payload::Null)?,
        build(MessageType::Pong, Payload::Null)?,
        build(MessageType::Enquiry, json!({"who": "orders"}).into())?,
        build(
            MessageType::Qne,
            Qne::new(
                "orders",
                [
                    RestApi::new("orders", "/orders", 8080),
                    RestApi::new("orders", "/health", 8081).as_healthcheck(),
                ],
            )
            .into(),
        )?,
        build(MessageType::Fault, Fault { about: Iden::agent() }.into())?,
        build(
            MessageType::Healthcheck,
            Healthcheck {
                about: Iden::agent(),
                working: false,
            }
            .into(),
        )?,
        build(
            MessageType::Trace,
            Trace::default().with("span", "abc").with("depth", 3).into(),
        )?,
        build(MessageType::Ack, Payload::Null)?,
    ])
}

#[test]
fn test_every_shape_survives_the_wire() -> Result<()> {
    for msg in samples()? {
        let text = encode_message(&msg)?;
        let back = decode_message(&text)?;
        assert_eq!(back, msg, "{} changed on the wire: {}", msg.message_type(), text);
        assert_eq!(encode_message(&back)?, text);
    }
    Ok(())
}

#[test]
fn test_payload_shape_follows_message_type() -> Result<()> {
    let agent = Iden::agent();
    let text = format!(
        r#"{{"v":"1.0","fr":"AGT:{}","to":"CLD:{}","rx":0,"hp":2,"ty":"PRS","ss":null,"rr":null,"ts":1700000000000,"id":"{}","sq":5,"dt":{{"present":1,"endpoints":["UDP,2728,10.0.0.7.24"]}}}}"#,
        short_uuid(&agent.uuid()),
        short_uuid(&Uuid::new_v4()),
        short_uuid(&Uuid::new_v4()),
    );
    let msg = decode_bytes(text.as_bytes())?;
    assert_eq!(msg.from(), &agent);
    assert_eq!(msg.sequence(), 5);
    match msg.payload() {
        Payload::Presence(presence) => {
            assert!(presence.present);
            assert_eq!(presence.endpoints.len(), 1);
        }
        other => panic!("expected a presence payload, got {:?}", other),
    }

    // the same data under another type stays opaque
    let generic = text.replace("\"ty\":\"PRS\"", "\"ty\":\"APP\"");
    let msg = decode_message(&generic)?;
    assert!(matches!(msg.payload(), Payload::Generic(_)));
    Ok(())
}

#[test]
fn test_cloud_source_keeps_its_instance() -> Result<()> {
    let cloud_iden = Iden::cloud(Uuid::new_v4(), -5);
    let msg = MessageBuilder::relaxed(MessageType::Fault, cloud_iden.clone(), cloud_iden.clone())
        .with_payload(Fault { about: Iden::agent() })
        .build()?;
    let back = decode_message(&encode_message(&msg)?)?;
    assert_eq!(back.from().instance(), Some(-5));
    assert_eq!(back.to().instance(), None);
    assert!(back.to().same_entity(&cloud_iden));
    Ok(())
}

#[test]
fn test_signature_survives_the_wire() -> Result<()> {
    let signer = SharedKeySigner::new("shared secret");
    let agent = LocalAgent::new("svc");
    let msg = messages::app(&agent, Iden::cloud(Uuid::new_v4(), 1), json!({"x": [1, 2]}))?;
    let signed = signer.sign(&msg)?;

    let received = decode_message(&encode_message(&signed)?)?;
    assert_eq!(signer.expected_signature(&received).as_deref(), received.signature());
    assert_ne!(
        NoSigner.expected_signature(&received).as_deref(),
        received.signature()
    );
    Ok(())
}

#[test]
fn test_cloud_messages_order_by_uuid_counter() -> Result<()> {
    let cloud = Cloud::with_parts(
        Uuid::new_v4(),
        GatewaySet::new(vec![Arc::new(HttpGateway::new(&HttpConfig::default())) as Arc<dyn Gateway>])?,
        Box::new(NoSigner),
        DispatchMode::Inline,
    );
    let first = messages::fault(&cloud, &Iden::agent())?;
    let second = messages::fault(&cloud, &Iden::agent())?;

    let first = decode_message(&encode_message(&first)?)?;
    let second = decode_message(&encode_message(&second)?)?;
    assert!(second.ordering_sequence() > first.ordering_sequence());
    assert_eq!(first.from(), cloud.iden());
    Ok(())
}

proptest! {
    #[test]
    fn prop_envelope_fields_survive(
        hops in -3i32..100,
        sequence in any::<i64>(),
        timestamp in 0i64..4_102_444_800_000,
        reliable in any::<bool>(),
        nonce in proptest::option::of("[0-9a-f]{32}"),
    ) {
        let msg = MessageBuilder::relaxed(MessageType::App, Iden::agent(), Iden::agent())
            .with_hops(hops)
            .sequence(sequence)
            .at(timestamp)
            .reliable(reliable)
            .signed(nonce.clone(), nonce)
            .build()
            .unwrap();
        let back = decode_message(&encode_message(&msg).unwrap()).unwrap();
        prop_assert_eq!(back, msg);
    }
}
