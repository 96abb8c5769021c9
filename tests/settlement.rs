//! End-to-end settlement scenarios: a storage node replays signed
//! orders to a satellite and the satellite credits bandwidth exactly
//! once per serial.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use meridian_node::orders::sender::SettlementClientStream;
use meridian_node::orders::{SettlementRequest, SettlementStatus};
use meridian_node::pipe::{settlement_pipe, ChannelSettlementDialer};
use meridian_node::{
    ArchivedOrder, Error, OrderSender, SatelliteBuilder, SatelliteConfig, SenderConfig,
    SerialNumber, SettlementConfig, TrustPool,
};

use common::{identities, signed_pair, test_bucket};

fn satellite_config(batch_size: usize) -> SatelliteConfig {
    SatelliteConfig {
        settlement: SettlementConfig {
            settlement_batch_size: batch_size,
            ..SettlementConfig::default()
        },
        ..SatelliteConfig::default()
    }
}

#[tokio::test]
async fn test_happy_settlement_batch() {
    common::init_tracing();
    let (satellite_identity, uplink, node) = identities();
    let satellite = SatelliteBuilder::new(satellite_identity.clone(), satellite_config(3)).build();
    let db = satellite.orders_db();

    let expiration = SystemTime::now() + Duration::from_secs(600);
    let mut requests = Vec::new();
    for amount in [100, 200, 300] {
        let serial = SerialNumber::random();
        db.create_serial_info(serial, test_bucket(), expiration + Duration::from_secs(3600))
            .await
            .expect("issue serial");
        let (limit, order) = signed_pair(
            &satellite_identity,
            &uplink,
            node.node_id(),
            serial,
            amount,
            expiration,
        );
        requests.push(SettlementRequest::new(limit, order));
    }

    let endpoint = satellite.endpoint();
    let (mut client, mut server) = settlement_pipe(node.peer_identity(), 8);
    let server_task = tokio::spawn(async move { endpoint.settlement(&mut server).await });

    for request in requests {
        client.send(request).await.expect("send");
    }
    client.close_send().await.expect("close send");

    let mut statuses = Vec::new();
    while let Some(response) = client.recv().await.expect("recv") {
        statuses.push(response.status);
    }
    assert_eq!(statuses, vec![SettlementStatus::Accepted; 3]);
    server_task.await.expect("join").expect("stream ok");

    // the bucket ledger saw all 600 bytes for the action
    let from = SystemTime::now() - Duration::from_secs(7200);
    let to = SystemTime::now() + Duration::from_secs(7200);
    let bucket_total = db
        .get_bucket_bandwidth(test_bucket(), from, to)
        .await
        .expect("bucket bandwidth");
    assert_eq!(bucket_total, 600);

    let node_total = db
        .get_storage_node_bandwidth(node.node_id(), from, to)
        .await
        .expect("node bandwidth");
    assert_eq!(node_total, 600);

    assert_eq!(satellite.metrics().accepted(), 3);
    assert_eq!(satellite.metrics().rejected(), 0);

    satellite.close().await.expect("shutdown");
}

#[tokio::test]
async fn test_reused_serial_rejected_stream_continues() {
    let (satellite_identity, uplink, node) = identities();
    // batch size 1 flushes every request immediately
    let satellite = SatelliteBuilder::new(satellite_identity.clone(), satellite_config(1)).build();
    let db = satellite.orders_db();

    let expiration = SystemTime::now() + Duration::from_secs(600);
    let serial_1 = SerialNumber::random();
    let serial_2 = SerialNumber::random();
    for serial in [serial_1, serial_2] {
        db.create_serial_info(serial, test_bucket(), expiration + Duration::from_secs(3600))
            .await
            .expect("issue serial");
    }

    let (limit_1, order_1) = signed_pair(
        &satellite_identity,
        &uplink,
        node.node_id(),
        serial_1,
        100,
        expiration,
    );
    let (limit_2, order_2) = signed_pair(
        &satellite_identity,
        &uplink,
        node.node_id(),
        serial_2,
        50,
        expiration,
    );

    let endpoint = satellite.endpoint();
    let (mut client, mut server) = settlement_pipe(node.peer_identity(), 8);
    let server_task = tokio::spawn(async move { endpoint.settlement(&mut server).await });

    // first settle succeeds, the replay is rejected, the stream lives on
    client
        .send(SettlementRequest::new(limit_1.clone(), order_1.clone()))
        .await
        .expect("send");
    client
        .send(SettlementRequest::new(limit_1, order_1))
        .await
        .expect("send replay");
    client
        .send(SettlementRequest::new(limit_2, order_2))
        .await
        .expect("send fresh");
    client.close_send().await.expect("close send");

    let mut order = Vec::new();
    while let Some(response) = client.recv().await.expect("recv") {
        order.push((response.serial_number, response.status));
    }
    server_task.await.expect("join").expect("stream ok");

    assert_eq!(order.len(), 3);
    assert_eq!(order[0], (serial_1, SettlementStatus::Accepted));
    assert_eq!(order[1], (serial_1, SettlementStatus::Rejected));
    assert_eq!(order[2], (serial_2, SettlementStatus::Accepted));

    // only the two accepted orders credited bandwidth
    let total = db
        .get_bucket_bandwidth(
            test_bucket(),
            SystemTime::now() - Duration::from_secs(7200),
            SystemTime::now() + Duration::from_secs(7200),
        )
        .await
        .expect("bucket bandwidth");
    assert_eq!(total, 150);

    satellite.close().await.expect("shutdown");
}

#[tokio::test]
async fn test_expired_limit_rejected_without_db_mutation() {
    let (satellite_identity, uplink, node) = identities();
    let satellite = SatelliteBuilder::new(satellite_identity.clone(), satellite_config(1)).build();
    let db = satellite.orders_db();

    let serial = SerialNumber::random();
    db.create_serial_info(
        serial,
        test_bucket(),
        SystemTime::now() + Duration::from_secs(3600),
    )
    .await
    .expect("issue serial");

    // the order expired one second ago
    let (limit, order) = signed_pair(
        &satellite_identity,
        &uplink,
        node.node_id(),
        serial,
        100,
        SystemTime::now() - Duration::from_secs(1),
    );

    let endpoint = satellite.endpoint();
    let (mut client, mut server) = settlement_pipe(node.peer_identity(), 8);
    let server_task = tokio::spawn(async move { endpoint.settlement(&mut server).await });

    client
        .send(SettlementRequest::new(limit, order))
        .await
        .expect("send");
    client.close_send().await.expect("close send");

    let response = client.recv().await.expect("recv").expect("one response");
    assert_eq!(response.serial_number, serial);
    assert_eq!(response.status, SettlementStatus::Rejected);
    assert!(client.recv().await.expect("recv").is_none());
    server_task.await.expect("join").expect("stream ok");

    // nothing was credited and the serial is still unused
    let total = db
        .get_bucket_bandwidth(
            test_bucket(),
            SystemTime::now() - Duration::from_secs(7200),
            SystemTime::now() + Duration::from_secs(7200),
        )
        .await
        .expect("bucket bandwidth");
    assert_eq!(total, 0);
    db.use_serial_number(serial, node.node_id())
        .await
        .expect("serial must still be consumable");

    satellite.close().await.expect("shutdown");
}

#[tokio::test]
async fn test_wrong_storage_node_terminates_stream() {
    let (satellite_identity, uplink, node) = identities();
    let imposter = Arc::new(meridian_node::FullIdentity::generate());
    let satellite = SatelliteBuilder::new(satellite_identity.clone(), satellite_config(4)).build();

    let (limit, order) = signed_pair(
        &satellite_identity,
        &uplink,
        node.node_id(),
        SerialNumber::random(),
        100,
        SystemTime::now() + Duration::from_secs(600),
    );

    let endpoint = satellite.endpoint();
    // the imposter authenticates as itself but settles the node's limit
    let (mut client, mut server) = settlement_pipe(imposter.peer_identity(), 8);
    let server_task = tokio::spawn(async move { endpoint.settlement(&mut server).await });

    client
        .send(SettlementRequest::new(limit, order))
        .await
        .expect("send");

    let err = server_task.await.expect("join").expect_err("must terminate");
    assert!(matches!(err, Error::Unauthenticated(_)));

    satellite.close().await.expect("shutdown");
}

#[tokio::test]
async fn test_missing_order_is_invalid_argument() {
    let (satellite_identity, uplink, node) = identities();
    let satellite = SatelliteBuilder::new(satellite_identity.clone(), satellite_config(4)).build();

    let (limit, _) = signed_pair(
        &satellite_identity,
        &uplink,
        node.node_id(),
        SerialNumber::random(),
        100,
        SystemTime::now() + Duration::from_secs(600),
    );

    let endpoint = satellite.endpoint();
    let (mut client, mut server) = settlement_pipe(node.peer_identity(), 8);
    let server_task = tokio::spawn(async move { endpoint.settlement(&mut server).await });

    client
        .send(SettlementRequest {
            limit: Some(limit),
            order: None,
        })
        .await
        .expect("send");

    let err = server_task.await.expect("join").expect_err("must terminate");
    assert!(matches!(err, Error::InvalidArgument(_)));

    satellite.close().await.expect("shutdown");
}

#[tokio::test]
async fn test_missing_peer_identity_is_unauthenticated() {
    let (satellite_identity, _, node) = identities();
    let satellite = SatelliteBuilder::new(satellite_identity, satellite_config(4)).build();

    let endpoint = satellite.endpoint();
    let (_client, mut server) = settlement_pipe(node.peer_identity(), 8);
    server.clear_peer_identity();

    let err = endpoint
        .settlement(&mut server)
        .await
        .expect_err("must refuse");
    assert!(matches!(err, Error::Unauthenticated(_)));

    satellite.close().await.expect("shutdown");
}

#[tokio::test]
async fn test_order_sender_settles_through_dialer() {
    let (satellite_identity, uplink, node) = identities();
    let satellite = SatelliteBuilder::new(satellite_identity.clone(), satellite_config(2)).build();
    let db = satellite.orders_db();

    let expiration = SystemTime::now() + Duration::from_secs(600);
    let mut archived = Vec::new();
    let mut serials = Vec::new();
    for amount in [10, 20, 30] {
        let serial = SerialNumber::random();
        serials.push(serial);
        db.create_serial_info(serial, test_bucket(), expiration + Duration::from_secs(3600))
            .await
            .expect("issue serial");
        let (limit, order) = signed_pair(
            &satellite_identity,
            &uplink,
            node.node_id(),
            serial,
            amount,
            expiration,
        );
        archived.push(ArchivedOrder { limit, order });
    }

    let trust = Arc::new(TrustPool::new([(
        satellite_identity.node_id(),
        "sat.meridian:7777".to_string(),
    )]));
    let dialer = Arc::new(ChannelSettlementDialer::new(
        satellite.endpoint(),
        node.peer_identity(),
    ));
    let sender = OrderSender::new(dialer, trust, SenderConfig::default());

    let statuses = sender
        .settle(satellite_identity.node_id(), &archived)
        .await
        .expect("settle");

    assert_eq!(statuses.len(), 3);
    for serial in serials {
        assert_eq!(statuses.get(&serial), Some(&SettlementStatus::Accepted));
    }

    satellite.close().await.expect("shutdown");
}
