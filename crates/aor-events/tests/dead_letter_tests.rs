// End-to-end dead-letter behavior: well-formed events reach subscribers,
// garbage payloads are counted and never surface.

use aor_events::{ChannelConfig, EventBus};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct OrderPlaced {
    order_id: String,
    amount_cents: u64,
}

#[tokio::test]
async fn test_well_formed_then_garbage_payload() {
    let bus = EventBus::new();
    bus.register_schema::<OrderPlaced>("OrderPlaced", 1);
    let orders = bus
        .channel::<OrderPlaced>("orders", "OrderPlaced", 1, ChannelConfig::default())
        .unwrap();

    let mut subscriber = bus.subscribe(&orders);

    // Well-formed publish is delivered.
    bus.publish(
        &orders,
        &OrderPlaced {
            order_id: "o-1".to_string(),
            amount_cents: 4200,
        },
        HashMap::new(),
    )
    .await
    .unwrap();

    let event = subscriber.recv().await.unwrap();
    assert_eq!(event.payload.order_id, "o-1");

    let stats = bus.stats();
    assert_eq!(stats.consumed, 1);
    assert_eq!(stats.dead_lettered, 0);

    // Binary garbage tagged for the same channel never reaches the
    // subscriber and increments the dead-letter count.
    bus.publish_raw("orders", Bytes::from_static(b"\xff\xfe{not json"), HashMap::new())
        .await
        .unwrap();

    assert!(subscriber
        .recv_timeout(Duration::from_millis(50))
        .await
        .is_none());

    let stats = bus.stats();
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.per_channel["orders"].dead_lettered, 1);

    let letters = bus.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].envelope.channel, "orders");
}

#[tokio::test]
async fn test_unregistered_channel_cannot_be_created() {
    let bus = EventBus::new();
    let err = bus
        .channel::<OrderPlaced>("orders", "OrderPlaced", 1, ChannelConfig::default())
        .unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION_ERROR");

    // No publish path exists without a channel.
    let publish_err = bus
        .publish_raw("orders", Bytes::from_static(b"{}"), HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(publish_err.code(), "CONFIGURATION_ERROR");
}
