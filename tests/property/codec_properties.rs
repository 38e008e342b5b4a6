//! Property tests for the stored payload codec and the batch JSON body.
//!
//! 1. Any mutation payload survives the at-rest postcard encoding.
//! 2. Random bytes never cause a panic in `decode_payload`.
//! 3. Any batch request survives the JSON wire encoding, keeping item order.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use tasksync_proto::batch::{BatchItem, BatchRequest};
use tasksync_proto::codec;
use tasksync_proto::mutation::MutationPayload;
use tasksync_proto::task::{TaskId, TaskSnapshot};
use uuid::Uuid;

fn arb_task_id() -> impl Strategy<Value = TaskId> {
    any::<u128>().prop_map(|n| TaskId::from_uuid(Uuid::from_u128(n)))
}

/// Millisecond timestamps between 1970 and 2100.
fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800_000).prop_map(|ms| {
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    })
}

fn arb_snapshot() -> impl Strategy<Value = TaskSnapshot> {
    (
        arb_task_id(),
        "[^\x00]{1,64}",
        proptest::option::of("[^\x00]{0,128}"),
        any::<bool>(),
        arb_timestamp(),
        arb_timestamp(),
        any::<bool>(),
    )
        .prop_map(
            |(id, title, description, completed, created_at, updated_at, deleted)| TaskSnapshot {
                id,
                title,
                description,
                completed,
                created_at,
                updated_at,
                deleted,
            },
        )
}

fn arb_payload() -> impl Strategy<Value = MutationPayload> {
    prop_oneof![
        arb_snapshot().prop_map(MutationPayload::Create),
        arb_snapshot().prop_map(MutationPayload::Update),
        (arb_task_id(), arb_timestamp())
            .prop_map(|(id, deleted_at)| MutationPayload::Delete { id, deleted_at }),
    ]
}

proptest! {
    /// Any payload survives the postcard encoding used by the queue table.
    #[test]
    fn stored_payload_round_trip(payload in arb_payload()) {
        let bytes = codec::encode_payload(&payload).expect("encode should succeed");
        let decoded = codec::decode_payload(&bytes).expect("decode should succeed");
        prop_assert_eq!(payload, decoded);
    }

    /// Random bytes never cause a panic when decoded.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_payload(&bytes);
    }

    /// Batch bodies keep every item, in order, across the JSON encoding.
    #[test]
    fn batch_request_json_preserves_order(
        payloads in prop::collection::vec(arb_payload(), 0..20),
        ts in arb_timestamp(),
    ) {
        let request = BatchRequest {
            items: payloads.into_iter().map(BatchItem::from_payload).collect(),
            client_timestamp: ts,
        };
        let json = serde_json::to_string(&request).expect("encode should succeed");
        let decoded: BatchRequest = serde_json::from_str(&json).expect("decode should succeed");
        prop_assert_eq!(request, decoded);
    }
}
