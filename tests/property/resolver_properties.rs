//! Property tests for last-write-wins conflict resolution.
//!
//! 1. Resolution is deterministic for any pair of versions.
//! 2. A strictly newer version always wins, whichever side holds it.
//! 3. Equal timestamps always resolve to the server version.
//! 4. The winner is always one of the two inputs, unmodified.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use tasksync::sync::resolve::{Winner, resolve_conflict};
use tasksync_proto::task::{TaskId, TaskSnapshot};
use uuid::Uuid;

fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800_000).prop_map(|ms| {
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    })
}

fn arb_version(id: TaskId) -> impl Strategy<Value = TaskSnapshot> {
    (
        "[a-z ]{1,32}",
        proptest::option::of("[a-z ]{0,64}"),
        any::<bool>(),
        arb_timestamp(),
        arb_timestamp(),
        any::<bool>(),
    )
        .prop_map(
            move |(title, description, completed, created_at, updated_at, deleted)| TaskSnapshot {
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

fn arb_pair() -> impl Strategy<Value = (TaskSnapshot, TaskSnapshot)> {
    any::<u128>()
        .prop_map(|n| TaskId::from_uuid(Uuid::from_u128(n)))
        .prop_flat_map(|id| (arb_version(id), arb_version(id)))
}

proptest! {
    #[test]
    fn resolution_is_deterministic((local, server) in arb_pair()) {
        let first = resolve_conflict(&local, &server);
        let second = resolve_conflict(&local, &server);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn strictly_newer_version_wins((local, server) in arb_pair()) {
        let resolution = resolve_conflict(&local, &server);
        if local.updated_at > server.updated_at {
            prop_assert_eq!(resolution.winner, Winner::Local);
            prop_assert_eq!(&resolution.task, &local);
        } else {
            prop_assert_eq!(resolution.winner, Winner::Server);
            prop_assert_eq!(&resolution.task, &server);
        }
    }

    #[test]
    fn swapping_sides_flips_only_strict_wins((local, server) in arb_pair()) {
        prop_assume!(local.updated_at != server.updated_at);
        let forward = resolve_conflict(&local, &server);
        let backward = resolve_conflict(&server, &local);
        prop_assert_eq!(forward.task, backward.task);
        prop_assert_ne!(forward.winner, backward.winner);
    }

    #[test]
    fn ties_go_to_server((local, mut server) in arb_pair(), offset_ms in 0i64..1000) {
        server.updated_at = local.updated_at;
        let resolution = resolve_conflict(&local, &server);
        prop_assert_eq!(resolution.winner, Winner::Server);

        // One millisecond of lead is enough for the local side.
        let mut ahead = local.clone();
        ahead.updated_at = server.updated_at + TimeDelta::milliseconds(offset_ms + 1);
        prop_assert_eq!(resolve_conflict(&ahead, &server).winner, Winner::Local);
    }
}
