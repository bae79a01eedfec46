// tests/property/tag_filter_test.rs

//! Bulk termination ends exactly the sessions whose tags miss the filter.

use crate::test_helpers::{TestServer, new_session, wait_until};
use proptest::prelude::*;
use spindle::connection::TagMask;
use std::collections::HashSet;
use std::time::Duration;

fn tag_mask() -> impl Strategy<Value = TagMask> {
    (0u32..16).prop_map(TagMask::from_bits_truncate)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 24,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_end_all_sessions_respects_tag_filter(
        session_tags in prop::collection::vec(tag_mask(), 1..8),
        filter in tag_mask(),
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let server = TestServer::dedicated();

            let mut expected_ended = HashSet::new();
            let mut clients = Vec::new();
            for tags in &session_tags {
                let session = new_session(&server.transport);
                session.set_tags(*tags);
                let (id, client) = server.connect_session(session);
                if !tags.intersects(filter) {
                    expected_ended.insert(id);
                }
                clients.push(client);
            }

            server.registry.end_all_sessions(filter);

            let survivors = session_tags.len() - expected_ended.len();
            let registry = server.registry.clone();
            assert!(wait_until(Duration::from_secs(5), || registry.number_of_connections() == survivors).await);
            let transport = server.transport.clone();
            assert!(wait_until(Duration::from_secs(5), || transport.ended_count() == expected_ended.len()).await);

            let ended: HashSet<_> = server.transport.ended_ids().into_iter().collect();
            assert_eq!(ended, expected_ended);

            drop(clients);
        });
    }
}
