/*!
 * Property Tests
 * Stream reassembly and edge-trigger behaviour under random inputs
 */

use super::common::*;
use kernel_netsock::{LevelZeroMask, NotifyRegistry, Readiness};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

fn arb_segments() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..12)
}

fn arb_readiness() -> impl Strategy<Value = Readiness> {
    (0u32..8).prop_map(|bits| {
        let mut events = Readiness::empty();
        if bits & 1 != 0 {
            events |= Readiness::IN;
        }
        if bits & 2 != 0 {
            events |= Readiness::OUT;
        }
        if bits & 4 != 0 {
            events |= Readiness::HUP;
        }
        events
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reads_concatenate_to_delivered_stream(
        segments in arb_segments(),
        chunk in 1usize..32,
    ) {
        let (engine, sys) = setup();
        let (_listen_fd, fd) = connected_pair(&engine, &sys, 9600);
        let pcb = pcb_of(&sys, fd);
        for segment in &segments {
            engine.deliver(pcb, segment.clone()).unwrap();
        }

        let expected: Vec<u8> = segments.concat();
        let mut received = Vec::new();
        let mut buf = vec![0u8; chunk];
        while received.len() < expected.len() {
            let n = sys.read(&ctx(1), fd, &mut buf);
            prop_assert!(n > 0);
            prop_assert!(n as usize <= chunk);
            received.extend_from_slice(&buf[..n as usize]);
        }

        prop_assert_eq!(received, expected);
        prop_assert_eq!(socket_of(&sys, fd).queued(), 0);
        prop_assert_eq!(engine.credited(pcb), segments.iter().map(Vec::len).sum::<usize>());
    }

    #[test]
    fn reads_never_span_segments(
        segments in arb_segments(),
        chunk in 1usize..128,
    ) {
        let (engine, sys) = setup();
        let (_listen_fd, fd) = connected_pair(&engine, &sys, 9601);
        let pcb = pcb_of(&sys, fd);
        for segment in &segments {
            engine.deliver(pcb, segment.clone()).unwrap();
        }

        let mut buf = vec![0u8; chunk];
        for segment in &segments {
            let mut remaining = segment.len();
            while remaining > 0 {
                let n = sys.read(&ctx(1), fd, &mut buf) as usize;
                prop_assert_eq!(n, remaining.min(chunk));
                remaining -= n;
            }
        }
    }

    #[test]
    fn edge_trigger_reports_only_rising_bits(
        snapshots in prop::collection::vec(arb_readiness(), 1..40),
    ) {
        let mask = Readiness::IN | Readiness::OUT | Readiness::HUP | Readiness::ET;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut registry = NotifyRegistry::new(4, LevelZeroMask::Deliver);
        registry
            .register(
                mask,
                Readiness::empty(),
                Arc::new(move |events: Readiness| {
                    sink.lock().push(events);
                    false
                }),
            )
            .unwrap();

        let mut last = Readiness::empty();
        let mut expected = Vec::new();
        for snapshot in &snapshots {
            registry.dispatch(*snapshot);
            let masked = *snapshot & mask;
            let rising = masked & !last;
            if !rising.is_empty() {
                expected.push(rising);
            }
            last = masked;
        }

        prop_assert_eq!(seen.lock().clone(), expected);
        prop_assert_eq!(registry.len(), 1);
    }
}
