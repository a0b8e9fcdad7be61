// Copyright (c) 2026 Quorumcast
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use proptest::prelude::*;

use quorumcast::core::types::{NodeId, SigEntry, Signature64};
use quorumcast::networking::codec::Frame;

fn arb_node() -> impl Strategy<Value = NodeId> {
    (0u32..128).prop_map(NodeId::from)
}

fn arb_ip() -> impl Strategy<Value = String> {
    "[0-9a-z.:]{0,48}"
}

fn arb_sig() -> impl Strategy<Value = Signature64> {
    any::<[u8; 32]>().prop_map(|half| {
        let mut s = [0u8; 64];
        s[..32].copy_from_slice(&half);
        s[32..].copy_from_slice(&half);
        Signature64(s)
    })
}

fn arb_sig_list() -> impl Strategy<Value = Vec<SigEntry>> {
    proptest::collection::vec(
        (arb_node(), arb_sig()).prop_map(|(node, signature)| SigEntry { node, signature }),
        0..8,
    )
}

fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..512)
}

proptest! {
    #[test]
    fn ack_round_trips(sender in arb_node()) {
        let frame = Frame::Ack { sender };
        prop_assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn send_round_trips(
        sender in arb_node(),
        round in 0u32..1_000_000,
        ip in arb_ip(),
        payload in arb_payload(),
    ) {
        let frame = Frame::Send { sender, round, ip, payload };
        prop_assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn echo_round_trips(
        sender in arb_node(),
        round in 0u32..1_000_000,
        ip in arb_ip(),
        signature in arb_sig(),
        payload in arb_payload(),
    ) {
        let frame = Frame::Echo { sender, round, ip, signature, payload };
        prop_assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn fin_round_trips(
        sender in arb_node(),
        round in 0u32..1_000_000,
        ip in arb_ip(),
        signatures in arb_sig_list(),
        payload in arb_payload(),
    ) {
        let frame = Frame::Fin { sender, round, ip, signatures, payload };
        prop_assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn sup_round_trips(
        sender in arb_node(),
        round in 0u32..1_000_000,
        ip in arb_ip(),
        original_sender in arb_node(),
        signatures in arb_sig_list(),
        payload in arb_payload(),
    ) {
        let frame = Frame::Sup { sender, round, ip, original_sender, signatures, payload };
        prop_assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }

    /// Decoding never panics on arbitrary bytes; anything it accepts
    /// re-encodes to a stable decodable form.
    #[test]
    fn decode_is_total(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        if let Ok(frame) = Frame::decode(&bytes) {
            let reencoded = frame.encode();
            prop_assert_eq!(Frame::decode(&reencoded).unwrap(), frame);
        }
    }
}
