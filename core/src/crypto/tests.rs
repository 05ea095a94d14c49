//! Cross-cutting tests for the envelope codec

use crate::crypto::envelope::{build_layer, peel_layer, EnvelopeError, LENGTH_PREFIX_SIZE};
use crate::crypto::test_keys;
use crate::NodeId;
use rand::Rng;
use rsa::traits::PublicKeyParts;

#[test]
fn test_tampered_key_region_always_fails() {
    let pair = test_keys::key(0);
    let envelope = build_layer(pair.public_key(), NodeId::new(9), b"tamper target").unwrap();
    let key_region = LENGTH_PREFIX_SIZE + pair.public_key().size();

    let mut rng = rand::thread_rng();
    let mut positions: Vec<usize> = (0..LENGTH_PREFIX_SIZE).collect();
    positions.extend((0..24).map(|_| rng.gen_range(LENGTH_PREFIX_SIZE..key_region)));

    for pos in positions {
        let mut tampered = envelope.clone();
        tampered[pos] ^= 1u8 << rng.gen_range(0..8u32);
        assert!(
            matches!(peel_layer(pair.private_key(), &tampered), Err(EnvelopeError::Decrypt(_))),
            "flip at byte {} went unnoticed",
            pos
        );
    }
}

#[test]
fn test_tampered_payload_region_never_yields_original() {
    // CBC carries no MAC, so a flip here may decrypt; it must not decrypt to the original.
    let pair = test_keys::key(0);
    let payload = vec![0x5Au8; 200];
    let envelope = build_layer(pair.public_key(), NodeId::new(9), &payload).unwrap();
    let key_region = LENGTH_PREFIX_SIZE + pair.public_key().size();

    let mut rng = rand::thread_rng();
    let mut detected = 0;
    for _ in 0..32 {
        let pos = rng.gen_range(key_region..envelope.len());
        let mut tampered = envelope.clone();
        tampered[pos] ^= 0x80;
        match peel_layer(pair.private_key(), &tampered) {
            Err(EnvelopeError::Decrypt(_)) => detected += 1,
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(layer) => {
                assert!(layer.next_hop != NodeId::new(9) || layer.payload != payload);
            }
        }
    }
    println!("{} of 32 payload-region flips detected", detected);
}

#[test]
fn test_three_hop_peeling() {
    let keys = test_keys::pool();
    let (b, c) = (NodeId::new(2), NodeId::new(3));
    let payload = b"Secret message through 3 hops!";

    // Innermost first: C delivers, B forwards to C, A forwards to B
    let layer_c = build_layer(keys[2].public_key(), NodeId::TERMINAL, payload).unwrap();
    let layer_b = build_layer(keys[1].public_key(), c, &layer_c).unwrap();
    let layer_a = build_layer(keys[0].public_key(), b, &layer_b).unwrap();

    let at_a = peel_layer(keys[0].private_key(), &layer_a).unwrap();
    assert_eq!(at_a.next_hop, b);
    assert_eq!(at_a.payload, layer_b);
    assert!(!contains(&at_a.payload, payload));

    let at_b = peel_layer(keys[1].private_key(), &at_a.payload).unwrap();
    assert_eq!(at_b.next_hop, c);
    assert!(!contains(&at_b.payload, payload));

    let at_c = peel_layer(keys[2].private_key(), &at_b.payload).unwrap();
    assert_eq!(at_c.next_hop, NodeId::TERMINAL);
    assert_eq!(at_c.payload, payload);

    // Out-of-order peel fails
    assert!(peel_layer(keys[1].private_key(), &layer_a).is_err());
}

#[test]
fn test_concurrent_peels_share_one_key() {
    let pair = test_keys::key(3);
    let envelopes: Vec<(u32, Vec<u8>)> = (0..16u32)
        .map(|i| {
            let body = format!("message {}", i).into_bytes();
            (i, build_layer(pair.public_key(), NodeId::new(i), &body).unwrap())
        })
        .collect();

    std::thread::scope(|scope| {
        let handles: Vec<_> = envelopes
            .iter()
            .map(|(i, envelope)| {
                scope.spawn(move || {
                    let layer = peel_layer(pair.private_key(), envelope).unwrap();
                    (*i, layer)
                })
            })
            .collect();

        for handle in handles {
            let (i, layer) = handle.join().unwrap();
            assert_eq!(layer.next_hop, NodeId::new(i));
            assert_eq!(layer.payload, format!("message {}", i).into_bytes());
        }
    });
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
