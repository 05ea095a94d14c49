use std::sync::{Arc, OnceLock};
use std::time::Duration;

use onionrelay_core::crypto::{export_private_key, export_public_key, DEFAULT_KEY_BITS};
use onionrelay_core::{
    build_circuit, peel_layer, ChannelObserver, CircuitError, DeliveryObserver, Directory, InMemoryDirectory,
    MemoryTransport, NodeConfig, NodeId, NodeKeyPair, NoopObserver, PrivacyConfig, PrivacyError,
    RelayNode, Transport,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

const NODES: usize = 4;

fn keys() -> &'static [NodeKeyPair] {
    static KEYS: OnceLock<Vec<NodeKeyPair>> = OnceLock::new();
    KEYS.get_or_init(|| {
        (0..NODES)
            .map(|_| NodeKeyPair::generate(DEFAULT_KEY_BITS).unwrap())
            .collect()
    })
}

struct Overlay {
    directory: Arc<InMemoryDirectory>,
    transport: Arc<MemoryTransport>,
    nodes: Vec<RelayNode>,
    delivered: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Node `NODES - 1` is the only one that reports deliveries
fn overlay(config: PrivacyConfig) -> Overlay {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let directory = Arc::new(InMemoryDirectory::new());
    let transport = Arc::new(MemoryTransport::new());
    let (observer, delivered) = ChannelObserver::new();
    let observer = Arc::new(observer);

    let nodes = keys()
        .iter()
        .enumerate()
        .map(|(i, pair)| {
            let observer: Arc<dyn DeliveryObserver> = if i == NODES - 1 {
                observer.clone()
            } else {
                Arc::new(NoopObserver)
            };
            let (node, _handle) = RelayNode::launch(
                NodeConfig::local(i as u32),
                pair.clone(),
                config.clone(),
                directory.clone(),
                transport.clone(),
                observer,
            )
            .unwrap();
            node
        })
        .collect();

    Overlay { directory, transport, nodes, delivered }
}

async fn next_delivery(overlay: &mut Overlay) -> Vec<u8> {
    timeout(Duration::from_secs(20), overlay.delivered.recv())
        .await
        .expect("Timeout waiting for delivery")
        .expect("Observer channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_circuit_end_to_end() {
    let mut overlay = overlay(PrivacyConfig::default());
    let destination = NodeId::new(NODES as u32 - 1);

    let circuit = overlay.nodes[0]
        .send_message(destination, b"hello through the onion")
        .await
        .unwrap();

    // Two relays chosen from nodes 1 and 2, then the destination
    assert_eq!(circuit.hops.len(), 3);
    assert_eq!(circuit.hops[2], destination);
    assert_eq!(next_delivery(&mut overlay).await, b"hello through the onion");

    let relayed: u64 = overlay.nodes[1..3]
        .iter()
        .map(|n| n.privacy_manager().relay_stats().packets_relayed)
        .sum();
    assert_eq!(relayed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_explicit_path_with_empty_payload() {
    let mut overlay = overlay(PrivacyConfig::default());
    let path = [NodeId::new(2), NodeId::new(1), NodeId::new(3)];

    overlay.nodes[0].privacy_manager().send_via(&path, b"").await.unwrap();
    assert_eq!(next_delivery(&mut overlay).await, b"");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_payload() {
    let mut overlay = overlay(PrivacyConfig::default());
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();

    overlay.nodes[0]
        .privacy_manager()
        .send_via(&[NodeId::new(1), NodeId::new(3)], &payload)
        .await
        .unwrap();
    assert_eq!(next_delivery(&mut overlay).await, payload);
}

#[tokio::test]
async fn test_unknown_hop_is_rejected_before_sending() {
    let overlay = overlay(PrivacyConfig::default());

    let result = overlay.nodes[0]
        .privacy_manager()
        .send_via(&[NodeId::new(1), NodeId::new(77)], b"lost")
        .await;
    assert!(matches!(
        result,
        Err(PrivacyError::Circuit(CircuitError::UnknownNode(id))) if id == NodeId::new(77)
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(overlay.nodes[1].privacy_manager().relay_stats(), Default::default());
}

#[tokio::test]
async fn test_relays_only_learn_the_next_hop() {
    let overlay = overlay(PrivacyConfig::default());
    let snapshot = overlay.directory.snapshot();
    let path = [NodeId::new(1), NodeId::new(2), NodeId::new(3)];
    let onion = build_circuit(&snapshot, &path, b"secret").unwrap();

    let first = peel_layer(keys()[1].private_key(), &onion.packet_bytes).unwrap();
    assert_eq!(first.next_hop, NodeId::new(2));
    assert!(!first.payload.windows(6).any(|w| w == b"secret"));

    // Node 3 cannot read what is addressed to node 2
    assert!(peel_layer(keys()[3].private_key(), &first.payload).is_err());

    let second = peel_layer(keys()[2].private_key(), &first.payload).unwrap();
    assert_eq!(second.next_hop, NodeId::new(3));
    let last = peel_layer(keys()[3].private_key(), &second.payload).unwrap();
    assert!(last.next_hop.is_terminal());
    assert_eq!(last.payload, b"secret");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tampered_envelope_is_dropped() {
    let mut overlay = overlay(PrivacyConfig::default());
    let snapshot = overlay.directory.snapshot();
    let mut onion = build_circuit(&snapshot, &[NodeId::new(1), NodeId::new(3)], b"tampered").unwrap();

    // Inside the RSA block: OAEP decoding must fail
    onion.packet_bytes[10] ^= 0x01;
    overlay.transport.send(&onion.entry_address, onion.packet_bytes).await.unwrap();

    let good = build_circuit(&snapshot, &[NodeId::new(1), NodeId::new(3)], b"intact").unwrap();
    overlay.transport.send(&good.entry_address, good.packet_bytes).await.unwrap();

    assert_eq!(next_delivery(&mut overlay).await, b"intact");
    assert!(overlay.delivered.try_recv().is_err());
}

#[tokio::test]
async fn test_directory_accepts_exported_keys() {
    let directory = InMemoryDirectory::new();
    let exported = export_public_key(keys()[0].public_key()).unwrap();
    directory
        .register_exported(NodeId::new(10), &exported, "mem://node10".to_string())
        .unwrap();
    assert_eq!(&directory.get(NodeId::new(10)).unwrap().public_key, keys()[0].public_key());

    let private = export_private_key(Some(keys()[0].private_key())).unwrap().unwrap();
    let restored = NodeKeyPair::from_exported_private(&private).unwrap();
    assert_eq!(restored.public_key(), keys()[0].public_key());
    assert_eq!(export_private_key(None).unwrap(), None);
}
