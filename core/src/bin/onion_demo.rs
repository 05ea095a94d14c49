use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use onionrelay_core::crypto::export_public_key;
use onionrelay_core::{
    init_tracing, public_key_fingerprint, ChannelObserver, DeliveryObserver, Directory, InMemoryDirectory,
    MemoryTransport, NodeConfig, NodeId, NodeKeyPair, NoopObserver, PrivacyConfig, RelayNode,
};

const NODE_COUNT: u32 = 5;

/// Usage: onion_demo [message] [config.json]
///
/// Runs an in-process overlay of five nodes and sends `message` from node 0
/// to the last node over a random circuit. The optional JSON file holds a
/// `PrivacyConfig` used by every node.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing("onion_demo=info,onionrelay_core=info");

    let mut args = std::env::args().skip(1);
    let message = args.next().unwrap_or_else(|| "hello through the onion".to_string());
    let privacy_config = match args.next() {
        Some(path) => serde_json::from_str::<PrivacyConfig>(&std::fs::read_to_string(path)?)?,
        None => PrivacyConfig::default(),
    };
    info!("Privacy config: {}", serde_json::to_string(&privacy_config)?);

    let directory = Arc::new(InMemoryDirectory::new());
    let transport = Arc::new(MemoryTransport::new());
    let (observer, mut delivered) = ChannelObserver::new();
    let observer = Arc::new(observer);

    let destination = NodeId::new(NODE_COUNT - 1);
    let mut nodes = Vec::new();
    for id in 0..NODE_COUNT {
        let config = NodeConfig::local(id);
        info!("Generating {}-bit key for node {}...", config.key_bits, id);
        let keys = NodeKeyPair::generate(config.key_bits)?;
        info!(
            "Node {} fingerprint {} ({} byte public key)",
            id,
            public_key_fingerprint(keys.public_key()),
            export_public_key(keys.public_key())?.len()
        );

        let node_observer: Arc<dyn DeliveryObserver> = if NodeId::new(id) == destination {
            observer.clone()
        } else {
            Arc::new(NoopObserver)
        };
        let (node, _handle) = RelayNode::launch(
            config,
            keys,
            privacy_config.clone(),
            directory.clone(),
            transport.clone(),
            node_observer,
        )?;
        nodes.push(node);
    }
    info!("Directory holds {} nodes", directory.list().len());

    let circuit = nodes[0].send_message(destination, message.as_bytes()).await?;
    let path: Vec<String> = circuit.hops.iter().map(ToString::to_string).collect();
    info!("Circuit {}: {}", circuit.id, path.join(" -> "));

    match tokio::time::timeout(Duration::from_secs(30), delivered.recv()).await {
        Ok(Some(payload)) => println!("{} received: {}", destination, String::from_utf8_lossy(&payload)),
        _ => return Err("message was not delivered".into()),
    }

    for node in &nodes {
        let stats = node.privacy_manager().relay_stats();
        info!(
            "{}: relayed={} delivered={} rejected={}",
            node.node_id(),
            stats.packets_relayed,
            stats.packets_delivered,
            stats.packets_rejected
        );
    }
    Ok(())
}
