//! Shared scaffolding for integration tests: key wiring and node startup.

use std::sync::Arc;
use std::time::Duration;

use vncache::{CacheConfig, CacheConnector, FbmClient, Keystore, Node, TrustClass};

/// Generate a caller identity and hand out its public half for trust.
pub fn identity() -> (Arc<Keystore>, String) {
    let keystore = Keystore::generate().expect("keygen");
    let public = keystore.public_key_pem().to_string();
    (Arc::new(keystore), public)
}

/// Start a node trusting the given public keys per class.
pub async fn start_node(
    config: CacheConfig,
    client_keys: &[&str],
    node_keys: &[&str],
) -> Node {
    let mut keystore = Keystore::generate().expect("keygen");
    for pem in client_keys {
        keystore.trust(TrustClass::Client, pem).expect("trust client");
    }
    for pem in node_keys {
        keystore
            .trust(TrustClass::CacheNode, pem)
            .expect("trust node");
    }
    Node::start(config, keystore).await.expect("node start")
}

/// Connect a plain client session to `node`.
pub async fn connect_client(keys: &Arc<Keystore>, node: &Node) -> Arc<FbmClient> {
    CacheConnector::client(Arc::clone(keys))
        .connect(&node.connect_url())
        .await
        .expect("client connect")
}

/// Poll `probe` every 100 ms until it returns true or `deadline` passes.
pub async fn wait_until<F, Fut>(deadline: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if probe().await {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
