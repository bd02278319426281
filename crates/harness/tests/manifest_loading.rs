//! Integration tests over the shipped manifest files.

use std::path::PathBuf;

use agent_perf::manifest::{decode_documents, load_documents, split_documents, Resource};

fn manifest_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../manifests")
        .join(name)
}

#[test]
fn expose_manifest_is_a_single_nodeport_service() {
    let data = std::fs::read(manifest_path("expose-prometheus.yaml")).unwrap();
    let resources = decode_documents(&data).unwrap();
    assert_eq!(resources.len(), 1);

    let Resource::Service(svc) = &resources[0] else {
        panic!("expected a Service, got {}", resources[0].kind());
    };
    assert_eq!(svc.metadata.name.as_deref(), Some("prometheus"));
    let spec = svc.spec.as_ref().unwrap();
    assert_eq!(spec.type_.as_deref(), Some("NodePort"));
    let port = &spec.ports.as_ref().unwrap()[0];
    assert_eq!(port.port, 9090);
    assert_eq!(port.node_port, Some(30090));
}

#[test]
fn small_load_manifest_produces_three_pods() {
    let data = std::fs::read(manifest_path("load-small.yaml")).unwrap();
    let resources = decode_documents(&data).unwrap();

    let mut replicas = 0;
    let mut services = 0;
    for resource in &resources {
        match resource {
            Resource::Deployment(d) => {
                replicas += d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
            }
            Resource::Service(_) => services += 1,
            other => panic!("unexpected kind {} in load manifest", other.kind()),
        }
    }
    assert_eq!(replicas, 3);
    assert_eq!(services, 3);
}

#[test]
fn big_load_manifest_produces_fifty_pods() {
    let data = std::fs::read(manifest_path("load-big.yaml")).unwrap();
    let resources = decode_documents(&data).unwrap();

    let replicas: i32 = resources
        .iter()
        .filter_map(|r| match r {
            Resource::Deployment(d) => d.spec.as_ref().and_then(|s| s.replicas),
            _ => None,
        })
        .sum();
    assert_eq!(replicas, 50);
}

#[test]
fn splitting_is_byte_faithful() {
    let data = std::fs::read(manifest_path("load-small.yaml")).unwrap();
    let docs = split_documents(&data);
    // Re-joining the spans with the separator reproduces the input exactly.
    let rejoined = docs.join(&b"---"[..]);
    assert_eq!(rejoined, data);
}

#[test]
fn load_documents_matches_split() {
    let path = manifest_path("load-big.yaml");
    let data = std::fs::read(&path).unwrap();
    let docs = load_documents(&path).unwrap();
    assert_eq!(docs.len(), split_documents(&data).len());
    for (owned, span) in docs.iter().zip(split_documents(&data)) {
        assert_eq!(owned.as_slice(), span);
    }
}
