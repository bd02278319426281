//! Manifest loading and dispatch.
//!
//! Manifests are multi-document YAML files (`---`-separated). Each document
//! is decoded into one of a closed set of typed Kubernetes objects and
//! created through the matching typed [`kube::Api`]. The set is closed on
//! purpose: a manifest introducing a new kind must be wired in here
//! explicitly, never silently skipped.

use std::path::{Path, PathBuf};

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{Api, PostParams};
use kube::Client;
use thiserror::Error;
use tracing::{error, info};

/// Document separator, matched anywhere in the byte stream.
const SEPARATOR: &[u8] = b"---";

/// A document shorter than this is treated as empty and skipped.
const MIN_DOCUMENT_LEN: usize = 2;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode manifest document: {0}")]
    Decode(#[from] serde_yaml::Error),

    #[error("manifest document has no kind field")]
    MissingKind,

    #[error("unhandled resource kind {kind:?}")]
    UnsupportedKind { kind: String },
}

/// A typed Kubernetes object the dispatcher knows how to create.
#[derive(Debug)]
pub enum Resource {
    Namespace(Box<Namespace>),
    ConfigMap(Box<ConfigMap>),
    ServiceAccount(Box<ServiceAccount>),
    Service(Box<Service>),
    Deployment(Box<Deployment>),
    DaemonSet(Box<DaemonSet>),
    ClusterRole(Box<ClusterRole>),
    ClusterRoleBinding(Box<ClusterRoleBinding>),
}

impl Resource {
    /// The kind name as it appears in the manifest.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Namespace(_) => "Namespace",
            Self::ConfigMap(_) => "ConfigMap",
            Self::ServiceAccount(_) => "ServiceAccount",
            Self::Service(_) => "Service",
            Self::Deployment(_) => "Deployment",
            Self::DaemonSet(_) => "DaemonSet",
            Self::ClusterRole(_) => "ClusterRole",
            Self::ClusterRoleBinding(_) => "ClusterRoleBinding",
        }
    }

    /// The object's metadata name, if set.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        let name = match self {
            Self::Namespace(o) => &o.metadata.name,
            Self::ConfigMap(o) => &o.metadata.name,
            Self::ServiceAccount(o) => &o.metadata.name,
            Self::Service(o) => &o.metadata.name,
            Self::Deployment(o) => &o.metadata.name,
            Self::DaemonSet(o) => &o.metadata.name,
            Self::ClusterRole(o) => &o.metadata.name,
            Self::ClusterRoleBinding(o) => &o.metadata.name,
        };
        name.as_deref()
    }
}

/// Split a manifest byte stream on the `---` separator.
///
/// Spans are returned in file order, byte-for-byte faithful to the source.
/// Empty spans (consecutive separators, leading/trailing separators) are
/// preserved; the decode layer skips anything shorter than 2 bytes.
#[must_use]
pub fn split_documents(data: &[u8]) -> Vec<&[u8]> {
    let mut docs = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + SEPARATOR.len() <= data.len() {
        if &data[i..i + SEPARATOR.len()] == SEPARATOR {
            docs.push(&data[start..i]);
            i += SEPARATOR.len();
            start = i;
        } else {
            i += 1;
        }
    }
    docs.push(&data[start..]);
    docs
}

/// Read a manifest file and split it into documents.
///
/// # Errors
///
/// Returns [`ManifestError::Io`] if the file cannot be read.
pub fn load_documents(path: &Path) -> Result<Vec<Vec<u8>>, ManifestError> {
    let data = std::fs::read(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(split_documents(&data)
        .into_iter()
        .map(<[u8]>::to_vec)
        .collect())
}

/// Decode a single document into a typed [`Resource`].
///
/// # Errors
///
/// Returns [`ManifestError::Decode`] on malformed YAML,
/// [`ManifestError::MissingKind`] when the document has no `kind`, and
/// [`ManifestError::UnsupportedKind`] for any kind outside the closed set.
pub fn decode(doc: &[u8]) -> Result<Resource, ManifestError> {
    let value: serde_yaml::Value = serde_yaml::from_slice(doc)?;
    let kind = value
        .get("kind")
        .and_then(serde_yaml::Value::as_str)
        .ok_or(ManifestError::MissingKind)?
        .to_string();

    let resource = match kind.as_str() {
        "Namespace" => Resource::Namespace(Box::new(serde_yaml::from_value(value)?)),
        "ConfigMap" => Resource::ConfigMap(Box::new(serde_yaml::from_value(value)?)),
        "ServiceAccount" => Resource::ServiceAccount(Box::new(serde_yaml::from_value(value)?)),
        "Service" => Resource::Service(Box::new(serde_yaml::from_value(value)?)),
        "Deployment" => Resource::Deployment(Box::new(serde_yaml::from_value(value)?)),
        "DaemonSet" => Resource::DaemonSet(Box::new(serde_yaml::from_value(value)?)),
        "ClusterRole" => Resource::ClusterRole(Box::new(serde_yaml::from_value(value)?)),
        "ClusterRoleBinding" => {
            Resource::ClusterRoleBinding(Box::new(serde_yaml::from_value(value)?))
        }
        _ => return Err(ManifestError::UnsupportedKind { kind }),
    };
    Ok(resource)
}

/// Decode every non-empty document in a manifest byte stream.
///
/// # Errors
///
/// Fails on the first document that cannot be decoded, with the offending
/// bytes logged.
pub fn decode_documents(data: &[u8]) -> Result<Vec<Resource>, ManifestError> {
    let mut resources = Vec::new();
    for doc in split_documents(data) {
        if doc.len() < MIN_DOCUMENT_LEN {
            continue;
        }
        let resource = decode(doc).inspect_err(|_| {
            error!(
                document = %String::from_utf8_lossy(doc),
                "Failed to decode manifest document"
            );
        })?;
        resources.push(resource);
    }
    Ok(resources)
}

/// Create a decoded resource against the cluster.
///
/// Namespaced kinds are created in `namespace`; cluster-scoped kinds
/// (Namespace, ClusterRole, ClusterRoleBinding) ignore it.
///
/// # Errors
///
/// Returns an error if the API call fails.
pub async fn create(client: &Client, namespace: &str, resource: Resource) -> anyhow::Result<()> {
    let pp = PostParams::default();
    let kind = resource.kind();
    let name = resource.name().unwrap_or("<unnamed>").to_string();
    info!(kind, name = %name, namespace, "Creating resource");

    match resource {
        Resource::Namespace(o) => {
            let api: Api<Namespace> = Api::all(client.clone());
            api.create(&pp, &o).await?;
        }
        Resource::ClusterRole(o) => {
            let api: Api<ClusterRole> = Api::all(client.clone());
            api.create(&pp, &o).await?;
        }
        Resource::ClusterRoleBinding(o) => {
            let api: Api<ClusterRoleBinding> = Api::all(client.clone());
            api.create(&pp, &o).await?;
        }
        Resource::ConfigMap(o) => {
            let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
            api.create(&pp, &o).await?;
        }
        Resource::ServiceAccount(o) => {
            let api: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
            api.create(&pp, &o).await?;
        }
        Resource::Service(o) => {
            let api: Api<Service> = Api::namespaced(client.clone(), namespace);
            api.create(&pp, &o).await?;
        }
        Resource::Deployment(o) => {
            let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
            api.create(&pp, &o).await?;
        }
        Resource::DaemonSet(o) => {
            let api: Api<DaemonSet> = Api::namespaced(client.clone(), namespace);
            api.create(&pp, &o).await?;
        }
    }
    Ok(())
}

/// Load a manifest file and create every object it defines.
///
/// # Errors
///
/// Fails on the first unreadable file, undecodable document, or rejected
/// API call.
pub async fn apply_file(client: &Client, namespace: &str, path: &Path) -> anyhow::Result<()> {
    info!(manifest = %path.display(), namespace, "Applying manifest");
    let data = std::fs::read(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    for resource in decode_documents(&data)? {
        create(client, namespace, resource).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTI_DOC: &[u8] = b"apiVersion: v1
kind: Namespace
metadata:
  name: perf
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: agent-config
  namespace: perf
data:
  debug: \"false\"
---
apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: agent
spec:
  selector:
    matchLabels:
      k8s-app: agent
  template:
    metadata:
      labels:
        k8s-app: agent
    spec:
      containers:
        - name: agent
          image: agent:latest
";

    #[test]
    fn test_split_preserves_count_order_and_bytes() {
        let data = b"first\n---\nsecond\n---\nthird";
        let docs = split_documents(data);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0], b"first\n");
        assert_eq!(docs[1], b"\nsecond\n");
        assert_eq!(docs[2], b"\nthird");
    }

    #[test]
    fn test_split_without_separator_is_single_doc() {
        let data = b"only document";
        let docs = split_documents(data);
        assert_eq!(docs, vec![&data[..]]);
    }

    #[test]
    fn test_split_leading_separator_yields_empty_span() {
        let docs = split_documents(b"---\ndoc");
        assert_eq!(docs.len(), 2);
        assert!(docs[0].is_empty());
        assert_eq!(docs[1], b"\ndoc");
    }

    #[test]
    fn test_decode_documents_skips_empty_spans() {
        // Leading separator (empty span) and a newline-only trailing doc.
        let data = b"---
apiVersion: v1
kind: Namespace
metadata:
  name: perf
---
";
        let resources = decode_documents(data).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].kind(), "Namespace");
    }

    #[test]
    fn test_decode_multi_document_manifest() {
        let resources = decode_documents(MULTI_DOC).unwrap();
        let kinds: Vec<_> = resources.iter().map(Resource::kind).collect();
        assert_eq!(kinds, ["Namespace", "ConfigMap", "DaemonSet"]);
        assert_eq!(resources[0].name(), Some("perf"));
        assert_eq!(resources[2].name(), Some("agent"));
    }

    #[test]
    fn test_decode_unsupported_kind_is_fatal() {
        let doc = b"apiVersion: v1
kind: Pod
metadata:
  name: stray
";
        let err = decode(doc).unwrap_err();
        match err {
            ManifestError::UnsupportedKind { kind } => assert_eq!(kind, "Pod"),
            other => panic!("expected UnsupportedKind, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_missing_kind() {
        let doc = b"apiVersion: v1
metadata:
  name: nameless
";
        assert!(matches!(decode(doc), Err(ManifestError::MissingKind)));
    }

    #[test]
    fn test_decode_malformed_yaml() {
        let doc = b"kind: [unclosed";
        assert!(matches!(decode(doc), Err(ManifestError::Decode(_))));
    }

    #[test]
    fn test_unsupported_kind_in_stream_aborts() {
        let data = b"apiVersion: v1
kind: Namespace
metadata:
  name: perf
---
apiVersion: v1
kind: Secret
metadata:
  name: sneaky
";
        let err = decode_documents(data).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::UnsupportedKind { kind } if kind == "Secret"
        ));
    }

    #[test]
    fn test_load_documents_missing_file() {
        let err = load_documents(Path::new("/nonexistent/manifest.yaml")).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }
}
