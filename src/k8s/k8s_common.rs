use std::io::{Error, ErrorKind};

pub const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// The identity pgAdmin's initial user is created with and shared servers are
/// registered to.
pub fn admin_identity(name: &str, namespace: &str) -> String {
    format!("admin@{}.{}.svc", name, namespace)
}

/// Namespace of the pod, read from the mounted service account.
pub async fn get_namespace() -> Result<String, Error> {
    read_namespace(NAMESPACE_FILE).await
}

async fn read_namespace(path: &str) -> Result<String, Error> {
    let namespace = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::new(
            e.kind(),
            format!("unable to read namespace from {}: {}", path, e),
        )
    })?;

    let namespace = namespace.trim();
    if namespace.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("namespace file {} is empty", path),
        ));
    }
    Ok(namespace.to_string())
}
