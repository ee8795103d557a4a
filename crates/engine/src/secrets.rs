//! Secret lookups for header values and TLS material.

use std::collections::BTreeMap;

use resact_core::{EngineError, EngineResult, HeaderValue};

use crate::ports::SecretStore;

/// Bytes under `key` in secret `namespace/name`. A missing secret, a missing key
/// or empty data is a configuration error.
pub async fn secret_value(secrets: &dyn SecretStore, namespace: &str, name: &str, key: &str) -> EngineResult<Vec<u8>> {
    let data = secrets
        .get_secret(namespace, name)
        .await
        .map_err(|e| EngineError::config(format!("secret {namespace}/{name}: {e}")))?;
    match data.get(key) {
        Some(bytes) if !bytes.is_empty() => Ok(bytes.clone()),
        _ => Err(EngineError::config(format!("secret {namespace}/{name} has no data under key {key:?}"))),
    }
}

/// Resolve every declared header to a literal string. `secretKeyRef` wins over
/// `value` when both are set. Any failure aborts with a configuration error.
pub async fn resolve_headers(
    secrets: &dyn SecretStore,
    namespace: &str,
    headers: &BTreeMap<String, HeaderValue>,
) -> EngineResult<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for (name, hv) in headers {
        let value = match (&hv.secret_key_ref, &hv.value) {
            (Some(r), _) => {
                let bytes = secret_value(secrets, namespace, &r.name, &r.key)
                    .await
                    .map_err(|e| EngineError::config(format!("header {name}: {e}")))?;
                String::from_utf8(bytes).map_err(|_| EngineError::config(format!("header {name}: secret value is not utf-8")))?
            }
            (None, Some(v)) => v.clone(),
            (None, None) => return Err(EngineError::config(format!("header {name}: neither value nor secretKeyRef set"))),
        };
        out.insert(name.clone(), value);
    }
    Ok(out)
}
