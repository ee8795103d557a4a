//! TLS material for HTTP actions: trust roots, client identity, verification knobs.

use openssl::pkey::PKey;
use openssl::x509::X509;
use reqwest::tls::{Certificate, Identity, Version};
use reqwest::ClientBuilder;
use resact_core::{EngineError, EngineResult, TlsSpec};
use tracing::debug;

use crate::ports::SecretStore;
use crate::secrets::secret_value;

/// Apply `spec` to `builder`. All secret material is loaded and parsed here,
/// before any connection is attempted.
pub async fn apply(
    mut builder: ClientBuilder,
    spec: Option<&TlsSpec>,
    namespace: &str,
    secrets: &dyn SecretStore,
) -> EngineResult<ClientBuilder> {
    builder = builder.min_tls_version(Version::TLS_1_2);
    let Some(spec) = spec else { return Ok(builder) };
    if spec.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(ca) = &spec.ca_secret_ref {
        let pem = secret_value(secrets, namespace, &ca.name, &ca.key).await?;
        let roots = parse_ca_bundle(&pem).map_err(|e| EngineError::config(format!("caSecretRef {namespace}/{}: {e}", ca.name)))?;
        debug!(secret = %ca.name, certs = roots.len(), "using custom CA bundle");
        // The bundle replaces the system roots.
        builder = builder.tls_built_in_root_certs(false);
        for cert in roots {
            builder = builder.add_root_certificate(cert);
        }
    }
    if let Some(cc) = &spec.client_cert_secret_ref {
        let data = secrets
            .get_secret(namespace, &cc.name)
            .await
            .map_err(|e| EngineError::config(format!("clientCertSecretRef {namespace}/{}: {e}", cc.name)))?;
        let cert = data.get(&cc.cert_key).filter(|b| !b.is_empty());
        let key = data.get(&cc.key_key).filter(|b| !b.is_empty());
        let (Some(cert), Some(key)) = (cert, key) else {
            return Err(EngineError::config(format!(
                "clientCertSecretRef {namespace}/{} needs non-empty {:?} and {:?}",
                cc.name, cc.cert_key, cc.key_key
            )));
        };
        let identity = client_identity(cert, key)
            .map_err(|e| EngineError::config(format!("clientCertSecretRef {namespace}/{}: invalid key pair: {e}", cc.name)))?;
        builder = builder.identity(identity);
    }
    Ok(builder)
}

/// Every certificate in a PEM bundle. Fails when none can be parsed.
pub fn parse_ca_bundle(pem: &[u8]) -> Result<Vec<Certificate>, String> {
    let certs = Certificate::from_pem_bundle(pem).map_err(|e| format!("invalid certificate: {e}"))?;
    if certs.is_empty() {
        return Err("no PEM certificates found".to_string());
    }
    Ok(certs)
}

/// Client identity from a PEM certificate and a PKCS#1, SEC1 or PKCS#8 key.
/// The key is re-encoded as PKCS#8, the only form the TLS backend loads.
pub fn client_identity(cert: &[u8], key: &[u8]) -> Result<Identity, String> {
    let pkey = PKey::private_key_from_pem(key).map_err(|e| format!("unreadable private key: {e}"))?;
    let leaf = X509::from_pem(cert).map_err(|e| format!("unreadable certificate: {e}"))?;
    let public = leaf.public_key().map_err(|e| format!("certificate public key: {e}"))?;
    if !public.public_eq(&pkey) {
        return Err("certificate and key do not match".to_string());
    }
    let pkcs8 = pkey.private_key_to_pem_pkcs8().map_err(|e| format!("re-encoding key: {e}"))?;
    Identity::from_pkcs8_pem(cert, &pkcs8).map_err(|e| e.to_string())
}
