// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use diesel::{ConnectionError, ConnectionResult};
use diesel_async::AsyncPgConnection;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, OwnedTrustAnchor, RootCertStore};
use rustls_pki_types::CertificateDer;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, error};
use webpki_roots::TLS_SERVER_ROOTS;

// Accepts any server certificate, matching libpq's default `sslmode=prefer` behaviour.
#[derive(Debug)]
pub(crate) struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

// Opens a tokio-postgres connection with our TLS connector and hands it to diesel-async, which
// has no TLS hook of its own. Whether TLS is actually used is negotiated with the server and the
// `sslmode` of the URL.
pub async fn establish_tls_connection(
    database_url: &str,
    tls_config: ClientConfig,
) -> ConnectionResult<AsyncPgConnection> {
    let tls = MakeRustlsConnect::new(tls_config);
    let (client, conn) = tokio_postgres::connect(database_url, tls)
        .await
        .map_err(|e| ConnectionError::BadConnection(e.to_string()))?;

    // Drives the socket until the client is dropped
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            error!("[Db] Connection terminated: {e}");
        }
    });

    AsyncPgConnection::try_from(client).await
}

// Without `verify_cert` any server certificate is accepted. Otherwise the webpki roots are
// trusted, plus the PEM or DER certificates in `ca_cert_path` when given.
pub fn build_tls_config(
    verify_cert: bool,
    ca_cert_path: Option<&Path>,
) -> anyhow::Result<ClientConfig> {
    if !verify_cert {
        return Ok(ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth());
    }

    let mut roots = webpki_root_store();
    if let Some(path) = ca_cert_path {
        let added = add_ca_certs(&mut roots, path)?;
        debug!("[Db] Trusting {} certificates from {}", added, path.display());
    }

    Ok(ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

fn add_ca_certs(roots: &mut RootCertStore, path: &Path) -> anyhow::Result<usize> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read CA certificate from {}", path.display()))?;

    let certs: Vec<CertificateDer<'static>> =
        if bytes.starts_with(b"-----BEGIN CERTIFICATE-----") {
            rustls_pemfile::certs(&mut bytes.as_slice())
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("Failed to parse PEM certificates from {}", path.display()))?
        } else {
            vec![CertificateDer::from(bytes)]
        };

    let count = certs.len();
    for cert in certs {
        roots
            .add(&Certificate(cert.to_vec()))
            .with_context(|| format!("Invalid CA certificate in {}", path.display()))?;
    }
    Ok(count)
}

fn webpki_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject.as_ref(),
            ta.subject_public_key_info.as_ref(),
            ta.name_constraints.as_ref().map(|nc| nc.as_ref()),
        )
    }));
    roots
}
