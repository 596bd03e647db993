use std::{
    fmt::{self, Debug, Formatter},
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use openssl::{
    ssl::{ConnectConfiguration, SslContextBuilder, SslVerifyMode},
    x509::{X509, store::X509StoreBuilder},
};
use serde::Deserialize;
use snafu::ResultExt;

use super::{
    AddCertToStoreSnafu, FileOpenFailedSnafu, FileReadFailedSnafu, MaybeTls,
    NewStoreBuilderSnafu, NoCertificatesSnafu, Result, SetVerifyCertSnafu, X509ParseSnafu,
};

const PEM_START_MARKER: &str = "-----BEGIN ";

/// Standard TLS options for the collector connection.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TlsOptions {
    /// Verify the collector's certificate chain. Defaults to `true`.
    pub verify_certificate: Option<bool>,

    /// Verify that the certificate matches the collector host name.
    /// Defaults to `true`.
    pub verify_hostname: Option<bool>,

    /// PEM or DER file of certificate authorities to trust instead of the
    /// system roots.
    #[serde(alias = "ca_path")]
    pub ca_file: Option<PathBuf>,
}

/// Directly usable settings for TLS connectors
#[derive(Clone)]
pub struct TlsSettings {
    verify_certificate: bool,
    verify_hostname: bool,
    authorities: Vec<X509>,
}

impl TlsSettings {
    /// Generate a filled out settings struct from the given optional
    /// option set. If `options` is `None`, certificates and host names
    /// are verified against the system roots.
    pub fn from_options(options: Option<&TlsOptions>) -> Result<Self> {
        let default = TlsOptions::default();
        let options = options.unwrap_or(&default);

        if options.verify_certificate == Some(false) {
            warn!("`verify_certificate` is DISABLED, this may lead to security vulnerabilities.");
        }
        if options.verify_hostname == Some(false) {
            warn!("`verify_hostname` is DISABLED, this may lead to security vulnerabilities.");
        }

        Ok(Self {
            verify_certificate: options.verify_certificate.unwrap_or(true),
            verify_hostname: options.verify_hostname.unwrap_or(true),
            authorities: options.load_authorities()?,
        })
    }

    pub(super) fn apply_context(&self, context: &mut SslContextBuilder) -> Result<()> {
        context.set_verify(if self.verify_certificate {
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
        } else {
            SslVerifyMode::NONE
        });

        // Without configured authorities the connector keeps OpenSSL's default
        // verify paths, which honor `SSL_CERT_FILE` and `SSL_CERT_DIR`.
        if !self.authorities.is_empty() {
            let mut store = X509StoreBuilder::new().context(NewStoreBuilderSnafu)?;
            for authority in &self.authorities {
                store
                    .add_cert(authority.clone())
                    .context(AddCertToStoreSnafu)?;
            }
            context
                .set_verify_cert_store(store.build())
                .context(SetVerifyCertSnafu)?;
        }

        Ok(())
    }

    pub(super) fn apply_connect_configuration(&self, connection: &mut ConnectConfiguration) {
        connection.set_verify_hostname(self.verify_hostname);
    }
}

impl Debug for TlsSettings {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("verify_certificate", &self.verify_certificate)
            .field("verify_hostname", &self.verify_hostname)
            .field("authorities", &self.authorities.len())
            .finish()
    }
}

impl TlsOptions {
    fn load_authorities(&self) -> Result<Vec<X509>> {
        let Some(filename) = &self.ca_file else {
            return Ok(vec![]);
        };

        let (data, filename) = open_read(filename, "certificate")?;
        let authorities = der_or_pem(
            data,
            |der| X509::from_der(&der).map(|x509| vec![x509]),
            |pem| {
                pem.match_indices(PEM_START_MARKER)
                    .map(|(start, _)| X509::from_pem(&pem.as_bytes()[start..]))
                    .collect()
            },
        )
        .with_context(|_| X509ParseSnafu {
            filename: filename.clone(),
        })?;

        if authorities.is_empty() {
            return NoCertificatesSnafu { filename }.fail();
        }
        Ok(authorities)
    }
}

pub type MaybeTlsSettings = MaybeTls<(), TlsSettings>;

impl MaybeTlsSettings {
    /// Settings for a client connection: TLS with `options` when `enabled`,
    /// a plain TCP stream otherwise.
    pub fn from_config(enabled: bool, options: Option<&TlsOptions>) -> Result<Self> {
        if enabled {
            TlsSettings::from_options(options).map(Self::Tls)
        } else {
            Ok(Self::Raw(()))
        }
    }
}

impl From<TlsSettings> for MaybeTlsSettings {
    fn from(tls: TlsSettings) -> Self {
        Self::Tls(tls)
    }
}

/// Parse the data one way if it looks like a DER file, and the other if
/// it looks like a PEM file. For the content to be treated as PEM, it
/// must parse as valid UTF-8 and contain a PEM start marker.
fn der_or_pem<T>(data: Vec<u8>, der_fn: impl Fn(Vec<u8>) -> T, pem_fn: impl Fn(String) -> T) -> T {
    match String::from_utf8(data) {
        Ok(text) => match text.find(PEM_START_MARKER) {
            Some(_) => pem_fn(text),
            None => der_fn(text.into_bytes()),
        },
        Err(err) => der_fn(err.into_bytes()),
    }
}

/// Open the named file and read its entire contents into memory. If the
/// file "name" contains a PEM start marker, it is assumed to contain
/// inline data and is used directly instead of opening a file.
fn open_read(filename: &Path, note: &'static str) -> Result<(Vec<u8>, PathBuf)> {
    if let Some(inline) = filename.to_str()
        && inline.contains(PEM_START_MARKER)
    {
        return Ok((Vec::from(inline), "inline text".into()));
    }

    let mut text = Vec::<u8>::new();

    File::open(filename)
        .with_context(|_| FileOpenFailedSnafu { note, filename })?
        .read_to_end(&mut text)
        .with_context(|_| FileReadFailedSnafu { note, filename })?;

    Ok((text, filename.into()))
}
