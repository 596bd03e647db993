use std::{
    io,
    path::PathBuf,
    pin::Pin,
    task::{Context, Poll},
};

use openssl::error::ErrorStack;
use snafu::Snafu;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_openssl::SslStream;

mod outgoing;
mod settings;

pub use settings::{MaybeTlsSettings, TlsOptions, TlsSettings};

pub type Result<T> = std::result::Result<T, TlsError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TlsError {
    #[snafu(display("Could not open {} file {:?}: {}", note, filename, source))]
    FileOpenFailed {
        note: &'static str,
        filename: PathBuf,
        source: io::Error,
    },
    #[snafu(display("Could not read {} file {:?}: {}", note, filename, source))]
    FileReadFailed {
        note: &'static str,
        filename: PathBuf,
        source: io::Error,
    },
    #[snafu(display("Could not parse X509 certificate in {:?}: {}", filename, source))]
    X509ParseError {
        filename: PathBuf,
        source: ErrorStack,
    },
    #[snafu(display("No certificates found in {:?}", filename))]
    NoCertificates { filename: PathBuf },
    #[snafu(display("Could not build certificate store: {}", source))]
    NewStoreBuilder { source: ErrorStack },
    #[snafu(display("Could not add certificate to store: {}", source))]
    AddCertToStore { source: ErrorStack },
    #[snafu(display("Could not set verify certificate store: {}", source))]
    SetVerifyCert { source: ErrorStack },
    #[snafu(display("Could not create TLS connector: {}", source))]
    CreateConnector { source: ErrorStack },
    #[snafu(display("Could not configure TLS connection: {}", source))]
    ConnectConfiguration { source: ErrorStack },
    #[snafu(display("Could not set up TLS stream: {}", source))]
    SslStreamSetup { source: ErrorStack },
    #[snafu(display("TLS handshake failed: {}", source))]
    Handshake { source: openssl::ssl::Error },
}

/// Either a plain value or its TLS counterpart.
#[derive(Clone, Debug)]
pub enum MaybeTls<R, T> {
    Raw(R),
    Tls(T),
}

impl<R, T> MaybeTls<R, T> {
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

pub type MaybeTlsStream<S> = MaybeTls<S, SslStream<S>>;

impl<S> MaybeTlsStream<S> {
    /// The underlying transport, beneath any TLS session.
    pub fn get_ref(&self) -> &S {
        match self {
            Self::Raw(s) => s,
            Self::Tls(s) => s.get_ref(),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for MaybeTlsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for MaybeTlsStream<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use openssl::{
        asn1::Asn1Time,
        bn::BigNum,
        hash::MessageDigest,
        pkey::{PKey, Private},
        rsa::Rsa,
        ssl::{Ssl, SslAcceptor, SslMethod},
        x509::{X509, X509NameBuilder},
    };
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    pub(crate) fn self_signed() -> (PKey<Private>, X509) {
        let pkey = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "localhost").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(1).unwrap())
            .unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();

        (pkey, builder.build())
    }

    #[tokio::test]
    async fn handshake_and_write_over_tls() {
        let (pkey, cert) = self_signed();
        let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
        acceptor.set_private_key(&pkey).unwrap();
        acceptor.set_certificate(&cert).unwrap();
        let acceptor = acceptor.build();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ssl = Ssl::new(acceptor.context()).unwrap();
            let mut stream = SslStream::new(ssl, stream).unwrap();
            Pin::new(&mut stream).accept().await.unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).await.unwrap();
            line
        });

        let options = TlsOptions {
            verify_certificate: Some(false),
            verify_hostname: Some(false),
            ca_file: None,
        };
        let settings = MaybeTlsSettings::from_config(true, Some(&options)).unwrap();
        let tcp = TcpStream::connect(addr).await.unwrap();
        let mut stream = settings.connect("localhost", tcp).await.unwrap();
        assert!(stream.is_tls());

        stream.write_all(b"hello over tls\n").await.unwrap();
        stream.flush().await.unwrap();

        assert_eq!(server.await.unwrap(), "hello over tls\n");
    }

    #[tokio::test]
    async fn handshake_rejects_untrusted_certificate() {
        let (pkey, cert) = self_signed();
        let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
        acceptor.set_private_key(&pkey).unwrap();
        acceptor.set_certificate(&cert).unwrap();
        let acceptor = acceptor.build();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ssl = Ssl::new(acceptor.context()).unwrap();
            let mut stream = SslStream::new(ssl, stream).unwrap();
            let _ = Pin::new(&mut stream).accept().await;
        });

        let settings = MaybeTlsSettings::from_config(true, None).unwrap();
        let tcp = TcpStream::connect(addr).await.unwrap();
        let error = settings.connect("localhost", tcp).await.unwrap_err();
        assert!(matches!(error, TlsError::Handshake { .. }));
    }
}
