use std::pin::Pin;

use openssl::ssl::{SslConnector, SslMethod};
use snafu::ResultExt;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use super::{
    ConnectConfigurationSnafu, CreateConnectorSnafu, HandshakeSnafu, MaybeTlsSettings,
    MaybeTlsStream, SslStreamSetupSnafu, TlsSettings,
};

impl TlsSettings {
    pub(crate) fn connector(&self) -> super::Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client()).context(CreateConnectorSnafu)?;
        self.apply_context(&mut builder)?;
        Ok(builder.build())
    }
}

impl MaybeTlsSettings {
    /// Wraps an established TCP stream, running the client handshake
    /// against `host` when TLS is enabled.
    pub(crate) async fn connect(
        &self,
        host: &str,
        stream: TcpStream,
    ) -> super::Result<MaybeTlsStream<TcpStream>> {
        match self {
            Self::Raw(()) => Ok(MaybeTlsStream::Raw(stream)),
            Self::Tls(tls) => {
                let connector = tls.connector()?;
                let mut config = connector.configure().context(ConnectConfigurationSnafu)?;
                tls.apply_connect_configuration(&mut config);
                let ssl = config.into_ssl(host).context(ConnectConfigurationSnafu)?;

                let mut stream = SslStream::new(ssl, stream).context(SslStreamSetupSnafu)?;
                Pin::new(&mut stream).connect().await.context(HandshakeSnafu)?;

                debug!(message = "Negotiated TLS.", host = %host);
                Ok(MaybeTlsStream::Tls(stream))
            }
        }
    }
}
