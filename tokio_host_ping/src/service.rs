use crate::configuration::PingConfiguration;
use crate::ping::icmp::IcmpTransport;
use crate::ping::{report, PingError};
use crate::resolver::{HostResolver, ResolvedAddress};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Resolves a host, sends it one echo request and reports the round trip time.
///
/// Every ping opens its own transport, so concurrent pings share nothing but the
/// resolver handle.
#[derive(Debug, Clone)]
pub struct Pinger {
    resolver: HostResolver,
    conf: PingConfiguration,
}

impl Pinger {
    pub fn new(conf: PingConfiguration) -> Self {
        Self {
            resolver: HostResolver::new(conf.resolution_timeout),
            conf,
        }
    }

    pub fn with_resolver(resolver: HostResolver, conf: PingConfiguration) -> Self {
        Self { resolver, conf }
    }

    /// Default configuration on top of the process wide resolver.
    pub fn shared() -> Self {
        Self::with_resolver(HostResolver::shared(), PingConfiguration::default())
    }

    pub fn configuration(&self) -> &PingConfiguration {
        &self.conf
    }

    pub fn resolver(&self) -> &HostResolver {
        &self.resolver
    }

    pub async fn ping(&self, host: &str) -> Result<Duration, PingError> {
        self.ping_with_resolution(host, |_| ()).await
    }

    /// Same as `ping`, calling `on_resolved` with the target before the request leaves.
    /// `on_resolved` is never called when resolution fails.
    pub async fn ping_with_resolution<F>(
        &self,
        host: &str,
        on_resolved: F,
    ) -> Result<Duration, PingError>
    where
        F: FnOnce(&ResolvedAddress),
    {
        let address = self.resolver.resolve_family(host, self.conf.family).await?;
        on_resolved(&address);
        self.ping_address(&address).await
    }

    pub async fn ping_address(&self, address: &ResolvedAddress) -> Result<Duration, PingError> {
        let mut transport = IcmpTransport::connect(address, &self.conf)?;
        let packet = transport.echo_packet()?;
        let result = transport.send(packet).await;
        transport.stop();
        debug!("Ping {}: {:?}", address, result);
        result
    }

    /// Runs a ping in the background and hands `(success, elapsed seconds)` to `handler`.
    pub fn ping_with_handler<H>(&self, host: impl Into<String>, handler: H) -> JoinHandle<()>
    where
        H: FnOnce(bool, f64) + Send + 'static,
    {
        self.ping_with_handlers(host, |_| (), handler)
    }

    /// Like `ping_with_handler`, `resolution` first receiving the raw resolved address.
    pub fn ping_with_handlers<R, H>(
        &self,
        host: impl Into<String>,
        resolution: R,
        handler: H,
    ) -> JoinHandle<()>
    where
        R: FnOnce(Box<[u8]>) + Send + 'static,
        H: FnOnce(bool, f64) + Send + 'static,
    {
        let pinger = self.clone();
        let host = host.into();
        tokio::spawn(async move {
            let result = pinger
                .ping_with_resolution(&host, |address| resolution(address.raw()))
                .await;
            let (success, elapsed) = report(&result);
            handler(success, elapsed);
        })
    }
}

/// Pings `host` with the shared pinger. Must be called from within a tokio runtime.
pub fn ping<H>(host: impl Into<String>, handler: H) -> JoinHandle<()>
where
    H: FnOnce(bool, f64) + Send + 'static,
{
    Pinger::shared().ping_with_handler(host, handler)
}

/// Pings `host` with the shared pinger, reporting the resolved address first.
pub fn ping_with_resolution<R, H>(
    host: impl Into<String>,
    resolution: R,
    handler: H,
) -> JoinHandle<()>
where
    R: FnOnce(Box<[u8]>) + Send + 'static,
    H: FnOnce(bool, f64) + Send + 'static,
{
    Pinger::shared().ping_with_handlers(host, resolution, handler)
}
