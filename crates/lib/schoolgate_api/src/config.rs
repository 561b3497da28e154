//! API server configuration.

/// Configuration for the HTTP layer.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// Number of reverse proxies in front of the server that append to
    /// `X-Forwarded-For`. With `0` the header is ignored and the TCP peer is
    /// the client address.
    pub trusted_proxy_hops: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3100".into(),
            trusted_proxy_hops: 0,
        }
    }
}
