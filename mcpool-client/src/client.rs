//! # Client API
//!
//! Purpose: Expose one typed async method per memcached verb on top of the
//! connection pools.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling, pipelining and framing.
//! 2. **Validate First**: Keys are checked before a connection is borrowed.
//! 3. **Never Reuse Broken State**: Any failure marks the lease corrupted, so
//!    the pool discards the connection instead of handing it out again.
//! 4. **Lazy Connects**: Construction never touches the network; the pools
//!    open connections on first use.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use mcpool_common::{
    validate_key, validate_keys, CasResult, Expiry, Item, StorageOptions, ValidationError,
    ValidationResult,
};

use crate::command::{
    item_channel, AddCommand, AppendCommand, ArithmeticCommand, CasCommand, Command,
    DeleteCommand, ItemStream, MultiGetCommand, PrependCommand, ReplaceCommand,
    RetrievalCommand, RetrievalVerb, SetCommand, TouchCommand,
};
use crate::connection::{Connection, ConnectionState};
use crate::error::{ClientError, ClientResult};
use crate::pool::{
    self, Lease, PipelinedLease, PipelinedPool, PipelinedPoolOptions, Pool, PoolOptions,
    Validator,
};

/// Port used when the endpoint does not name one.
pub const DEFAULT_PORT: u16 = 11211;

/// Items buffered between a multi-get reader and its consumer.
const MULTI_GET_BUFFER: usize = 16;

/// Configuration for [`Client`].
///
/// Every field has a default, so a partial JSON/TOML document deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address as `host[:port]`, e.g. `"127.0.0.1:11211"`.
    pub endpoint: String,
    /// Connect timeout in milliseconds; `0` waits indefinitely.
    pub connect_timeout_ms: u64,
    /// Per-read receive timeout in milliseconds; `0` waits indefinitely.
    pub receive_timeout_ms: u64,
    /// Upper bound on open connections.
    pub max_connections: usize,
    /// Requests pipelined on one connection. Only used with pipelining.
    pub max_concurrent_requests_per_connection: usize,
    /// Share connections between concurrent requests.
    pub enable_pipelining: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            endpoint: format!("127.0.0.1:{DEFAULT_PORT}"),
            connect_timeout_ms: 2000,
            receive_timeout_ms: 2000,
            max_connections: 2,
            max_concurrent_requests_per_connection: 15,
            enable_pipelining: true,
        }
    }
}

impl ClientConfig {
    /// Checks value ranges and the endpoint syntax.
    pub fn validate(&self) -> ValidationResult<()> {
        Endpoint::parse(&self.endpoint)?;
        if self.max_connections < 1 {
            return Err(ValidationError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.enable_pipelining && self.max_concurrent_requests_per_connection < 1 {
            return Err(ValidationError::InvalidConfig(
                "max_concurrent_requests_per_connection must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        millis(self.receive_timeout_ms)
    }
}

fn millis(ms: u64) -> Option<Duration> {
    match ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    }
}

/// A parsed `host[:port]` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parses `host`, `host:port`, `ip`, `ip:port` or `[ipv6]:port`.
    pub fn parse(endpoint: &str) -> ValidationResult<Self> {
        let invalid = || ValidationError::InvalidEndpoint(endpoint.to_string());
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(invalid());
        }

        // A bare IPv6 literal has several colons and no port.
        if let Ok(ip) = endpoint.parse::<IpAddr>() {
            return Ok(Endpoint {
                host: ip.to_string(),
                port: DEFAULT_PORT,
            });
        }

        let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail {
                "" => (host, None),
                tail => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match endpoint.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (endpoint, None),
            }
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves to a socket address. IP literals skip the resolver; host
    /// names use the first address returned.
    pub async fn resolve(&self) -> ClientResult<SocketAddr> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port)).await?;
        addrs.next().ok_or_else(|| {
            ClientError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {}", self.host),
            ))
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

enum ClientPool {
    Exclusive(Pool<Connection>),
    Pipelined(PipelinedPool<Connection>),
}

impl ClientPool {
    async fn borrow(&self) -> ClientResult<ClientLease> {
        match self {
            ClientPool::Exclusive(pool) => pool.borrow().await.map(ClientLease::Exclusive),
            ClientPool::Pipelined(pool) => pool.borrow().await.map(ClientLease::Pipelined),
        }
    }

    fn dispose(&self) {
        match self {
            ClientPool::Exclusive(pool) => pool.dispose(),
            ClientPool::Pipelined(pool) => pool.dispose(),
        }
    }
}

enum ClientLease {
    Exclusive(Lease<Connection>),
    Pipelined(PipelinedLease<Connection>),
}

impl ClientLease {
    fn mark_corrupted(&mut self) {
        match self {
            ClientLease::Exclusive(lease) => lease.mark_corrupted(),
            ClientLease::Pipelined(lease) => lease.mark_corrupted(),
        }
    }
}

impl Deref for ClientLease {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            ClientLease::Exclusive(lease) => &**lease,
            ClientLease::Pipelined(lease) => &**lease,
        }
    }
}

struct ClientInner {
    endpoint: Endpoint,
    pool: ClientPool,
}

/// Async memcached client.
///
/// Cheap to clone; clones share the same pool. Every call borrows a
/// connection, executes one command, and returns the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a client for `endpoint` with default configuration.
    pub fn connect(endpoint: impl Into<String>) -> ClientResult<Self> {
        Self::with_config(ClientConfig {
            endpoint: endpoint.into(),
            ..ClientConfig::default()
        })
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let endpoint = Endpoint::parse(&config.endpoint)?;
        let connect_timeout = config.connect_timeout();
        let receive_timeout = config.receive_timeout();

        let target = endpoint.clone();
        let factory = pool::factory(move || {
            let target = target.clone();
            async move {
                let addr = target.resolve().await?;
                Connection::connect(addr, connect_timeout, receive_timeout).await
            }
        });
        let validator: Validator<Connection> =
            Arc::new(|connection: &Connection| connection.state() == ConnectionState::Open);

        let pool = if config.enable_pipelining {
            ClientPool::Pipelined(PipelinedPool::new(
                factory,
                Some(validator),
                PipelinedPoolOptions {
                    target_item_count: config.max_connections,
                    max_requests_per_item: config.max_concurrent_requests_per_connection,
                },
            ))
        } else {
            ClientPool::Exclusive(Pool::new(
                factory,
                Some(validator),
                PoolOptions {
                    max_count: config.max_connections,
                },
            ))
        };
        debug!(
            endpoint = %endpoint,
            pipelining = config.enable_pipelining,
            max_connections = config.max_connections,
            "client created"
        );

        Ok(Client {
            inner: Arc::new(ClientInner { endpoint, pool }),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Fetches a value. The returned item carries no CAS token.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub async fn get(&self, key: &str) -> ClientResult<Option<Item>> {
        validate_key(key)?;
        self.execute(RetrievalCommand::get(key)).await
    }

    /// Fetches a value together with its CAS token.
    pub async fn gets(&self, key: &str) -> ClientResult<Option<Item>> {
        validate_key(key)?;
        self.execute(RetrievalCommand::gets(key)).await
    }

    /// Fetches several keys with one request. Missing keys are skipped.
    ///
    /// Items are streamed as they arrive; a failure part-way through is
    /// yielded as the last element of the stream.
    pub async fn get_many<I, S>(&self, keys: I) -> ClientResult<ItemStream>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retrieve_many(RetrievalVerb::Get, keys).await
    }

    /// Like [`Client::get_many`], with CAS tokens.
    pub async fn gets_many<I, S>(&self, keys: I) -> ClientResult<ItemStream>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retrieve_many(RetrievalVerb::Gets, keys).await
    }

    /// Stores a value unconditionally.
    pub async fn set(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        options: StorageOptions,
    ) -> ClientResult<()> {
        validate_key(key)?;
        self.execute(SetCommand::new(key, data, options)).await
    }

    /// Stores a value only if the key is absent. Returns false otherwise.
    pub async fn add(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        options: StorageOptions,
    ) -> ClientResult<bool> {
        validate_key(key)?;
        self.execute(AddCommand::new(key, data, options)).await
    }

    /// Stores a value only if the key exists. Returns false otherwise.
    pub async fn replace(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        options: StorageOptions,
    ) -> ClientResult<bool> {
        validate_key(key)?;
        self.execute(ReplaceCommand::new(key, data, options)).await
    }

    /// Appends bytes to an existing value. Flags and expiry are ignored by
    /// the server.
    pub async fn append(&self, key: &str, data: impl Into<Bytes>) -> ClientResult<bool> {
        validate_key(key)?;
        self.execute(AppendCommand::new(key, data, StorageOptions::default()))
            .await
    }

    /// Prepends bytes to an existing value.
    pub async fn prepend(&self, key: &str, data: impl Into<Bytes>) -> ClientResult<bool> {
        validate_key(key)?;
        self.execute(PrependCommand::new(key, data, StorageOptions::default()))
            .await
    }

    /// Stores a value only if it is unchanged since `cas` was read.
    pub async fn cas(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        options: StorageOptions,
        cas: u64,
    ) -> ClientResult<CasResult> {
        validate_key(key)?;
        self.execute(CasCommand::new(key, data, options, cas)).await
    }

    /// Adds `delta` to a decimal counter. `Ok(None)` when the key is missing.
    pub async fn increment(&self, key: &str, delta: u64) -> ClientResult<Option<u64>> {
        validate_key(key)?;
        self.execute(ArithmeticCommand::increment(key, delta)).await
    }

    /// Subtracts `delta` from a decimal counter; the server clamps at zero.
    pub async fn decrement(&self, key: &str, delta: u64) -> ClientResult<Option<u64>> {
        validate_key(key)?;
        self.execute(ArithmeticCommand::decrement(key, delta)).await
    }

    /// Removes a value. Returns true when one was removed.
    pub async fn delete(&self, key: &str) -> ClientResult<bool> {
        validate_key(key)?;
        self.execute(DeleteCommand::new(key)).await
    }

    /// Updates a value's expiry. Returns false when the key is missing.
    pub async fn touch(&self, key: &str, expiry: Expiry) -> ClientResult<bool> {
        validate_key(key)?;
        self.execute(TouchCommand::new(key, expiry)).await
    }

    /// Closes pooled connections. Later calls fail with
    /// [`ClientError::Disposed`].
    pub fn dispose(&self) {
        debug!(endpoint = %self.inner.endpoint, "client disposed");
        self.inner.pool.dispose();
    }

    async fn execute<C: Command>(&self, command: C) -> ClientResult<C::Output> {
        let mut lease = self.inner.pool.borrow().await?;
        let result = lease.execute(command).await;
        if result.is_err() {
            lease.mark_corrupted();
        }
        result
    }

    async fn retrieve_many<I, S>(&self, verb: RetrievalVerb, keys: I) -> ClientResult<ItemStream>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        validate_keys(&keys)?;

        let mut lease = self.inner.pool.borrow().await?;
        let (tx, stream) = item_channel(MULTI_GET_BUFFER);
        let command = MultiGetCommand::new(verb, keys, tx.clone());
        tokio::spawn(async move {
            let result = lease.execute(command).await;
            if let Err(err) = result {
                lease.mark_corrupted();
                // The consumer may already be gone.
                let _ = tx.send(Err(err)).await;
            }
        });
        Ok(stream)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.endpoint)
            .finish()
    }
}
