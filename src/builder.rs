use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::net::sniffer::Sniffer;
use crate::net::socket::Socket;
use crate::packet::Codec;
use std::sync::Arc;
use std::time::Duration;

/// A builder for creating instances of `Engine`.
///
/// # Examples
///
/// Trace the path to a host with the default configuration:
///
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// use pathprobe::{Builder, IcmpCodec, OptionValue, Options, SocketImpl, SocketSniffer};
/// use std::sync::Arc;
///
/// let codec = Arc::new(IcmpCodec::default());
/// let sniffer = Box::new(SocketSniffer::<SocketImpl>::new(codec.clone()));
/// let mut engine = Builder::new().build::<SocketImpl>(codec, sniffer)?;
/// pathprobe::register_traceroute(&mut engine);
/// let options = Options::new().with("dst-ip", OptionValue::Str(String::from("1.1.1.1")));
/// engine.run_instance("traceroute", &options, None)?;
/// engine.run_with(|instance, event| println!("{instance}: {event:?}"))?;
/// # Ok(())
/// # }
/// ```
///
/// # See Also
///
/// - [`Engine`] - The probe lifecycle engine.
#[derive(Debug, Default)]
pub struct Builder {
    config: EngineConfig,
}

impl Builder {
    /// Initializes a new `Builder` with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the engine-wide probe timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the maximum number of probes transmitted per loop pass.
    #[must_use]
    pub fn send_batch(mut self, send_batch: usize) -> Self {
        self.config.send_batch = send_batch;
        self
    }

    /// Sets the upper bound on a single capture wait.
    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.config.poll_interval = poll_interval;
        self
    }

    /// Sets the capacity of the send queue.
    #[must_use]
    pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.send_queue_capacity = capacity;
        self
    }

    /// Sets the capacity of the receive queue.
    #[must_use]
    pub fn reply_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.reply_queue_capacity = capacity;
        self
    }

    /// Validate the configuration and build the `Engine`.
    ///
    /// The engine consumes the packet layer through `codec` and the capture
    /// layer through `sniffer`; the socket type `S` provides the sending
    /// endpoints.
    pub fn build<S: Socket>(
        self,
        codec: Arc<dyn Codec>,
        sniffer: Box<dyn Sniffer>,
    ) -> Result<Engine<S>> {
        if self.config.send_batch == 0 {
            return Err(Error::BadConfig(String::from(
                "send-batch must be at least 1",
            )));
        }
        if self.config.send_queue_capacity == 0 || self.config.reply_queue_capacity == 0 {
            return Err(Error::BadConfig(String::from(
                "queue capacity must be at least 1",
            )));
        }
        tracing::debug!(config = ?self.config);
        Ok(Engine::new(self.config, codec, sniffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults;
    use crate::sim::{FakeCodec, FakeSniffer, FakeSocket, World};
    use std::rc::Rc;
    use test_case::test_case;

    fn build(builder: Builder) -> Result<Engine<FakeSocket>> {
        let world = World::new();
        builder.build::<FakeSocket>(
            Arc::new(FakeCodec),
            Box::new(FakeSniffer::new(Rc::clone(&world))),
        )
    }

    #[test]
    fn test_defaults() {
        let engine = build(Builder::new()).unwrap();
        assert_eq!(defaults::DEFAULT_TIMEOUT, engine.timeout());
    }

    #[test]
    fn test_timeout_setter() {
        let engine = build(Builder::new().timeout(Duration::from_secs(7))).unwrap();
        assert_eq!(Duration::from_secs(7), engine.timeout());
    }

    #[test_case(Builder::new().send_batch(0); "zero send batch")]
    #[test_case(Builder::new().send_queue_capacity(0); "zero send queue capacity")]
    #[test_case(Builder::new().reply_queue_capacity(0); "zero reply queue capacity")]
    fn test_invalid_config(builder: Builder) {
        let err = build(builder).unwrap_err();
        assert!(matches!(err, Error::BadConfig(_)));
    }
}
