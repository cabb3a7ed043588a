use super::{
    clock::{Clock, SystemClock},
    config::{Config, DEFAULT_TIMEOUT},
    emf::EmfSubmitter,
    emitter::{BatchEmitter, ClientConfig, FailurePolicy, Submit},
    instrumentation::Instrumentation,
    store::{CounterStore, MemoryStore},
    Error,
};
use std::sync::Arc;
use std::time::Duration;

/// Factory for the submission client, given the region and timeouts it must honour
pub type ClientBuilder = Box<dyn FnOnce(&ClientConfig) -> Result<Box<dyn Submit>, Error> + Send>;

/// Builder for the [Instrumentation] facade
///
/// # Example
/// ```
///  let instrumentation = metrics_cloudwatch_meters::Builder::new()
///      .cloudwatch_namespace("MyApplication")
///      .region("us-west-2")
///      .build()
///      .unwrap();
/// ```
pub struct Builder {
    cloudwatch_namespace: Option<String>,
    region: Option<String>,
    connect_timeout: Duration,
    read_timeout: Duration,
    storage: Option<Arc<dyn CounterStore>>,
    client_builder: Option<ClientBuilder>,
    clock: Option<Arc<dyn Clock>>,
    failure_policy: FailurePolicy,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            cloudwatch_namespace: None,
            region: None,
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            storage: None,
            client_builder: None,
            clock: None,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Sets the CloudWatch namespace for all metrics
    /// * Must be set or build() will return Err(InvalidConfiguration)
    pub fn cloudwatch_namespace(self, namespace: impl Into<String>) -> Self {
        Self {
            cloudwatch_namespace: Some(namespace.into()),
            ..self
        }
    }

    /// Sets the region handed to the client builder
    /// * Must be set or build() will return Err(InvalidConfiguration)
    pub fn region(self, region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..self
        }
    }

    /// Defaults to one second
    pub fn connect_timeout(self, connect_timeout: Duration) -> Self {
        Self { connect_timeout, ..self }
    }

    /// Defaults to one second
    pub fn read_timeout(self, read_timeout: Duration) -> Self {
        Self { read_timeout, ..self }
    }

    /// Take namespace, region and timeouts from a [Config]
    pub fn with_config(self, config: Config) -> Self {
        Self {
            cloudwatch_namespace: Some(config.namespace),
            region: Some(config.region),
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            ..self
        }
    }

    /// Counter store for meters, defaults to a process-local [MemoryStore]
    pub fn storage(self, storage: impl CounterStore + 'static) -> Self {
        Self {
            storage: Some(Arc::new(storage)),
            ..self
        }
    }

    /// Builds the submission client, defaults to [EmfSubmitter::stdout]
    pub fn client_builder<F, S>(self, client_builder: F) -> Self
    where
        F: FnOnce(&ClientConfig) -> S + Send + 'static,
        S: Submit + 'static,
    {
        self.try_client_builder(move |config: &ClientConfig| Ok(client_builder(config)))
    }

    /// Like [Builder::client_builder] for clients that can fail to build, the error is returned
    /// from build()
    pub fn try_client_builder<F, S>(self, client_builder: F) -> Self
    where
        F: FnOnce(&ClientConfig) -> Result<S, Error> + Send + 'static,
        S: Submit + 'static,
    {
        Self {
            client_builder: Some(Box::new(move |config: &ClientConfig| {
                Ok(Box::new(client_builder(config)?) as Box<dyn Submit>)
            })),
            ..self
        }
    }

    /// Time source for periods and timestamps, defaults to [SystemClock]
    ///
    /// A store passed to [Builder::storage] keeps the clock it was built with.
    pub fn clock(self, clock: impl Clock + 'static) -> Self {
        Self {
            clock: Some(Arc::new(clock)),
            ..self
        }
    }

    /// What to do with the remaining batches of a put or flush once one fails
    pub fn failure_policy(self, failure_policy: FailurePolicy) -> Self {
        Self { failure_policy, ..self }
    }

    /// Private helper for consuming the builder into validated configuration
    fn config(&mut self) -> Result<Config, Error> {
        let config = Config {
            namespace: self
                .cloudwatch_namespace
                .take()
                .ok_or_else(|| Error::InvalidConfiguration("cloudwatch_namespace missing".to_owned()))?,
            region: self
                .region
                .take()
                .ok_or_else(|| Error::InvalidConfiguration("region missing".to_owned()))?,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and build the facade
    pub fn build(mut self) -> Result<Instrumentation, Error> {
        let config = self.config()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStore::new(clock.clone())));
        let client: Box<dyn Submit> = match self.client_builder {
            Some(client_builder) => client_builder(&config.client_config())?,
            None => Box::new(EmfSubmitter::stdout()),
        };
        let emitter = BatchEmitter::new(config.namespace, client).with_policy(self.failure_policy);

        Ok(Instrumentation::new(storage, emitter, clock))
    }

    /// Build the facade and install its [Recorder](super::Recorder) as the global `metrics` recorder
    pub fn init(self) -> Result<Instrumentation, Error> {
        let instrumentation = self.build()?;
        metrics::set_global_recorder(instrumentation.recorder()).map_err(|_| Error::SetRecorder)?;
        Ok(instrumentation)
    }
}
