//! `TestRunner`: the harness surface test suites use.
//!
//! ```ignore
//! let mut runner = TestRunner::set_up(load_config()?, SetUpOptions::default()).await?;
//! let outcome = runner.run(&stubs, &definition, &json!({}), RunOptions::default()).await?;
//! runner.clean_up().await;
//! runner.tear_down().await;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use sfn_tester_api::{StepFunctionsClient, WorkflowEngine};
use sfn_tester_types::{CallStubs, RunOutcome};
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::driver::{CleanupReport, DriverSettings, ExecutionDriver, RunOptions};
use crate::environment::{DockerComposeEnvironment, EnvironmentProvisioner};
use crate::error::HarnessError;
use crate::ledger::StubLedger;
use crate::store::{RedisStore, SharedStore};
use crate::worker::{MockWorker, MockWorkerServer, RunningMockWorkerServer};

/// Options for [`TestRunner::set_up`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetUpOptions {
    /// IPv4 address base of the container network, for example `240.10.2.0`.
    pub environment_address_base: Option<String>,
}

/// Owns the environment, the mock worker server and the execution driver.
pub struct TestRunner {
    config: HarnessConfig,
    environment: Option<Box<dyn EnvironmentProvisioner>>,
    worker_server: Option<RunningMockWorkerServer>,
    driver: ExecutionDriver,
}

impl TestRunner {
    /// Bring up the containerised engine and store, connect to both and start
    /// the mock worker server.
    pub async fn set_up(config: HarnessConfig, options: SetUpOptions) -> Result<Self, HarnessError> {
        let environment = DockerComposeEnvironment::new(config.clone(), options.environment_address_base.as_deref())?;
        environment.start().await?;

        match Self::connect(&config).await {
            Ok((engine, store, worker_server)) => {
                let mut runner = Self::with_components(config, engine, store);
                runner.environment = Some(Box::new(environment));
                runner.worker_server = Some(worker_server);
                info!("harness set up");
                Ok(runner)
            }
            Err(error) => {
                if let Err(stop_error) = environment.stop().await {
                    warn!(error = %stop_error, "could not stop environment after a failed set up");
                }
                Err(error)
            }
        }
    }

    async fn connect(
        config: &HarnessConfig,
    ) -> Result<(Arc<dyn WorkflowEngine>, Arc<dyn SharedStore>, RunningMockWorkerServer), HarnessError> {
        let client = StepFunctionsClient::new(&config.step_functions_endpoint(), &config.region)?;
        client.ping().await?;

        let store: Arc<dyn SharedStore> = Arc::new(RedisStore::connect(&config.redis_url()).await?);
        store.ping().await?;

        let bind_address: SocketAddr = config
            .worker_bind_address()
            .parse()
            .map_err(|error| HarnessError::WorkerServer(format!("invalid bind address '{}': {error}", config.worker_bind_address())))?;
        let ledger = StubLedger::new(Arc::clone(&store), config.namespace.clone());
        let worker = MockWorker::with_identity_key(ledger, config.identity_key.clone());
        let worker_server = MockWorkerServer::new(bind_address, worker)
            .start()
            .await
            .map_err(|error| HarnessError::WorkerServer(error.to_string()))?;

        Ok((Arc::new(client), store, worker_server))
    }

    /// Runner over already-running components. Nothing is provisioned and no
    /// worker server is started; `tear_down` only cleans up.
    pub fn with_components(config: HarnessConfig, engine: Arc<dyn WorkflowEngine>, store: Arc<dyn SharedStore>) -> Self {
        let ledger = StubLedger::new(store, config.namespace.clone());
        let driver = ExecutionDriver::new(engine, ledger, config.rewriter(), DriverSettings::from_config(&config));
        Self {
            config,
            environment: None,
            worker_server: None,
            driver,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn driver(&self) -> &ExecutionDriver {
        &self.driver
    }

    pub fn ledger(&self) -> &StubLedger {
        self.driver.ledger()
    }

    /// Address the mock worker server is bound to, once set up.
    pub fn worker_address(&self) -> Option<SocketAddr> {
        self.worker_server.as_ref().map(RunningMockWorkerServer::bound_address)
    }

    /// Default options for this runner's configuration.
    pub fn run_options(&self) -> RunOptions {
        RunOptions::from_config(&self.config)
    }

    pub async fn run(
        &mut self,
        stubs: &CallStubs,
        definition: &Value,
        input: &Value,
        options: RunOptions,
    ) -> Result<RunOutcome, HarnessError> {
        self.driver.run(stubs, definition, input, &options).await
    }

    pub async fn clean_up(&mut self) -> CleanupReport {
        self.driver.clean_up().await
    }

    /// Clean up, stop the worker server and stop the environment. Failures are
    /// logged and do not stop the remaining steps.
    pub async fn tear_down(mut self) {
        let report = self.driver.clean_up().await;
        if !report.is_clean() {
            warn!(failures = ?report.failures, "cleanup during tear down was incomplete");
        }

        if let Some(worker_server) = self.worker_server.take()
            && let Err(error) = worker_server.stop().await
        {
            warn!(%error, "mock worker server did not stop cleanly");
        }

        if let Some(environment) = self.environment.take()
            && let Err(error) = environment.stop().await
        {
            warn!(%error, "environment did not stop cleanly");
        }
        info!("harness torn down");
    }
}
