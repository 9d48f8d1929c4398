//! Reproduction driver
//!
//! Starts the authenticating server, writes the payload and repeats an
//! unauthenticated upload with a given body strategy. Every attempt is
//! expected to come back as `401`.

use crate::body::BodyStrategy;
use crate::config::HarnessConfig;
use crate::fixture::UploadFixture;
use crate::http::{AuthServer, Status, UploadClient, UploadOutcome, UploadRequest};
use crate::{Error, Result};

/// Server, client and payload for a run
pub struct Harness {
    config: HarnessConfig,
    fixture: UploadFixture,
    client: UploadClient,
    // Kept last so the server outlives in-flight uploads during drop.
    server: AuthServer,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;

        let server = AuthServer::start(config.server_config())?;
        let fixture = UploadFixture::create(config.fixture_size)?;
        let client = UploadClient::new(server.local_addr(), config.response_timeout);

        Ok(Harness {
            config,
            fixture,
            client,
            server,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn fixture(&self) -> &UploadFixture {
        &self.fixture
    }

    pub fn server(&self) -> &AuthServer {
        &self.server
    }

    /// Upload the fixture once with `request`
    pub fn upload(&self, request: &UploadRequest, strategy: BodyStrategy) -> Result<UploadOutcome> {
        let body = strategy.open(self.fixture.path(), self.config.chunk_size)?;
        Ok(self.client.upload(request, body)?)
    }

    /// Repeat the unauthenticated upload and collect the statuses
    pub fn run(&self, strategy: BodyStrategy) -> Result<Vec<Status>> {
        let request = UploadRequest::put("/");
        let mut statuses = Vec::with_capacity(self.config.iterations);

        for iteration in 0..self.config.iterations {
            let outcome = self.upload(&request, strategy)?;
            tracing::info!(
                %strategy,
                iteration,
                status = outcome.status.code(),
                bytes_sent = outcome.bytes_sent,
                aborted = outcome.aborted,
                "upload finished"
            );
            statuses.push(outcome.status);
        }

        Ok(statuses)
    }

    /// Like `run`, failing on the first status other than `401`
    pub fn run_and_verify(&self, strategy: BodyStrategy) -> Result<Vec<Status>> {
        let statuses = self.run(strategy)?;
        if let Some((iteration, status)) = statuses
            .iter()
            .enumerate()
            .find(|(_, status)| **status != Status::UNAUTHORIZED)
        {
            return Err(Error::UnexpectedStatus {
                iteration,
                expected: Status::UNAUTHORIZED.code(),
                actual: status.code(),
            });
        }
        Ok(statuses)
    }
}
