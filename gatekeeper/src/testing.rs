//! In-memory doubles for the outbound seams, shared by unit tests.

use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;

use crate::aws::{AwsError, BuildService, ParameterStore, StartBuildInput, StartedBuild};
use crate::github::{MetaError, MetadataSource};

/// Parameter store returning a fixed token, or failing.
pub struct StaticParameterStore {
    pub token: Option<String>,
    pub requested: Mutex<Vec<String>>,
}

impl StaticParameterStore {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            token: None,
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ParameterStore for StaticParameterStore {
    async fn get_secret(&self, name: &str) -> Result<String, AwsError> {
        self.requested.lock().unwrap().push(name.to_string());
        self.token.clone().ok_or_else(|| AwsError::Service {
            service: "ssm".to_string(),
            status: 400,
            code: "ParameterNotFound".to_string(),
            message: format!("{name} not found"),
        })
    }
}

/// Metadata source returning fixed ranges, or a non-success status.
pub struct StaticMetadata {
    pub ranges: Option<Vec<String>>,
    pub tokens_seen: Mutex<Vec<String>>,
}

impl StaticMetadata {
    pub fn with_ranges(ranges: &[&str]) -> Self {
        Self {
            ranges: Some(ranges.iter().map(|r| r.to_string()).collect()),
            tokens_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            ranges: None,
            tokens_seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MetadataSource for StaticMetadata {
    async fn hook_ranges(&self, token: &str) -> Result<Vec<String>, MetaError> {
        self.tokens_seen.lock().unwrap().push(token.to_string());
        self.ranges.clone().ok_or_else(|| MetaError::Status {
            url: "https://api.github.com/meta".to_string(),
            status: 503,
        })
    }
}

/// Build service recording every start request.
pub struct RecordingBuildService {
    pub started: Mutex<Vec<StartBuildInput>>,
    pub reject_with: Option<String>,
}

impl RecordingBuildService {
    pub fn accepting() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            reject_with: None,
        }
    }

    pub fn rejecting(code: &str) -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            reject_with: Some(code.to_string()),
        }
    }

    pub fn started(&self) -> Vec<StartBuildInput> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildService for RecordingBuildService {
    async fn start_build(&self, input: &StartBuildInput) -> Result<StartedBuild, AwsError> {
        if let Some(code) = &self.reject_with {
            return Err(AwsError::Service {
                service: "codebuild".to_string(),
                status: 400,
                code: code.clone(),
                message: "rejected".to_string(),
            });
        }

        let mut started = self.started.lock().unwrap();
        started.push(input.clone());
        Ok(StartedBuild {
            id: format!("{}:build-{}", input.project_name, started.len()),
        })
    }
}

/// Serve `app` on an ephemeral loopback port for outbound client tests.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
