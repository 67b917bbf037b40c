//! Release version check
//!
//! A one-shot background task asks the release endpoint for the latest tag
//! and raises the store's `update_pending` flag when it differs from the
//! running version. Failures are reported and otherwise ignored.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use statecast_core::SnapshotStore;

use crate::status::StatusReporter;

/// Timeout for the release metadata request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    tag_name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AdvisoryError {
    #[error("release check failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("release endpoint returned {0}")]
    Status(StatusCode),

    #[error("release metadata has no tag_name")]
    MissingTag,
}

/// Outcome of comparing the local version with the latest release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionStatus {
    UpToDate,
    Outdated { latest: String },
}

fn normalize_version(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Compare versions by string equality, ignoring a leading `v`
pub fn compare(local: &str, latest: &str) -> VersionStatus {
    if normalize_version(local) == normalize_version(latest) {
        VersionStatus::UpToDate
    } else {
        VersionStatus::Outdated {
            latest: latest.to_string(),
        }
    }
}

fn build_client(version: &str) -> Result<reqwest::Client, AdvisoryError> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(format!("statecast/{version}"))
        .build()?;
    Ok(client)
}

/// Fetch the `tag_name` of the latest release
pub async fn fetch_latest_tag(client: &reqwest::Client, url: &str) -> Result<String, AdvisoryError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AdvisoryError::Status(status));
    }
    let release: ReleaseInfo = response.json().await?;
    // an empty tag says nothing about the latest release
    release
        .tag_name
        .filter(|tag| !tag.trim().is_empty())
        .ok_or(AdvisoryError::MissingTag)
}

/// Run the version check once and record the outcome
pub async fn check_version(
    url: &str,
    version: &str,
    store: &SnapshotStore,
    status: &StatusReporter,
) -> Result<VersionStatus, AdvisoryError> {
    let result = match build_client(version) {
        Ok(client) => fetch_latest_tag(&client, url).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(latest) => {
            let outcome = compare(version, &latest);
            match &outcome {
                VersionStatus::UpToDate => {
                    debug!(version, "running the latest release");
                    status.emit(&format!("statecast {version} is up to date."));
                }
                VersionStatus::Outdated { latest } => {
                    info!(version, latest = %latest, "newer release available");
                    store.set_update_pending(true);
                    status.emit(&format!(
                        "statecast {version} is out of date, latest release is {latest}."
                    ));
                }
            }
            Ok(outcome)
        }
        Err(e) => {
            warn!(url, error = %e, "version check failed");
            status.emit(&format!("Unable to check for updates: {e}"));
            Err(e)
        }
    }
}

/// Spawn the version check in the background
pub fn spawn_version_check(
    url: String,
    version: String,
    store: SnapshotStore,
    status: Arc<StatusReporter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // outcome already logged and reported
        let _ = check_version(&url, &version, &store, &status).await;
    })
}
