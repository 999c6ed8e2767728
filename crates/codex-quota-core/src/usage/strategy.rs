//! The acquisition strategy capability and the configured chain.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::FetchError;
use super::oauth::OAuthClient;
use super::pty::PtyClient;
use super::rpc::RpcClient;
use super::types::{Source, UsageSnapshot};
use crate::config::{Settings, StrategyKind};

/// One way of obtaining a usage snapshot.
///
/// Implementations get exactly one attempt per fetch. Returning
/// `FetchError::NotApplicable` means "skip me quietly" rather than failure.
#[async_trait]
pub trait UsageStrategy: Send + Sync {
    /// Source tag carried by snapshots from this strategy
    fn source(&self) -> Source;

    /// Short name for logs and error summaries
    fn name(&self) -> &'static str {
        self.source().as_str()
    }

    async fn attempt(&self, cancel: &CancellationToken) -> Result<UsageSnapshot, FetchError>;
}

/// Build one strategy
pub fn build_strategy(kind: StrategyKind, settings: &Settings) -> Box<dyn UsageStrategy> {
    match kind {
        StrategyKind::OAuth => Box::new(OAuthClient::new(&settings.oauth)),
        StrategyKind::Rpc => Box::new(RpcClient::new(settings)),
        StrategyKind::Cli => Box::new(PtyClient::new(settings)),
    }
}

/// Strategies in the configured order
pub fn strategies_from_settings(settings: &Settings) -> Vec<Box<dyn UsageStrategy>> {
    settings
        .strategies
        .iter()
        .map(|kind| build_strategy(*kind, settings))
        .collect()
}
