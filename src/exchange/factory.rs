use std::sync::Arc;
use tracing::info;

use crate::adapters::{FillMode, PaperBroker, RestBroker};
use crate::config::AppConfig;
use crate::error::Result;

use super::{BrokerClient, BrokerKind};

/// Create the runtime broker client from `AppConfig`.
///
/// A dry run places orders against a [`PaperBroker`]; when credentials are
/// configured it still reads quotes, clock and account from the live API.
pub fn build_broker_client(app_config: &AppConfig, dry_run: bool) -> Result<Arc<dyn BrokerClient>> {
    let kind = if dry_run {
        BrokerKind::Paper
    } else {
        BrokerKind::Rest
    };

    match kind {
        BrokerKind::Rest => {
            info!(url = %app_config.broker.trading_url, "using REST broker");
            Ok(Arc::new(RestBroker::new(&app_config.broker)?))
        }
        BrokerKind::Paper => {
            let mut paper = PaperBroker::new(FillMode::Immediate);
            if has_credentials(app_config) {
                info!(url = %app_config.broker.data_url, "paper broker with live market data");
                paper = paper.with_market_data(Arc::new(RestBroker::new(&app_config.broker)?));
            } else {
                info!("paper broker with local market data");
            }
            Ok(Arc::new(paper))
        }
    }
}

fn has_credentials(app_config: &AppConfig) -> bool {
    !app_config.broker.key_id.is_empty() && !app_config.broker.secret_key.is_empty()
}
