//! solarnet-toggle - watch and set a SolarNetwork node control.
//!
//! Polls the control's state, logging every change, until Ctrl-C. When a
//! value argument is given, the control is asked to take that value after
//! the first poll.
//!
//! # Usage
//!
//! ```text
//! SN_TOKEN=... SN_SECRET=... SN_NODE_ID=123 SN_CONTROL_ID=/power/switch/1 solarnet-toggle [VALUE]
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SN_HOST` | `data.solarnetwork.net` | SolarUser host |
//! | `SN_PROTOCOL` | `https` | URL scheme |
//! | `SN_PORT` | *(protocol default)* | Port |
//! | `SN_QUERY_HOST` | *(same as `SN_HOST`)* | SolarQuery host |
//! | `SN_TOKEN` | *(required)* | Security token ID |
//! | `SN_SECRET` | *(required)* | Security token secret |
//! | `SN_NODE_ID` | *(required)* | Node ID |
//! | `SN_CONTROL_ID` | *(required)* | Control ID |
//! | `SN_REFRESH_MS` | `20000` | Poll interval while idle |
//! | `SN_PENDING_REFRESH_MS` | `5000` | Poll interval while a change is pending |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use solarnet_auth::AuthorizationV2Builder;
use solarnet_control::{ControlToggler, ReqwestTransport, SolarNetClient};
use solarnet_core::{ControlValue, SolarNetConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Read a command-line control value: booleans, then numbers, then text.
fn parse_value(raw: &str) -> ControlValue {
    let raw = raw.trim();
    match raw.to_ascii_lowercase().as_str() {
        "true" | "on" => return ControlValue::Boolean(true),
        "false" | "off" => return ControlValue::Boolean(false),
        _ => {}
    }
    raw.parse::<f64>()
        .map_or_else(|_| ControlValue::Text(raw.to_owned()), ControlValue::Number)
}

fn build_toggler(config: &SolarNetConfig) -> Result<ControlToggler> {
    let token = SolarNetConfig::require(config.token.as_deref(), "SN_TOKEN")?;
    let secret = SolarNetConfig::require(config.secret.as_deref(), "SN_SECRET")?;
    let node_id = *SolarNetConfig::require(config.node_id.as_ref(), "SN_NODE_ID")?;
    let control_id = SolarNetConfig::require(config.control_id.as_deref(), "SN_CONTROL_ID")?;

    let auth = AuthorizationV2Builder::new(token, config.environment());
    let client = SolarNetClient::new(
        Arc::new(ReqwestTransport::new()),
        auth,
        Some(config.query_environment()),
    );
    client.save_signing_key(secret);

    let toggler = ControlToggler::new(client, node_id, control_id);
    toggler.set_refresh(Duration::from_millis(config.refresh_ms));
    toggler.set_pending_refresh(Duration::from_millis(config.pending_refresh_ms));
    Ok(toggler)
}

fn log_changes(toggler: &Arc<ControlToggler>) {
    let weak: Weak<ControlToggler> = Arc::downgrade(toggler);
    toggler.set_callback(move |err| {
        let Some(toggler) = weak.upgrade() else {
            return;
        };
        match err {
            Some(e) => error!(error = %e, control_id = toggler.control_id(), "control update failed"),
            None => info!(
                control_id = toggler.control_id(),
                value = ?toggler.value(),
                pending = toggler.has_pending_state_change(),
                "control state changed"
            ),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = SolarNetConfig::from_env();
    init_tracing(&config.log_level)?;

    let desired = std::env::args().nth(1).map(|v| parse_value(&v));
    let toggler = Arc::new(build_toggler(&config).context("incomplete configuration")?);
    log_changes(&toggler);

    info!(
        host = %config.environment(),
        query_host = %config.query_environment(),
        node_id = toggler.node_id(),
        control_id = toggler.control_id(),
        "starting control toggler"
    );

    toggler
        .update()
        .await
        .context("failed to read initial control state")?;
    if let Some(value) = desired {
        info!(value = %value, "requesting control value");
        toggler
            .set_value(value)
            .await
            .context("failed to request control value")?;
    }
    toggler.start(None);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("received shutdown signal, stopping");
    toggler.stop();
    Ok(())
}
