//! `dealflow-ingress` binary: the public webhook service.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::Result;

use dealflow_api::{bootstrap, ingress_app, serve, Config};
use dealflow_core::{init_logging, LogFormat};

fn log_format(config: &Config) -> LogFormat {
    if config.local_dev {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(log_format(&config), &config.service_name);
    dealflow_flow::metrics::register_metrics();

    let port = config.http_port;
    let state = bootstrap::build_state(config).await?;
    serve(ingress_app(state), port).await?;
    Ok(())
}
