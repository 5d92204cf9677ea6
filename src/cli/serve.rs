//! HTTP server startup and configuration.

use std::time::Duration;

use tracing::{info, warn};

use codeindex::IndexError;
use codeindex::server::{self, ServerConfig};

use super::args::ServeArgs;
use super::init_logging;

pub(crate) fn server_config(args: &ServeArgs) -> ServerConfig {
    ServerConfig {
        host: args.host.clone(),
        port: args.port,
        ann_url: args.ann_url.clone().filter(|u| !u.trim().is_empty()),
        ann_timeout: Duration::from_millis(args.ann_timeout_ms.max(1)),
        ..ServerConfig::new(args.location.index_path(), args.location.vectors_path())
    }
}

pub fn cmd_serve(args: ServeArgs) -> Result<(), IndexError> {
    init_logging(&args.log_level, args.log_json);
    let config = server_config(&args);

    info!(
        index = %config.index_path.display(),
        vectors = %config.vectors_path.display(),
        port = config.port,
        ann_url = config.ann_url.as_deref().unwrap_or("-"),
        ann_timeout_ms = config.ann_timeout.as_millis() as u64,
        "Starting index server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("codeindex-http")
        .build()?;

    runtime.block_on(async move {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C; server will run until killed");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        };
        server::serve(config, shutdown).await
    })
}
