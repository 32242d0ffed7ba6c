//! The homelab API. Turns app specs into manifests in the cluster's GitOps
//! repository, publishes them and reports how the apps are doing on the live
//! cluster.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::missing_docs_in_private_items)]
#![cfg_attr(debug_assertions, allow(dead_code, unused_variables))]

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{level_filters::LevelFilter, Dispatch, Level};
use tracing_subscriber::{
	fmt::{format::FmtSpan, Layer as FmtLayer},
	layer::SubscriberExt,
	Layer,
};

use crate::{
	app::AppState,
	prelude::*,
	service::KubeCluster,
	utils::config::{self, RunningEnvironment},
};

/// The global state shared by every request
mod app;
/// All the routes of the API
mod routes;
/// The business logic of the API, along with the clients of the file system,
/// the GitOps repository and the cluster
mod service;
/// Fixtures shared by the tests of every module
#[cfg(test)]
mod test_utils;
/// Configuration, errors and other helpers used across the API
mod utils;

/// A prelude that re-exports commonly used items.
pub mod prelude {
	pub use tracing::{debug, error, info, instrument, trace, warn};

	pub use crate::utils::error::AppError;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = config::parse_config().context("failed to parse configuration")?;

	tracing::dispatcher::set_global_default(Dispatch::new(
		tracing_subscriber::registry().with(
			FmtLayer::new()
				.with_span_events(FmtSpan::NONE)
				.event_format(
					tracing_subscriber::fmt::format()
						.with_ansi(config.environment == RunningEnvironment::Development)
						.with_file(false)
						.compact(),
				)
				.with_filter(
					tracing_subscriber::filter::Targets::new()
						.with_target(env!("CARGO_PKG_NAME"), LevelFilter::TRACE)
						.with_target("models", LevelFilter::TRACE)
						.with_target("kube", LevelFilter::INFO),
				)
				.with_filter(LevelFilter::from_level(
					if config.environment == RunningEnvironment::Development {
						Level::TRACE
					} else {
						Level::DEBUG
					},
				)),
		),
	))
	.context("failed to set global default subscriber")?;

	info!(
		"Configuration read. Running environment set to {}",
		config.environment
	);

	let client = kube::Client::try_default()
		.await
		.context("failed to connect to the cluster")?;
	debug!("Cluster client created");

	let cluster = KubeCluster::new(client, config.flux.clone());
	let bind_addr = config.bind_addr;
	let state = AppState::new(config, Arc::new(cluster));

	let router = routes::setup_routes(&state);

	let listener = TcpListener::bind(bind_addr)
		.await
		.with_context(|| format!("failed to bind to {}", bind_addr))?;
	info!("Listening for connections on {}", bind_addr);

	axum::serve(
		listener,
		router.into_make_service_with_connect_info::<SocketAddr>(),
	)
	.with_graceful_shutdown(exit_signal())
	.await
	.context("server failed")?;

	info!("Server stopped");
	Ok(())
}

/// Resolves once the process is asked to stop, either through Ctrl+C or a
/// SIGTERM from the container runtime
#[instrument]
async fn exit_signal() {
	let ctrl_c = async {
		if let Err(err) = tokio::signal::ctrl_c().await {
			error!("Failed to listen for SIGINT: {}", err);
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			}
			Err(err) => {
				error!("Failed to install the SIGTERM handler: {}", err);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => (),
		_ = terminate => (),
	}
	info!("Shutdown signal received, shutting down server gracefully");
}
