use collabhub::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).with_target(false).init();

	let app = collabhub::bootstrap().await?;
	let port = app.config.port;
	let router = collabhub::http::router(app);

	let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
		.await
		.map_err(|e| Error::Internal(format!("failed to bind port {port}: {e}")))?;
	info!("listening on 0.0.0.0:{}", port);

	axum::serve(listener, router).await.map_err(|e| Error::Internal(format!("server error: {e}")))?;
	Ok(())
}

// vim: ts=4
