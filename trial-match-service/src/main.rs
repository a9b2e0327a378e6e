use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use trial_match::TrialMatcher;
use trial_match_service::create_app;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let matcher = match TrialMatcher::from_env() {
        Ok(matcher) => Arc::new(matcher),
        Err(err) => {
            eprintln!("Error: {err}");
            eprintln!("Set OPENROUTER_API_KEY and enable at least one provider.");
            std::process::exit(1);
        }
    };

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .unwrap_or(3000);

    let app = create_app(matcher);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    let addr = listener.local_addr()?;

    info!("Clinical Trial Matching Service starting on {}", addr);
    info!("Health check endpoint: http://{}/health", addr);
    info!("Extraction endpoint: POST http://{}/extract", addr);
    info!("Search endpoint: POST http://{}/search", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
