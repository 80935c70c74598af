use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use market_payments::StripeGateway;
use market_server::{AppState, ServerConfig, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    // Startup fails without Stripe credentials
    let config = ServerConfig::from_env()?;
    let gateway = Arc::new(StripeGateway::new(config.stripe.clone())?);
    tracing::info!("✓ Stripe configured");

    let state = AppState::new(
        gateway,
        &config.stripe.webhook_secret,
        config.settlement.clone(),
    );

    tracing::info!("✓ Settlement mode: {}", state.settlement.mode());
    tracing::info!("✓ Platform fee: {}%", config.settlement.platform_fee_percent);
    tracing::info!("✓ Client base URL: {}", config.settlement.client_base_url);

    let app = router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 deck-market server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health                  - Health check");
    tracing::info!("  POST   /profiles                - Create or sync a profile");
    tracing::info!("  GET    /profiles/{{id}}           - Fetch a profile");
    tracing::info!("  POST   /profiles/{{id}}/follow    - Toggle following a creator");
    tracing::info!("  POST   /decks                   - Submit a deck");
    tracing::info!("  GET    /decks                   - Browse the catalog");
    tracing::info!("  GET    /decks/{{id}}              - Fetch a deck");
    tracing::info!("  DELETE /decks/{{id}}              - Delete a deck");
    tracing::info!("  POST   /decks/{{id}}/like         - Toggle a like");
    tracing::info!("  GET    /decks/{{id}}/reviews      - List reviews for a deck");
    tracing::info!("  POST   /reviews                 - Review a purchased deck");
    tracing::info!("  DELETE /reviews/{{id}}            - Delete own review");
    tracing::info!("  POST   /disputes                - File a plagiarism dispute");
    tracing::info!("  POST   /create-connect-account  - Provision a payout account");
    tracing::info!("  POST   /create-pending-account  - Payout account by email");
    tracing::info!("  POST   /create-onboarding-link  - Hosted onboarding link");
    tracing::info!("  POST   /create-checkout-session - Recharge or deck checkout");
    tracing::info!("  POST   /process-deck-purchase   - Buy a deck with balance");
    tracing::info!("  POST   /withdraw-funds          - Pay out stored balance");
    tracing::info!("  POST   /create-payout           - Alias for /withdraw-funds");
    tracing::info!("  POST   /webhook                 - Stripe webhook");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
