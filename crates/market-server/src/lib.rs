//! deck-market HTTP Server
//!
//! Axum-based server exposing the marketplace REST API: profiles,
//! deck catalog, reviews, disputes, and the Stripe settlement flows.
//!
//! The router is built here rather than in `main` so integration
//! tests can drive the full HTTP surface in-process.

pub mod config;
pub mod handlers;
pub mod state;

pub use config::ServerConfig;
pub use state::AppState;

use axum::{routing::{delete, get, post}, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    create_checkout_session, create_connect_account, create_onboarding_link,
    create_pending_account, create_profile, create_review, deck_reviews, delete_deck,
    delete_review, file_dispute, follow_creator, get_deck, get_profile, health_check,
    like_deck, list_decks, process_deck_purchase, stripe_webhook, submit_deck,
    withdraw_funds,
};

/// Build the application router with every route and middleware layer.
pub fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))

        // Profiles & social graph
        .route("/profiles", post(create_profile))
        .route("/profiles/{id}", get(get_profile))
        .route("/profiles/{id}/follow", post(follow_creator))

        // Deck catalog
        .route("/decks", post(submit_deck).get(list_decks))
        .route("/decks/{id}", get(get_deck).delete(delete_deck))
        .route("/decks/{id}/like", post(like_deck))
        .route("/decks/{id}/reviews", get(deck_reviews))

        // Reviews & disputes
        .route("/reviews", post(create_review))
        .route("/reviews/{id}", delete(delete_review))
        .route("/disputes", post(file_dispute))

        // Payments
        .route("/create-connect-account", post(create_connect_account))
        .route("/create-pending-account", post(create_pending_account))
        .route("/create-onboarding-link", post(create_onboarding_link))
        .route("/create-checkout-session", post(create_checkout_session))
        .route("/process-deck-purchase", post(process_deck_purchase))
        .route("/withdraw-funds", post(withdraw_funds))
        .route("/create-payout", post(withdraw_funds))

        // Stripe webhook
        .route("/webhook", post(stripe_webhook))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
