//! HTTP Handlers
//!
//! Request and response bodies use camelCase keys; money travels as
//! decimal strings, never floats. Amounts are always derived from
//! stored state (deck prices, wallet balances) rather than trusted
//! from the client.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use market_catalog::{CatalogError, DeckFilter, DeckSubmission, SubmissionVerdict};
use market_core::{
    AccountId, Deck, DeckId, Difficulty, MarketError, MarketStore, PlagiarismDispute, Profile,
    Review, ReviewId, UserId, valid_rating,
};
use market_payments::{PaymentError, PayoutId, TransferId};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub gateway: String,
    #[serde(rename = "settlementMode")]
    pub settlement_mode: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileRequest {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct FollowResponse {
    pub following: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDeckRequest {
    pub creator_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub categories: Vec<String>,
    pub content: String,
}

/// 409 body when the originality check blocks a submission
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionBlockedResponse {
    pub error: String,
    pub code: String,
    pub closest_deck_id: DeckId,
    pub closest_deck_title: String,
    pub similarity: f64,
    pub dispute_available: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckQuery {
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub max_price: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub liked: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    pub user_id: String,
    pub deck_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReviewRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeRequest {
    pub user_id: String,
    pub deck_title: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAccountRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub account_id: AccountId,
}

#[derive(Debug, Deserialize)]
pub struct PendingAccountRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingLinkRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingLinkResponse {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    /// Wallet recharge: who to credit when the webhook lands
    #[serde(default)]
    pub user_id: Option<String>,
    /// Wallet recharge: how much to charge
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub is_recharge: Option<bool>,
    /// Deck sale: the buyer
    #[serde(default)]
    pub buyer_id: Option<String>,
    /// Deck sale: the deck; the price comes from the store
    #[serde(default)]
    pub deck_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseDeckRequest {
    pub buyer_id: String,
    pub deck_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseDeckResponse {
    pub success: bool,
    pub transfer: TransferId,
    pub seller_share: Decimal,
    pub new_balance: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub user_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResponse {
    pub success: bool,
    pub payout: PayoutId,
    pub new_balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

// ============================================================================
// Error mapping
// ============================================================================

type ApiError = (StatusCode, Json<ErrorResponse>);

fn market_error(e: MarketError) -> ApiError {
    let (status, code) = match &e {
        MarketError::MissingInput(_) | MarketError::Validation(_) | MarketError::Json(_) => {
            (StatusCode::BAD_REQUEST, "INVALID_INPUT")
        }
        MarketError::ProfileNotFound(_) => (StatusCode::NOT_FOUND, "PROFILE_NOT_FOUND"),
        MarketError::DeckNotFound(_) => (StatusCode::NOT_FOUND, "DECK_NOT_FOUND"),
        MarketError::ReviewNotFound(_) => (StatusCode::NOT_FOUND, "REVIEW_NOT_FOUND"),
        MarketError::InsufficientFunds { .. } => (StatusCode::CONFLICT, "INSUFFICIENT_FUNDS"),
        MarketError::AlreadyPurchased(_) => (StatusCode::CONFLICT, "ALREADY_PURCHASED"),
        MarketError::AlreadyReviewed => (StatusCode::CONFLICT, "ALREADY_REVIEWED"),
        MarketError::PurchaseRequired => (StatusCode::FORBIDDEN, "PURCHASE_REQUIRED"),
        MarketError::NotOwner => (StatusCode::FORBIDDEN, "NOT_OWNER"),
        MarketError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: code.to_string(),
        }),
    )
}

fn payment_error(e: PaymentError) -> ApiError {
    // Domain errors keep their own status mapping
    if let PaymentError::Market(inner) = e {
        return market_error(inner);
    }
    let (status, code) = match &e {
        PaymentError::AccountMissing(_) => (StatusCode::CONFLICT, "CONNECT_ACCOUNT_MISSING"),
        PaymentError::AccountNotActive(_) => (StatusCode::CONFLICT, "CONNECT_ACCOUNT_INACTIVE"),
        PaymentError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
        PaymentError::WebhookSignature(_) => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE"),
        PaymentError::WebhookParse(_) => (StatusCode::BAD_REQUEST, "WEBHOOK_PARSE_ERROR"),
        PaymentError::Provider(_) | PaymentError::Network(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_ERROR")
        }
        PaymentError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
        PaymentError::Market(_) => unreachable!(),
    };
    (
        status,
        Json(ErrorResponse {
            error: e.user_message(),
            code: code.to_string(),
        }),
    )
}

fn missing(field: &str) -> ApiError {
    market_error(MarketError::MissingInput(field.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Health
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        gateway: state.settlement.gateway_name().to_string(),
        settlement_mode: state.settlement.mode().as_str(),
    })
}

// ============================================================================
// Profiles & social graph
// ============================================================================

/// Mirror an auth-provider sign-up into a profile (idempotent)
pub async fn create_profile(
    State(state): State<AppState>,
    Json(payload): Json<CreateProfileRequest>,
) -> Result<Json<Profile>, ApiError> {
    if payload.user_id.trim().is_empty() {
        return Err(missing("userId"));
    }
    if payload.username.trim().is_empty() {
        return Err(missing("username"));
    }

    let mut profile = Profile::new(
        UserId::from_string(payload.user_id.trim()),
        payload.username.trim(),
    );
    profile.email = non_empty(payload.email);
    profile.avatar_url = non_empty(payload.avatar_url);

    let stored = state.store.upsert_profile(profile).map_err(market_error)?;
    Ok(Json(stored))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Profile>, ApiError> {
    let profile = state
        .store
        .profile(&UserId::from_string(&id))
        .map_err(market_error)?
        .ok_or_else(|| market_error(MarketError::ProfileNotFound(id.clone())))?;
    Ok(Json(profile))
}

/// Toggle following the creator in the path
pub async fn follow_creator(
    State(state): State<AppState>,
    Path(creator_id): Path<String>,
    Json(payload): Json<FollowRequest>,
) -> Result<Json<FollowResponse>, ApiError> {
    let following = state
        .store
        .toggle_followed(
            &UserId::from_string(&payload.user_id),
            &UserId::from_string(&creator_id),
        )
        .map_err(market_error)?;
    Ok(Json(FollowResponse { following }))
}

// ============================================================================
// Decks
// ============================================================================

/// Submit a deck: validate, count cards, run the originality check,
/// then publish. A too-similar deck comes back as 409 with the
/// closest match and a dispute invitation.
pub async fn submit_deck(
    State(state): State<AppState>,
    Json(payload): Json<SubmitDeckRequest>,
) -> Result<Response, ApiError> {
    let creator_id = UserId::from_string(payload.creator_id.trim());
    state
        .store
        .profile(&creator_id)
        .map_err(market_error)?
        .ok_or_else(|| market_error(MarketError::ProfileNotFound(creator_id.to_string())))?;

    let submission = DeckSubmission {
        creator_id,
        title: payload.title,
        description: payload.description,
        price: payload.price,
        difficulty: payload.difficulty,
        categories: payload.categories,
        content: payload.content,
    };
    let existing = state.store.decks().map_err(market_error)?;

    match market_catalog::evaluate(&submission, &existing) {
        Ok(SubmissionVerdict::Accepted { card_count }) => {
            let deck = submission.into_deck(card_count);
            state.store.insert_deck(deck.clone()).map_err(market_error)?;
            Ok(Json(deck).into_response())
        }
        Ok(SubmissionVerdict::Blocked { closest }) => {
            tracing::info!(
                title = %submission.title,
                closest = %closest.title,
                similarity = closest.score,
                "deck submission blocked"
            );
            Ok((
                StatusCode::CONFLICT,
                Json(SubmissionBlockedResponse {
                    error: format!("Deck is too similar to \"{}\"", closest.title),
                    code: "SUBMISSION_BLOCKED".to_string(),
                    closest_deck_id: closest.deck_id,
                    closest_deck_title: closest.title,
                    similarity: closest.score,
                    dispute_available: true,
                }),
            )
                .into_response())
        }
        Err(e @ CatalogError::Invalid(_)) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "INVALID_SUBMISSION".to_string(),
            }),
        )),
    }
}

/// Browse the catalog with optional filters
pub async fn list_decks(
    State(state): State<AppState>,
    Query(query): Query<DeckQuery>,
) -> Result<Json<Vec<Deck>>, ApiError> {
    let filter = DeckFilter {
        difficulty: query.difficulty,
        category: non_empty(query.category),
        creator_id: non_empty(query.creator_id).map(UserId::from_string),
        query: non_empty(query.q),
        max_price: query.max_price,
    };
    let decks = state.store.decks().map_err(market_error)?;
    Ok(Json(market_catalog::search(decks, &filter)))
}

pub async fn get_deck(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Deck>, ApiError> {
    let deck = state
        .store
        .deck(&DeckId::from_string(&id))
        .map_err(market_error)?
        .ok_or_else(|| market_error(MarketError::DeckNotFound(id.clone())))?;
    Ok(Json(deck))
}

/// Remove a deck from the catalog. Copies already bought stay in
/// their buyers' libraries.
pub async fn delete_deck(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let deleted = state
        .store
        .delete_deck(&DeckId::from_string(&id))
        .map_err(market_error)?;
    if !deleted {
        return Err(market_error(MarketError::DeckNotFound(id)));
    }
    Ok(Json(DeletedResponse { deleted: true }))
}

/// Toggle a like on the deck in the path
pub async fn like_deck(
    State(state): State<AppState>,
    Path(deck_id): Path<String>,
    Json(payload): Json<LikeRequest>,
) -> Result<Json<LikeResponse>, ApiError> {
    let liked = state
        .store
        .toggle_liked(
            &UserId::from_string(&payload.user_id),
            &DeckId::from_string(&deck_id),
        )
        .map_err(market_error)?;
    Ok(Json(LikeResponse { liked }))
}

// ============================================================================
// Reviews & disputes
// ============================================================================

pub async fn create_review(
    State(state): State<AppState>,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<Json<Review>, ApiError> {
    if !valid_rating(payload.rating) {
        return Err(market_error(MarketError::Validation(format!(
            "rating must be between 1 and 5, got {}",
            payload.rating
        ))));
    }
    let review = Review::new(
        UserId::from_string(&payload.user_id),
        DeckId::from_string(&payload.deck_id),
        payload.rating,
        payload.comment,
    );
    state.store.add_review(review.clone()).map_err(market_error)?;
    Ok(Json(review))
}

pub async fn deck_reviews(
    State(state): State<AppState>,
    Path(deck_id): Path<String>,
) -> Result<Json<Vec<Review>>, ApiError> {
    let reviews = state
        .store
        .reviews_for_deck(&DeckId::from_string(&deck_id))
        .map_err(market_error)?;
    Ok(Json(reviews))
}

pub async fn delete_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<DeleteReviewRequest>,
) -> Result<Json<DeletedResponse>, ApiError> {
    state
        .store
        .delete_review(
            &ReviewId::from_string(&id),
            &UserId::from_string(&payload.user_id),
        )
        .map_err(market_error)?;
    Ok(Json(DeletedResponse { deleted: true }))
}

/// File a plagiarism dispute after a blocked submission
pub async fn file_dispute(
    State(state): State<AppState>,
    Json(payload): Json<DisputeRequest>,
) -> Result<Json<PlagiarismDispute>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(missing("message"));
    }
    let user_id = UserId::from_string(&payload.user_id);
    state
        .store
        .profile(&user_id)
        .map_err(market_error)?
        .ok_or_else(|| market_error(MarketError::ProfileNotFound(user_id.to_string())))?;

    let dispute = PlagiarismDispute::new(user_id, payload.deck_title, payload.message);
    state.store.file_dispute(dispute.clone()).map_err(market_error)?;
    Ok(Json(dispute))
}

// ============================================================================
// Payments
// ============================================================================

/// Look up or create the user's connected payout account
pub async fn create_connect_account(
    State(state): State<AppState>,
    Json(payload): Json<ConnectAccountRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .settlement
        .provision_account(&UserId::from_string(&payload.user_id))
        .await
        .map_err(payment_error)?;
    Ok(Json(AccountResponse {
        account_id: account,
    }))
}

/// Create a connected account for an email with no profile yet
pub async fn create_pending_account(
    State(state): State<AppState>,
    Json(payload): Json<PendingAccountRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .settlement
        .provision_pending_account(&payload.email)
        .await
        .map_err(payment_error)?;
    Ok(Json(AccountResponse {
        account_id: account,
    }))
}

/// Onboarding link for a user's bound account, or for a raw account
/// ID from the pre-sign-up flow
pub async fn create_onboarding_link(
    State(state): State<AppState>,
    Json(payload): Json<OnboardingLinkRequest>,
) -> Result<Json<OnboardingLinkResponse>, ApiError> {
    let link = if let Some(user_id) = non_empty(payload.user_id) {
        state
            .settlement
            .onboarding_link_for_user(&UserId::from_string(user_id))
            .await
    } else if let Some(account_id) = non_empty(payload.account_id) {
        state
            .settlement
            .onboarding_link_for_account(&AccountId::from_string(account_id))
            .await
    } else {
        return Err(missing("userId or accountId"));
    }
    .map_err(payment_error)?;

    Ok(Json(OnboardingLinkResponse {
        url: link.url,
        expires_at: link.expires_at,
    }))
}

/// Open a hosted checkout session: a wallet recharge when
/// `isRecharge` is set, otherwise a deck purchase
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutSessionRequest>,
) -> Result<Json<CheckoutSessionResponse>, ApiError> {
    let session = if payload.is_recharge.unwrap_or(false) {
        let user_id = non_empty(payload.user_id).ok_or_else(|| missing("userId"))?;
        let amount = payload.amount.ok_or_else(|| missing("amount"))?;
        state
            .settlement
            .recharge_session(&UserId::from_string(user_id), amount)
            .await
    } else {
        let buyer_id = non_empty(payload.buyer_id).ok_or_else(|| missing("buyerId"))?;
        let deck_id = non_empty(payload.deck_id).ok_or_else(|| missing("deckId"))?;
        state
            .settlement
            .deck_checkout_session(
                &UserId::from_string(buyer_id),
                &DeckId::from_string(deck_id),
            )
            .await
    }
    .map_err(payment_error)?;

    Ok(Json(CheckoutSessionResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// Buy a deck with stored balance, settled synchronously
pub async fn process_deck_purchase(
    State(state): State<AppState>,
    Json(payload): Json<PurchaseDeckRequest>,
) -> Result<Json<PurchaseDeckResponse>, ApiError> {
    let settled = state
        .settlement
        .purchase_with_balance(
            &UserId::from_string(&payload.buyer_id),
            &DeckId::from_string(&payload.deck_id),
        )
        .await
        .map_err(payment_error)?;

    Ok(Json(PurchaseDeckResponse {
        success: true,
        transfer: settled.transfer,
        seller_share: settled.receipt.seller_share,
        new_balance: settled.receipt.buyer_balance,
    }))
}

/// Withdraw stored balance to the user's bank account
pub async fn withdraw_funds(
    State(state): State<AppState>,
    Json(payload): Json<WithdrawRequest>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    let settled = state
        .settlement
        .withdraw(&UserId::from_string(&payload.user_id), payload.amount)
        .await
        .map_err(payment_error)?;

    Ok(Json(WithdrawResponse {
        success: true,
        payout: settled.payout,
        new_balance: settled.new_balance,
    }))
}

// ============================================================================
// Webhook
// ============================================================================

/// Stripe webhook handler. Signature failures reject the request
/// before anything is parsed or applied.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Missing Stripe signature".to_string(),
                    code: "MISSING_SIGNATURE".to_string(),
                }),
            )
        })?;

    let event = state
        .webhooks
        .verify_and_parse(body.as_bytes(), signature)
        .map_err(|e| {
            tracing::warn!("Webhook rejected: {}", e);
            payment_error(e)
        })?;

    let outcome = state.webhooks.process(event).map_err(|e| {
        tracing::error!("Webhook processing error: {}", e);
        payment_error(e)
    })?;
    tracing::debug!(?outcome, "webhook handled");

    Ok(Json(WebhookAck { received: true }))
}
