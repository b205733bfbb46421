use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use murmur_shared::protocol::{
    ConversationSummary, CreateConversationRequest, FeedMessage, PushPayload,
    SendMessageRequest, SubscriptionDescriptor, SyncUserRequest, UpdateGroupRequest,
};
use murmur_shared::constants::FEED_FETCH_DEFAULT;
use murmur_shared::{ConversationId, MessageId, Sender, UserId};
use murmur_store::{Database, Message, User};

use crate::auth::{authenticate, verify_webhook_token};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::push::{broadcast, BroadcastOutcome, HttpPushTransport};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub push: Arc<HttpPushTransport>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Lock the store.  The guard is never held across an `.await`.
    fn db(&self) -> Result<MutexGuard<'_, Database>, ServerError> {
        self.db
            .lock()
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/me", get(me))
        .route("/users", get(list_users))
        .route("/conversations", get(list_conversations).post(create_conversation))
        .route(
            "/conversations/:id",
            get(get_conversation)
                .patch(update_group)
                .delete(delete_conversation),
        )
        .route("/conversations/:id/members", get(list_members).post(add_member))
        .route("/conversations/:id/members/:user", delete(remove_member))
        .route("/conversations/:id/messages", get(fetch_feed).post(send_message))
        .route("/conversations/:id/delivered", post(mark_delivered))
        .route("/conversations/:id/seen", post(mark_seen))
        .route("/messages/:id", delete(unsend_message))
        .route("/messages/search", get(search_messages))
        .route("/push/subscribe", post(push_subscribe))
        .route("/push/unsubscribe", post(push_unsubscribe))
        .route("/push/send", post(push_send))
        .route("/users/sync", post(sync_user))
        .route("/users/by-token/:token_identifier", delete(delete_user))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Health / identity
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn me(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<User>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    Ok(Json(user))
}

async fn list_users(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    Ok(Json(db.list_users_except(user.id)?))
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

async fn list_conversations(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    Ok(Json(db.list_conversations(user.id)?))
}

async fn create_conversation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<ConversationSummary>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;

    let conversation = if req.is_group {
        let name = req
            .group_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ServerError::BadRequest("a group needs a name".into()))?;
        db.create_group(user.id, name, req.group_image.as_deref(), &req.participants)?
    } else {
        let &[peer] = &req.participants[..] else {
            return Err(ServerError::BadRequest(
                "a direct conversation needs exactly one peer".into(),
            ));
        };
        db.create_direct(user.id, peer)?
    };

    Ok(Json(db.summarize(conversation.id, user.id)?))
}

async fn get_conversation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
) -> Result<Json<ConversationSummary>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    db.get_conversation(id, user.id)?;
    Ok(Json(db.summarize(id, user.id)?))
}

async fn update_group(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<Json<ConversationSummary>, ServerError> {
    // Same rule as creation: a group can never end up nameless.
    let name = match req.group_name.as_deref() {
        Some("") => return Err(ServerError::BadRequest("a group needs a name".into())),
        other => other,
    };

    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    db.update_group(id, user.id, name, req.group_image.as_deref())?;
    Ok(Json(db.summarize(id, user.id)?))
}

async fn delete_conversation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    db.delete_conversation(id, user.id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn list_members(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
) -> Result<Json<Vec<User>>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    db.get_conversation(id, user.id)?;
    Ok(Json(db.group_members(id)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberRequest {
    user_id: UserId,
}

async fn add_member(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    Json(req): Json<MemberRequest>,
) -> Result<Json<ConversationSummary>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    db.add_participant(id, user.id, req.user_id)?;
    Ok(Json(db.summarize(id, user.id)?))
}

async fn remove_member(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((id, target)): Path<(ConversationId, UserId)>,
) -> Result<Json<ConversationSummary>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    db.remove_participant(id, user.id, target)?;
    Ok(Json(db.summarize(id, user.id)?))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct FeedQuery {
    limit: Option<u32>,
}

async fn fetch_feed(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<FeedMessage>>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    db.get_conversation(id, user.id)?;
    Ok(Json(db.fetch_feed(id, query.limit.unwrap_or(FEED_FETCH_DEFAULT))?))
}

async fn send_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<FeedMessage>, ServerError> {
    if req.content.is_empty() {
        return Err(ServerError::BadRequest("message content is empty".into()));
    }

    let (message, payload) = {
        let db = state.db()?;
        let user = authenticate(&db, &headers)?;

        let message_id = db.send_message(
            id,
            &Sender::User(user.id),
            &req.content,
            req.message_type,
            req.reply_to,
        )?;

        let feed = db.fetch_feed(id, 1)?;
        let message = feed
            .into_iter()
            .next()
            .ok_or_else(|| ServerError::Internal("sent message missing from feed".into()))?;

        info!(message = %message_id, conversation = %id, "message sent");

        let summary = db.summarize(id, user.id)?;
        let payload = PushPayload {
            title: summary.display_name().to_string(),
            body: format!("{}: {}", user.name, req.content),
            icon: summary.display_image().to_string(),
            url: format!("/chats/{id}"),
        };
        (message, payload)
    };

    // Push dispatch is best-effort and never fails the send.
    if let Err(e) = broadcast(&state.db, state.push.as_ref(), &payload).await {
        tracing::warn!(error = %e, "push broadcast failed");
    }

    Ok(Json(message))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconcileResponse {
    marked: usize,
}

async fn mark_delivered(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
) -> Result<Json<ReconcileResponse>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    db.get_conversation(id, user.id)?;
    let marked = db.mark_delivered(id, user.id)?;
    Ok(Json(ReconcileResponse { marked }))
}

async fn mark_seen(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
) -> Result<Json<ReconcileResponse>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    db.get_conversation(id, user.id)?;
    let marked = db.mark_seen(id, user.id)?;
    Ok(Json(ReconcileResponse { marked }))
}

async fn unsend_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;
    db.unsend_message(id, user.id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    conversation: Option<ConversationId>,
}

async fn search_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let db = state.db()?;
    let user = authenticate(&db, &headers)?;

    // Asking for a specific conversation the caller is not in is a 403/404,
    // not an empty result.
    if let Some(conversation) = query.conversation {
        db.get_conversation(conversation, user.id)?;
    }
    let hits = db.search_messages(user.id, &query.q, query.conversation)?;
    Ok(Json(hits))
}

// ---------------------------------------------------------------------------
// Push subscriptions
// ---------------------------------------------------------------------------

async fn push_subscribe(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(descriptor): Json<SubscriptionDescriptor>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let db = state.db()?;
    authenticate(&db, &headers)?;

    let value = serde_json::to_value(&descriptor)
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    db.add_subscription(&descriptor.endpoint, &value)?;

    info!(endpoint = %descriptor.endpoint, "push subscription registered");
    Ok(Json(serde_json::json!({ "subscribed": true })))
}

#[derive(Deserialize)]
struct UnsubscribeRequest {
    endpoint: String,
}

async fn push_unsubscribe(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<UnsubscribeRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let db = state.db()?;
    authenticate(&db, &headers)?;
    let removed = db.remove_subscription(&req.endpoint)?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

async fn push_send(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(payload): Json<PushPayload>,
) -> Result<Json<BroadcastOutcome>, ServerError> {
    {
        let db = state.db()?;
        authenticate(&db, &headers)?;
    }
    let outcome = broadcast(&state.db, state.push.as_ref(), &payload).await?;
    Ok(Json(outcome))
}

// ---------------------------------------------------------------------------
// Identity provider webhooks
// ---------------------------------------------------------------------------

async fn sync_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<SyncUserRequest>,
) -> Result<Json<User>, ServerError> {
    verify_webhook_token(&headers, &state.config)?;

    let db = state.db()?;
    let user = match db.get_user_by_token(&req.token_identifier) {
        Ok(_) => db.update_user(&req.token_identifier, Some(&req.name), &req.image)?,
        Err(murmur_store::StoreError::NotFound) => {
            db.create_user(&req.token_identifier, &req.name, &req.email, &req.image)?
        }
        Err(e) => return Err(e.into()),
    };

    info!(user = %user.id, "user synced from identity provider");
    Ok(Json(user))
}

async fn delete_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(token_identifier): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_webhook_token(&headers, &state.config)?;

    let db = state.db()?;
    db.delete_user(&token_identifier)?;

    info!("user deleted via identity provider webhook");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
