//! Thin JSON transport over the sync services. The node's real RPC
//! framing terminates outside this layer; these routes are the narrow
//! interface it calls through, one route per operation.

use crate::app::App;
use crate::error::{with_deadline, ApiError};
use crate::feeds::FeedRecord;
use crate::groups::{CreateGroupRequest, KeyGenerationRecord, MutationReply};
use crate::messages::MessagesReply;
use crate::watermarks::SetReadPositionReply;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use models::{Address, BlockIndex, DeviceToken, FeedId, FeedMessage, MessageId};
use projections::EnrichedMember;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/v1/addresses/:address/feeds", get(get_feeds))
        .route("/v1/addresses/:address/messages", get(get_feed_messages))
        .route("/v1/addresses/:address/personal-feed", get(has_personal_feed))
        .route(
            "/v1/addresses/:address/read-positions",
            get(get_read_positions).post(set_read_position),
        )
        .route(
            "/v1/addresses/:address/devices",
            get(list_devices).post(register_device),
        )
        .route("/v1/addresses/:address/devices/:token_id", delete(remove_device))
        .route("/v1/devices/cleanup", post(cleanup_devices))
        .route("/v1/messages/:message_id", get(get_message))
        .route("/v1/feeds/:feed_id/exists", get(feed_exists))
        .route("/v1/groups", post(create_group))
        .route(
            "/v1/groups/:feed_id/members",
            get(get_group_members).post(add_member),
        )
        .route("/v1/groups/:feed_id/key-generations", get(get_key_generations))
        .route("/v1/groups/:feed_id/join", post(join_group))
        .route("/v1/groups/:feed_id/leave", post(leave_group))
        .route("/v1/groups/:feed_id/ban", post(ban_member))
        .route("/v1/groups/:feed_id/unban", post(unban_member))
        .route("/v1/groups/:feed_id/block", post(block_member))
        .route("/v1/groups/:feed_id/unblock", post(unblock_member))
        .route("/v1/groups/:feed_id/promote", post(promote_member))
        .route("/v1/groups/:feed_id/title", post(update_title))
        .route("/v1/groups/:feed_id/description", post(update_description))
        .route("/v1/groups/:feed_id", delete(delete_group))
        .route("/metrics", get(prometheus_metrics))
        .with_state(app)
}

fn parse_feed_id(raw: &str) -> Result<FeedId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("invalid feed id {raw:?}")))
}

fn parse_message_id(raw: &str) -> Result<MessageId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("invalid message id {raw:?}")))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FeedsQuery {
    since_block: BlockIndex,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MessagesQuery {
    since_block: BlockIndex,
    since_tally_version: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequesterQuery {
    requester_address: Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExistsReply {
    exists: bool,
}

async fn get_feeds(
    State(app): State<Arc<App>>,
    Path(address): Path<String>,
    Query(query): Query<FeedsQuery>,
) -> Result<Json<Vec<FeedRecord>>, ApiError> {
    let address = Address::from(address);
    with_deadline(app.settings.request_deadline, async {
        app.feeds.get_feeds(&address, query.since_block).await
    })
    .await
    .map(Json)
}

async fn get_feed_messages(
    State(app): State<Arc<App>>,
    Path(address): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesReply>, ApiError> {
    let address = Address::from(address);
    with_deadline(app.settings.request_deadline, async {
        app.messages
            .get_feed_messages(&address, query.since_block, query.since_tally_version)
            .await
    })
    .await
    .map(Json)
}

async fn has_personal_feed(
    State(app): State<Arc<App>>,
    Path(address): Path<String>,
) -> Result<Json<ExistsReply>, ApiError> {
    let address = Address::from(address);
    with_deadline(app.settings.request_deadline, async {
        let exists = app.feeds.has_personal_feed(&address).await?;
        Ok(ExistsReply { exists })
    })
    .await
    .map(Json)
}

async fn feed_exists(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
) -> Result<Json<ExistsReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        let exists = app.feeds.feed_exists(feed_id).await?;
        Ok(ExistsReply { exists })
    })
    .await
    .map(Json)
}

async fn get_message(
    State(app): State<Arc<App>>,
    Path(message_id): Path<String>,
) -> Result<Json<FeedMessage>, ApiError> {
    let message_id = parse_message_id(&message_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.messages.get_message(message_id).await
    })
    .await
    .map(Json)
}

async fn get_group_members(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
) -> Result<Json<Vec<EnrichedMember>>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups.get_group_members(feed_id).await
    })
    .await
    .map(Json)
}

async fn get_key_generations(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Query(query): Query<RequesterQuery>,
) -> Result<Json<Vec<KeyGenerationRecord>>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups
            .get_key_generations(feed_id, &query.requester_address)
            .await
    })
    .await
    .map(Json)
}

async fn create_group(
    State(app): State<Arc<App>>,
    Json(request): Json<CreateGroupRequest>,
) -> Result<Json<MutationReply>, ApiError> {
    with_deadline(app.settings.request_deadline, async {
        app.groups.create_group_feed(request).await
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressBody {
    address: Address,
}

async fn join_group(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Json(body): Json<AddressBody>,
) -> Result<Json<MutationReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups.join_group(feed_id, &body.address).await
    })
    .await
    .map(Json)
}

async fn leave_group(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Json(body): Json<AddressBody>,
) -> Result<Json<MutationReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups.leave_group(feed_id, &body.address).await
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberBody {
    admin_address: Address,
    new_member_address: Address,
    #[serde(default)]
    new_member_encrypt_key: Option<String>,
}

async fn add_member(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Json(body): Json<AddMemberBody>,
) -> Result<Json<MutationReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups
            .add_member(
                feed_id,
                &body.admin_address,
                &body.new_member_address,
                body.new_member_encrypt_key.as_deref(),
            )
            .await
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetBody {
    admin_address: Address,
    target_address: Address,
}

async fn ban_member(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Json(body): Json<TargetBody>,
) -> Result<Json<MutationReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups
            .ban_member(feed_id, &body.admin_address, &body.target_address)
            .await
    })
    .await
    .map(Json)
}

async fn unban_member(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Json(body): Json<TargetBody>,
) -> Result<Json<MutationReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups
            .unban_member(feed_id, &body.admin_address, &body.target_address)
            .await
    })
    .await
    .map(Json)
}

async fn block_member(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Json(body): Json<TargetBody>,
) -> Result<Json<MutationReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups
            .block_member(feed_id, &body.admin_address, &body.target_address)
            .await
    })
    .await
    .map(Json)
}

async fn unblock_member(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Json(body): Json<TargetBody>,
) -> Result<Json<MutationReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups
            .unblock_member(feed_id, &body.admin_address, &body.target_address)
            .await
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromoteBody {
    admin_address: Address,
    member_address: Address,
}

async fn promote_member(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Json(body): Json<PromoteBody>,
) -> Result<Json<MutationReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups
            .promote_to_admin(feed_id, &body.admin_address, &body.member_address)
            .await
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TitleBody {
    admin_address: Address,
    title: String,
}

async fn update_title(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Json(body): Json<TitleBody>,
) -> Result<Json<MutationReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups
            .update_title(feed_id, &body.admin_address, &body.title)
            .await
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptionBody {
    admin_address: Address,
    description: String,
}

async fn update_description(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Json(body): Json<DescriptionBody>,
) -> Result<Json<MutationReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups
            .update_description(feed_id, &body.admin_address, &body.description)
            .await
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnerQuery {
    owner_address: Address,
}

async fn delete_group(
    State(app): State<Arc<App>>,
    Path(feed_id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<MutationReply>, ApiError> {
    let feed_id = parse_feed_id(&feed_id)?;
    with_deadline(app.settings.request_deadline, async {
        app.groups
            .delete_group_feed(feed_id, &query.owner_address)
            .await
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetReadPositionBody {
    feed_id: FeedId,
    block_index: BlockIndex,
}

async fn set_read_position(
    State(app): State<Arc<App>>,
    Path(address): Path<String>,
    Json(body): Json<SetReadPositionBody>,
) -> Result<Json<SetReadPositionReply>, ApiError> {
    let address = Address::from(address);
    with_deadline(app.settings.request_deadline, async {
        app.watermarks
            .set_read_position(&address, body.feed_id, body.block_index)
            .await
    })
    .await
    .map(Json)
}

async fn get_read_positions(
    State(app): State<Arc<App>>,
    Path(address): Path<String>,
) -> Result<Json<HashMap<String, BlockIndex>>, ApiError> {
    let address = Address::from(address);
    with_deadline(app.settings.request_deadline, async {
        let positions = app.watermarks.get_read_positions(&address).await?;
        Ok(positions
            .into_iter()
            .map(|(feed_id, block)| (feed_id.to_string(), block))
            .collect())
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterDeviceBody {
    token_id: String,
    platform: models::DevicePlatform,
    token: String,
    #[serde(default)]
    device_name: Option<String>,
}

async fn register_device(
    State(app): State<Arc<App>>,
    Path(address): Path<String>,
    Json(body): Json<RegisterDeviceBody>,
) -> Result<Json<MutationReply>, ApiError> {
    let now = chrono::Utc::now();
    let token = DeviceToken {
        token_id: body.token_id,
        address: Address::from(address),
        platform: body.platform,
        token: body.token,
        device_name: body.device_name,
        created_at: now,
        last_used_at: now,
        is_active: true,
    };
    with_deadline(app.settings.request_deadline, async {
        app.devices.register(token).await?;
        Ok(MutationReply {
            success: true,
            message: "device token registered".to_string(),
        })
    })
    .await
    .map(Json)
}

async fn list_devices(
    State(app): State<Arc<App>>,
    Path(address): Path<String>,
) -> Result<Json<Vec<DeviceToken>>, ApiError> {
    let address = Address::from(address);
    with_deadline(app.settings.request_deadline, async {
        app.devices.list(&address).await
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupDevicesBody {
    unused_since: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanupDevicesReply {
    deactivated: u64,
}

async fn cleanup_devices(
    State(app): State<Arc<App>>,
    Json(body): Json<CleanupDevicesBody>,
) -> Result<Json<CleanupDevicesReply>, ApiError> {
    with_deadline(app.settings.request_deadline, async {
        let deactivated = app.devices.deactivate_stale(body.unused_since).await?;
        Ok(CleanupDevicesReply { deactivated })
    })
    .await
    .map(Json)
}

async fn remove_device(
    State(app): State<Arc<App>>,
    Path((address, token_id)): Path<(String, String)>,
) -> Result<Json<MutationReply>, ApiError> {
    let address = Address::from(address);
    with_deadline(app.settings.request_deadline, async {
        let removed = app.devices.remove(&address, &token_id).await?;
        Ok(MutationReply {
            success: removed,
            message: if removed {
                "device token removed".to_string()
            } else {
                "no such device token".to_string()
            },
        })
    })
    .await
    .map(Json)
}

#[tracing::instrument(skip_all)]
async fn prometheus_metrics() -> (StatusCode, String) {
    match prometheus::TextEncoder::new().encode_to_string(&prometheus::default_registry().gather())
    {
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        Ok(body) => (StatusCode::OK, body),
    }
}
