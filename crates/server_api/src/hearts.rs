use chrono::{DateTime, Utc};
use shared::{
    error::ApiError,
    protocol::{CountResponse, HeartNotice, HeartSentResponse, HeartSummary, ServerEvent},
    validation::{validate_heart, validate_user_id},
};
use tracing::debug;

use crate::{internal, ApiContext, Audience, Dispatch};

/// Records a heart and notifies the receiver when both users are known.
pub async fn send_heart(
    ctx: &ApiContext,
    sender_id: i64,
    receiver_id: i64,
    now: DateTime<Utc>,
) -> Result<Dispatch<HeartSentResponse>, ApiError> {
    let (sender, receiver) = validate_heart(sender_id, receiver_id)?;
    ctx.storage
        .upsert_heart(sender, receiver, now)
        .await
        .map_err(internal)?;

    let mut dispatch = Dispatch::new(HeartSentResponse {
        success: true,
        receiver_id: receiver,
    });
    let sender_name = ctx.storage.username_for_user(sender).await.map_err(internal)?;
    let receiver_known = ctx
        .storage
        .username_for_user(receiver)
        .await
        .map_err(internal)?
        .is_some();
    match sender_name {
        Some(sender_username) if receiver_known => {
            dispatch.push(
                Audience::User(receiver),
                ServerEvent::HeartNotification {
                    notice: HeartNotice {
                        sender_id: sender,
                        message: format!("{sender_username} sent you a heart!"),
                        sender_username,
                        receiver_id: receiver,
                        timestamp: now,
                    },
                },
            );
        }
        _ => debug!(sender = sender.0, receiver = receiver.0, "heart stored without notification"),
    }
    Ok(dispatch)
}

pub async fn list_hearts(ctx: &ApiContext, user_id: i64) -> Result<Vec<HeartSummary>, ApiError> {
    let user_id = validate_user_id(user_id)?;
    let hearts = ctx.storage.list_hearts(user_id).await.map_err(internal)?;
    Ok(hearts
        .into_iter()
        .map(|heart| HeartSummary {
            id: heart.id,
            sender_id: heart.sender_id,
            sender_username: heart.sender_username,
            sender_avatar: heart.sender_avatar,
            is_read: heart.is_read,
            created_at: heart.created_at,
        })
        .collect())
}

pub async fn mark_hearts_read(ctx: &ApiContext, user_id: i64) -> Result<CountResponse, ApiError> {
    let user_id = validate_user_id(user_id)?;
    let count = ctx
        .storage
        .mark_hearts_read(user_id)
        .await
        .map_err(internal)?;
    Ok(CountResponse {
        success: true,
        count,
    })
}

pub async fn clear_hearts(ctx: &ApiContext, user_id: i64) -> Result<CountResponse, ApiError> {
    let user_id = validate_user_id(user_id)?;
    let count = ctx.storage.clear_hearts(user_id).await.map_err(internal)?;
    Ok(CountResponse {
        success: true,
        count,
    })
}

#[cfg(test)]
#[path = "tests/hearts_tests.rs"]
mod tests;
