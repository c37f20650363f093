//! Group chat: text messages and emoji reactions.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use sesh_core::{Event, GatewayError};

use super::current_group;
use crate::dispatch::{CommandContext, CommandHandler};
use crate::validation::{MessagePayload, ReactionPayload};

/// `SendMessage`.
pub struct SendMessage;

#[async_trait]
impl CommandHandler for SendMessage {
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError> {
        ctx.gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            let payload = MessagePayload::parse(data)?;
            let _ = reg.broadcast(
                &group_id,
                Event::GroupMessage,
                json!({
                    "group_id": group_id,
                    "author_session_id": ctx.session_id,
                    "message": {
                        "content": payload.content,
                        "timestamp": Utc::now().timestamp_millis(),
                    },
                }),
                &[],
            );
            Ok(())
        })
    }
}

/// `SendReaction`.
pub struct SendReaction;

#[async_trait]
impl CommandHandler for SendReaction {
    async fn handle(&self, ctx: &CommandContext, data: Option<Value>) -> Result<(), GatewayError> {
        ctx.gateway.with_registry(|reg| {
            let group_id = current_group(reg, &ctx.session_id)?;
            let payload = ReactionPayload::parse(data)?;
            let _ = reg.broadcast(
                &group_id,
                Event::GroupReaction,
                json!({
                    "group_id": group_id,
                    "author_session_id": ctx.session_id,
                    "emoji": payload.emoji,
                }),
                &[],
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sesh_core::Op;
    use sesh_settings::GatewaySettings;

    use crate::test_support::{TestClient, gateway_with};

    #[tokio::test]
    async fn message_reaches_every_member() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut a = TestClient::ready(&gateway);
        let mut b = TestClient::ready(&gateway);
        a.send(&gateway, Op::CreateGroup, json!({})).await;
        let group_id = a.next_event("JOINED_GROUP").await["group_id"].clone();
        b.send(&gateway, Op::Join, json!({ "group_id": group_id })).await;
        a.drain();
        b.drain();

        b.send(&gateway, Op::SendMessage, json!({ "content": "hi" })).await;
        let author = b.session_id.to_string();
        for client in [&mut a, &mut b] {
            let message = client.next_event("GROUP_MESSAGE").await;
            assert_eq!(message["author_session_id"], author.as_str());
            assert_eq!(message["message"]["content"], "hi");
            assert!(message["message"]["timestamp"].as_i64().unwrap() > 0);
        }
    }

    #[tokio::test]
    async fn message_bounds_and_membership() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut a = TestClient::ready(&gateway);
        a.send(&gateway, Op::SendMessage, json!({ "content": "hi" })).await;
        assert_eq!(a.next_event("GROUP_ACTION_ERROR").await["code"], "NOT_IN_GROUP");

        a.send(&gateway, Op::CreateGroup, json!({})).await;
        a.drain();
        a.send(&gateway, Op::SendMessage, json!({ "content": "" })).await;
        assert_eq!(a.next_event("GROUP_ACTION_ERROR").await["code"], "INVALID_DATA");
        a.send(&gateway, Op::SendMessage, json!({ "content": "x".repeat(1025) })).await;
        assert_eq!(a.next_event("GROUP_ACTION_ERROR").await["code"], "INVALID_DATA");
    }

    #[tokio::test]
    async fn reaction_requires_emoji() {
        let gateway = gateway_with(GatewaySettings::default());
        let mut a = TestClient::ready(&gateway);
        a.send(&gateway, Op::CreateGroup, json!({})).await;
        a.drain();

        a.send(&gateway, Op::SendReaction, json!({ "emoji": "lol" })).await;
        assert_eq!(a.next_event("GROUP_ACTION_ERROR").await["code"], "INVALID_DATA");

        a.send(&gateway, Op::SendReaction, json!({ "emoji": "🔥" })).await;
        assert_eq!(a.next_event("GROUP_REACTION").await["emoji"], "🔥");
    }
}
