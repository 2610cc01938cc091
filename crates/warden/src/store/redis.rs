//! Redis store backend.
//!
//! Pending challenges are hashes so single fields (attempts, prompt) can be
//! updated in place by a script that refuses to resurrect deleted records.
//! Every record is also listed in an index set, which the recovery sweep
//! walks after a restart.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use warden_common::constants::PENDING_GRACE_SECS;
use warden_common::constants::redis_keys::{MUTE_INDEX, MUTE_PREFIX, PENDING_INDEX, PENDING_PREFIX};
use warden_common::{
    ChatId, DeliveryMode, MessageRef, MuteRecord, PendingChallenge, StoreError, UserId,
};

use super::Store;

/// HINCRBY on a missing key would create it, so check first
const INCREMENT_IF_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return redis.call('HINCRBY', KEYS[1], 'attempts', 1)
end
return -1
"#;

const ATTACH_IF_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  redis.call('HSET', KEYS[1], 'prompt_chat', ARGV[1], 'prompt_id', ARGV[2])
  return 1
end
return 0
"#;

pub struct RedisStore {
    /// Connection manager (auto-reconnecting)
    conn: ConnectionManager,
    increment_script: redis::Script,
    attach_script: redis::Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!(url = %url, "Redis connected");

        Ok(Self {
            conn,
            increment_script: redis::Script::new(INCREMENT_IF_EXISTS),
            attach_script: redis::Script::new(ATTACH_IF_EXISTS),
        })
    }
}

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn index_member(user: UserId, chat: ChatId) -> String {
    format!("{chat}:{user}")
}

fn parse_index_member(member: &str) -> Option<(UserId, ChatId)> {
    let (chat, user) = member.split_once(':')?;
    Some((UserId(user.parse().ok()?), ChatId(chat.parse().ok()?)))
}

fn pending_key(user: UserId, chat: ChatId) -> String {
    format!("{PENDING_PREFIX}{}", index_member(user, chat))
}

fn mute_key(user: UserId, chat: ChatId) -> String {
    format!("{MUTE_PREFIX}{}", index_member(user, chat))
}

fn encode_pending(record: &PendingChallenge) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("challenge", record.challenge.to_string()),
        ("expires_at", record.expires_at.timestamp_millis().to_string()),
        ("attempts", record.attempts.to_string()),
        ("mode", record.mode.as_str().to_string()),
        ("member_name", record.member_name.clone()),
    ];
    if let Some(prompt) = record.prompt {
        fields.push(("prompt_chat", prompt.chat_id.to_string()));
        fields.push(("prompt_id", prompt.message_id.to_string()));
    }
    fields
}

fn decode_pending(
    key: &str,
    user: UserId,
    chat: ChatId,
    fields: &HashMap<String, String>,
) -> Result<PendingChallenge, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };
    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| corrupt(format!("missing field {name}")))
    };

    let challenge = field("challenge")?
        .parse()
        .map_err(|e| corrupt(format!("challenge: {e}")))?;
    let expires_at = decode_millis(field("expires_at")?).ok_or_else(|| corrupt("expires_at".into()))?;
    let attempts = field("attempts")?
        .parse()
        .map_err(|_| corrupt("attempts".into()))?;

    let prompt = match (fields.get("prompt_chat"), fields.get("prompt_id")) {
        (Some(prompt_chat), Some(prompt_id)) => {
            let chat_id = prompt_chat.parse().map_err(|_| corrupt("prompt_chat".into()))?;
            let message_id = prompt_id.parse().map_err(|_| corrupt("prompt_id".into()))?;
            Some(MessageRef::new(ChatId(chat_id), message_id))
        }
        _ => None,
    };

    // Records written without a mode: a group prompt means in-chat
    let mode = match fields.get("mode") {
        Some(mode) => mode
            .parse()
            .map_err(|e| corrupt(format!("mode: {e}")))?,
        None if prompt.is_some_and(|p| p.chat_id == chat) => DeliveryMode::InChat,
        None => DeliveryMode::Private,
    };

    Ok(PendingChallenge {
        user_id: user,
        chat_id: chat,
        challenge,
        expires_at,
        attempts,
        mode,
        prompt,
        member_name: fields.get("member_name").cloned().unwrap_or_default(),
    })
}

fn decode_millis(value: &str) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(value.parse().ok()?)
}

#[async_trait]
impl Store for RedisStore {
    async fn upsert_pending(&self, record: &PendingChallenge) -> Result<(), StoreError> {
        let key = pending_key(record.user_id, record.chat_id);
        let fields = encode_pending(record);
        let ttl = (record.expires_at - Utc::now()).num_seconds().max(0) + PENDING_GRACE_SECS;

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .expire(&key, ttl)
            .ignore()
            .sadd(PENDING_INDEX, index_member(record.user_id, record.chat_id))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn get_pending(
        &self,
        user: UserId,
        chat: ChatId,
    ) -> Result<Option<PendingChallenge>, StoreError> {
        let key = pending_key(user, chat);
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(&key).await.map_err(backend)?;

        if fields.is_empty() {
            return Ok(None);
        }

        decode_pending(&key, user, chat, &fields).map(Some)
    }

    async fn delete_pending(&self, user: UserId, chat: ChatId) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(pending_key(user, chat))
            .srem(PENDING_INDEX, index_member(user, chat))
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(removed > 0)
    }

    async fn increment_attempts(
        &self,
        user: UserId,
        chat: ChatId,
    ) -> Result<Option<u32>, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = self
            .increment_script
            .key(pending_key(user, chat))
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(u32::try_from(count).ok())
    }

    async fn attach_prompt(
        &self,
        user: UserId,
        chat: ChatId,
        prompt: MessageRef,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let attached: i64 = self
            .attach_script
            .key(pending_key(user, chat))
            .arg(prompt.chat_id.0)
            .arg(prompt.message_id)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(attached == 1)
    }

    async fn list_pending(&self) -> Result<Vec<PendingChallenge>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(PENDING_INDEX).await.map_err(backend)?;

        let mut records = Vec::with_capacity(members.len());
        for member in members {
            let Some((user, chat)) = parse_index_member(&member) else {
                tracing::warn!(member = %member, "Dropping malformed pending index entry");
                let _: () = conn.srem(PENDING_INDEX, &member).await.map_err(backend)?;
                continue;
            };

            match self.get_pending(user, chat).await {
                Ok(Some(record)) => records.push(record),
                // Hash expired on its own, the index entry is stale
                Ok(None) => {
                    let _: () = conn.srem(PENDING_INDEX, &member).await.map_err(backend)?;
                }
                Err(StoreError::Corrupt { key, reason }) => {
                    tracing::warn!(key = %key, reason = %reason, "Skipping corrupt pending record");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(records)
    }

    async fn upsert_mute(&self, record: &MuteRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .set(
                mute_key(record.user_id, record.chat_id),
                record.until.timestamp_millis(),
            )
            .ignore()
            .sadd(MUTE_INDEX, index_member(record.user_id, record.chat_id))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn get_mute(&self, user: UserId, chat: ChatId) -> Result<Option<MuteRecord>, StoreError> {
        let key = mute_key(user, chat);
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(&key).await.map_err(backend)?;

        let Some(value) = value else {
            return Ok(None);
        };

        let until = decode_millis(&value).ok_or_else(|| StoreError::Corrupt {
            key: key.clone(),
            reason: format!("invalid deadline {value}"),
        })?;

        Ok(Some(MuteRecord {
            user_id: user,
            chat_id: chat,
            until,
        }))
    }

    async fn delete_mute(&self, user: UserId, chat: ChatId) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(mute_key(user, chat))
            .srem(MUTE_INDEX, index_member(user, chat))
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(removed > 0)
    }

    async fn list_mutes(&self) -> Result<Vec<MuteRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(MUTE_INDEX).await.map_err(backend)?;

        let mut records = Vec::with_capacity(members.len());
        for member in members {
            let Some((user, chat)) = parse_index_member(&member) else {
                tracing::warn!(member = %member, "Dropping malformed mute index entry");
                let _: () = conn.srem(MUTE_INDEX, &member).await.map_err(backend)?;
                continue;
            };

            match self.get_mute(user, chat).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    let _: () = conn.srem(MUTE_INDEX, &member).await.map_err(backend)?;
                }
                Err(StoreError::Corrupt { key, reason }) => {
                    tracing::warn!(key = %key, reason = %reason, "Skipping corrupt mute record");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(records)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_common::Challenge;

    fn as_map(fields: Vec<(&'static str, String)>) -> HashMap<String, String> {
        fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(
            pending_key(UserId(42), ChatId(-1001)),
            "warden:pending:-1001:42"
        );
        assert_eq!(mute_key(UserId(42), ChatId(-1001)), "warden:mute:-1001:42");
        assert_eq!(
            parse_index_member("-1001:42"),
            Some((UserId(42), ChatId(-1001)))
        );
        assert_eq!(parse_index_member("garbage"), None);
        assert_eq!(parse_index_member("-1001:"), None);
    }

    #[test]
    fn test_decode_keeps_prompt_and_attempts() {
        let expires_at = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        let record = PendingChallenge {
            user_id: UserId(42),
            chat_id: ChatId(-1001),
            challenge: Challenge::new(9, 4).unwrap(),
            expires_at,
            attempts: 2,
            mode: DeliveryMode::Private,
            prompt: Some(MessageRef::new(ChatId(42), 7)),
            member_name: "@ada".into(),
        };

        let fields = as_map(encode_pending(&record));
        let decoded = decode_pending("k", UserId(42), ChatId(-1001), &fields).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_rejects_bad_challenge() {
        let mut fields = HashMap::new();
        fields.insert("challenge".to_string(), "9:4".to_string());
        fields.insert("expires_at".to_string(), "0".to_string());
        fields.insert("attempts".to_string(), "0".to_string());

        let err = decode_pending("k", UserId(1), ChatId(-1), &fields).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_decode_without_prompt() {
        let mut fields = HashMap::new();
        fields.insert("challenge".to_string(), "1+2".to_string());
        fields.insert("expires_at".to_string(), "1700000000000".to_string());
        fields.insert("attempts".to_string(), "1".to_string());

        let decoded = decode_pending("k", UserId(1), ChatId(-1), &fields).unwrap();
        assert_eq!(decoded.prompt, None);
        assert_eq!(decoded.attempts, 1);
        assert_eq!(decoded.member_name, "");
        assert_eq!(decoded.mode, DeliveryMode::Private);
    }

    #[test]
    fn test_decode_infers_mode_from_group_prompt() {
        let mut fields = HashMap::new();
        fields.insert("challenge".to_string(), "1+2".to_string());
        fields.insert("expires_at".to_string(), "1700000000000".to_string());
        fields.insert("attempts".to_string(), "0".to_string());
        fields.insert("prompt_chat".to_string(), "-1".to_string());
        fields.insert("prompt_id".to_string(), "9".to_string());

        let decoded = decode_pending("k", UserId(1), ChatId(-1), &fields).unwrap();
        assert_eq!(decoded.mode, DeliveryMode::InChat);

        fields.insert("mode".to_string(), "private".to_string());
        let decoded = decode_pending("k", UserId(1), ChatId(-1), &fields).unwrap();
        assert_eq!(decoded.mode, DeliveryMode::Private);
    }
}
