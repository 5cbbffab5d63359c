//! Live Discord transport using serenity's HTTP client. The gateway is not
//! needed: importing is plain REST traffic. Mentions are rendered in the
//! text but notifications are suppressed on every send, so replaying an
//! archive never pings anyone.

use super::{ChannelRef, Directory, MessageRef, Transport, TransportError};
use crate::config::DiscordConfig;
use crate::convert::assemble::{EmbedPart, SendPayload};
use async_trait::async_trait;
use serenity::all::{
    ChannelId, ChannelType, CreateAllowedMentions, CreateAttachment, CreateChannel, CreateEmbed,
    CreateMessage, GuildId, MessageId, MessageReference, UserId,
};
use serenity::http::{Http, HttpError};
use std::collections::HashMap;
use std::sync::Arc;

const MEMBER_PAGE_SIZE: u64 = 1000;

/// Snapshot of guild members and text channels taken once at connect time.
pub struct GuildDirectory {
    /// lowercased member name/nick → user id
    users: HashMap<String, u64>,
    /// lowercased channel name → channel id
    channels: HashMap<String, u64>,
    allow_broadcast: bool,
}

impl Directory for GuildDirectory {
    fn lookup_user(&self, name: &str) -> Option<u64> {
        self.users.get(&name.to_lowercase()).copied()
    }

    fn lookup_channel(&self, name: &str) -> Option<u64> {
        self.channels.get(&name.to_lowercase()).copied()
    }

    fn can_broadcast(&self) -> bool {
        self.allow_broadcast
    }
}

pub struct DiscordTransport {
    http: Arc<Http>,
    guild_id: GuildId,
}

impl DiscordTransport {
    /// Authenticate and snapshot the guild. An invalid token surfaces here
    /// as `TransportError::Auth`, before any message work starts.
    pub async fn connect(
        config: &DiscordConfig,
    ) -> Result<(Self, GuildDirectory), TransportError> {
        let http = Arc::new(Http::new(&config.bot_token));

        let me = http
            .get_current_user()
            .await
            .map_err(|e| TransportError::Auth(format!("token check failed: {e}")))?;
        tracing::info!("Connected to Discord as {}", me.name);

        let guild_id = GuildId::new(config.guild_id);
        let channels = snapshot_channels(&http, guild_id).await?;
        let users = snapshot_members(&http, guild_id).await?;
        tracing::info!(
            "Guild snapshot: {} text channels, {} member names",
            channels.len(),
            users.len()
        );

        Ok((
            Self { http, guild_id },
            GuildDirectory {
                users,
                channels,
                allow_broadcast: config.allow_broadcast,
            },
        ))
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    async fn ensure_channel(
        &self,
        name: &str,
        create_missing: bool,
    ) -> Result<ChannelRef, TransportError> {
        let channels = self
            .guild_id
            .channels(&self.http)
            .await
            .map_err(map_serenity_err)?;

        if let Some(channel) = channels
            .values()
            .find(|c| c.kind == ChannelType::Text && c.name.eq_ignore_ascii_case(name))
        {
            return Ok(ChannelRef {
                id: channel.id.get(),
                name: channel.name.clone(),
            });
        }

        if !create_missing {
            return Err(TransportError::PayloadRejected(format!(
                "channel #{name} does not exist and channel creation is disabled"
            )));
        }

        tracing::info!("Creating channel #{name}");
        let created = self
            .guild_id
            .create_channel(
                self.http.as_ref(),
                CreateChannel::new(name)
                    .kind(ChannelType::Text)
                    .audit_log_reason("Importing Slack channel"),
            )
            .await
            .map_err(map_serenity_err)?;

        Ok(ChannelRef {
            id: created.id.get(),
            name: created.name,
        })
    }

    async fn send(
        &self,
        channel: &ChannelRef,
        payload: &SendPayload,
    ) -> Result<MessageRef, TransportError> {
        // Render mentions without notifying anyone
        let mut builder = CreateMessage::new().allowed_mentions(CreateAllowedMentions::new());

        if let Some(content) = &payload.content {
            builder = builder.content(content);
        }

        if let Some(reply) = payload.reply_to {
            builder = builder.reference_message(MessageReference::from((
                ChannelId::new(reply.channel_id),
                MessageId::new(reply.message_id),
            )));
        }

        let mut embeds: Vec<CreateEmbed> = payload.embeds.iter().map(build_embed).collect();
        builder = match embeds.len() {
            0 => builder,
            // One fragment renders as a single block
            1 => builder.embed(embeds.remove(0)),
            _ => builder.embeds(embeds),
        };

        for upload in &payload.uploads {
            builder = builder.add_file(CreateAttachment::bytes(
                upload.bytes.clone(),
                upload.filename.clone(),
            ));
        }

        let message = ChannelId::new(channel.id)
            .send_message(self.http.as_ref(), builder)
            .await
            .map_err(map_serenity_err)?;

        Ok(MessageRef {
            channel_id: channel.id,
            message_id: message.id.get(),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_embed(part: &EmbedPart) -> CreateEmbed {
    let mut embed = CreateEmbed::new();
    if let Some(title) = &part.title {
        embed = embed.title(title);
    }
    if let Some(description) = &part.description {
        embed = embed.description(description);
    }
    if let Some(filename) = &part.image_attachment {
        embed = embed.attachment(filename);
    }
    embed
}

async fn snapshot_channels(
    http: &Http,
    guild_id: GuildId,
) -> Result<HashMap<String, u64>, TransportError> {
    let channels = guild_id.channels(http).await.map_err(map_serenity_err)?;
    Ok(channels
        .values()
        .filter(|c| c.kind == ChannelType::Text)
        .map(|c| (c.name.to_lowercase(), c.id.get()))
        .collect())
}

async fn snapshot_members(
    http: &Http,
    guild_id: GuildId,
) -> Result<HashMap<String, u64>, TransportError> {
    let mut users = HashMap::new();
    let mut after: Option<UserId> = None;
    loop {
        let page = guild_id
            .members(http, Some(MEMBER_PAGE_SIZE), after)
            .await
            .map_err(map_serenity_err)?;
        let page_len = page.len() as u64;
        after = page.last().map(|m| m.user.id);

        for member in page {
            let id = member.user.id.get();
            users.insert(member.user.name.to_lowercase(), id);
            if let Some(global) = &member.user.global_name {
                users.insert(global.to_lowercase(), id);
            }
            if let Some(nick) = &member.nick {
                users.insert(nick.to_lowercase(), id);
            }
        }

        if page_len < MEMBER_PAGE_SIZE {
            break;
        }
    }
    Ok(users)
}

fn map_serenity_err(err: serenity::Error) -> TransportError {
    match &err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            match response.status_code.as_u16() {
                401 | 403 => TransportError::Auth(response.error.message.clone()),
                429 => TransportError::RateLimited { retry_after: None },
                400..=499 => TransportError::PayloadRejected(response.error.message.clone()),
                _ => TransportError::Transient(err.to_string()),
            }
        }
        _ => TransportError::Transient(err.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
