//! Endpoint routes for the REST API
//!
//! Every route maps to a template (the rate-limit bucket key, shared by all
//! concrete paths of the same shape) and a concrete path.

use std::fmt::Write as _;

/// Path segment used in place of a user id to address the bot itself
pub const CURRENT_USER: &str = "@me";

/// REST endpoint routes
///
/// Emoji segments are expected to be URL-encoded by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Channel { channel_id: u64 },
    ChannelMessage { channel_id: u64, message_id: u64 },
    ChannelMessages { channel_id: u64 },
    ChannelMessageReactions { channel_id: u64, message_id: u64 },
    ChannelMessageReactionsEmoji { channel_id: u64, message_id: u64, emoji: String },
    /// `user_id: None` addresses the bot's own reaction
    ChannelMessageReactionsEmojiUser {
        channel_id: u64,
        message_id: u64,
        emoji: String,
        user_id: Option<u64>,
    },
    ChannelMessagesBulkDelete { channel_id: u64 },
    ChannelPermissionsOverwrite { channel_id: u64, overwrite_id: u64 },
    ChannelInvites { channel_id: u64 },
    ChannelTyping { channel_id: u64 },
    ChannelPins { channel_id: u64 },
    ChannelPinsMessage { channel_id: u64, message_id: u64 },
    GuildEmojis { guild_id: u64 },
    GuildEmoji { guild_id: u64, emoji_id: u64 },
    Guild { guild_id: u64 },
    GuildPreview { guild_id: u64 },
    GuildChannels { guild_id: u64 },
    GuildMembers { guild_id: u64 },
    GuildMember { guild_id: u64, user_id: u64 },
    GuildMemberBotNick { guild_id: u64 },
    GuildMemberRole { guild_id: u64, user_id: u64, role_id: u64 },
    GuildBans { guild_id: u64 },
    GuildBan { guild_id: u64, user_id: u64 },
    Invite { code: String },
}

impl Route {
    /// Route template shared by every concrete path of this shape
    pub fn template(&self) -> &'static str {
        match self {
            Self::Channel { .. } => "/channels/{channel.id}",
            Self::ChannelMessage { .. } => "/channels/{channel.id}/messages/{message.id}",
            Self::ChannelMessages { .. } => "/channels/{channel.id}/messages",
            Self::ChannelMessageReactions { .. } => {
                "/channels/{channel.id}/messages/{message.id}/reactions"
            }
            Self::ChannelMessageReactionsEmoji { .. } => {
                "/channels/{channel.id}/messages/{message.id}/reactions/{emoji}"
            }
            Self::ChannelMessageReactionsEmojiUser { .. } => {
                "/channels/{channel.id}/messages/{message.id}/reactions/{emoji}/{user.id}"
            }
            Self::ChannelMessagesBulkDelete { .. } => "/channels/{channel.id}/messages/bulk-delete",
            Self::ChannelPermissionsOverwrite { .. } => {
                "/channels/{channel.id}/permissions/{overwrite.id}"
            }
            Self::ChannelInvites { .. } => "/channels/{channel.id}/invites",
            Self::ChannelTyping { .. } => "/channels/{channel.id}/typing",
            Self::ChannelPins { .. } => "/channels/{channel.id}/pins",
            Self::ChannelPinsMessage { .. } => "/channels/{channel.id}/pins/{message.id}",
            Self::GuildEmojis { .. } => "/guilds/{guild.id}/emojis",
            Self::GuildEmoji { .. } => "/guilds/{guild.id}/emojis/{emoji.id}",
            Self::Guild { .. } => "/guilds/{guild.id}",
            Self::GuildPreview { .. } => "/guilds/{guild.id}/preview",
            Self::GuildChannels { .. } => "/guilds/{guild.id}/channels",
            Self::GuildMembers { .. } => "/guilds/{guild.id}/members",
            Self::GuildMember { .. } => "/guilds/{guild.id}/members/{user.id}",
            Self::GuildMemberBotNick { .. } => "/guilds/{guild.id}/members/@me/nick",
            Self::GuildMemberRole { .. } => "/guilds/{guild.id}/members/{user.id}/roles/{role.id}",
            Self::GuildBans { .. } => "/guilds/{guild.id}/bans",
            Self::GuildBan { .. } => "/guilds/{guild.id}/bans/{user.id}",
            Self::Invite { .. } => "/invites/{invite.code}",
        }
    }

    /// Concrete request path
    pub fn path(&self) -> String {
        let mut path = String::new();
        // Writing into a String cannot fail
        let _ = match self {
            Self::Channel { channel_id } => write!(path, "/channels/{channel_id}"),
            Self::ChannelMessage { channel_id, message_id } => {
                write!(path, "/channels/{channel_id}/messages/{message_id}")
            }
            Self::ChannelMessages { channel_id } => write!(path, "/channels/{channel_id}/messages"),
            Self::ChannelMessageReactions { channel_id, message_id } => {
                write!(path, "/channels/{channel_id}/messages/{message_id}/reactions")
            }
            Self::ChannelMessageReactionsEmoji { channel_id, message_id, emoji } => {
                write!(path, "/channels/{channel_id}/messages/{message_id}/reactions/{emoji}")
            }
            Self::ChannelMessageReactionsEmojiUser {
                channel_id,
                message_id,
                emoji,
                user_id,
            } => {
                let user = user_id.map_or_else(|| CURRENT_USER.to_string(), |id| id.to_string());
                write!(
                    path,
                    "/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/{user}"
                )
            }
            Self::ChannelMessagesBulkDelete { channel_id } => {
                write!(path, "/channels/{channel_id}/messages/bulk-delete")
            }
            Self::ChannelPermissionsOverwrite { channel_id, overwrite_id } => {
                write!(path, "/channels/{channel_id}/permissions/{overwrite_id}")
            }
            Self::ChannelInvites { channel_id } => write!(path, "/channels/{channel_id}/invites"),
            Self::ChannelTyping { channel_id } => write!(path, "/channels/{channel_id}/typing"),
            Self::ChannelPins { channel_id } => write!(path, "/channels/{channel_id}/pins"),
            Self::ChannelPinsMessage { channel_id, message_id } => {
                write!(path, "/channels/{channel_id}/pins/{message_id}")
            }
            Self::GuildEmojis { guild_id } => write!(path, "/guilds/{guild_id}/emojis"),
            Self::GuildEmoji { guild_id, emoji_id } => {
                write!(path, "/guilds/{guild_id}/emojis/{emoji_id}")
            }
            Self::Guild { guild_id } => write!(path, "/guilds/{guild_id}"),
            Self::GuildPreview { guild_id } => write!(path, "/guilds/{guild_id}/preview"),
            Self::GuildChannels { guild_id } => write!(path, "/guilds/{guild_id}/channels"),
            Self::GuildMembers { guild_id } => write!(path, "/guilds/{guild_id}/members"),
            Self::GuildMember { guild_id, user_id } => {
                write!(path, "/guilds/{guild_id}/members/{user_id}")
            }
            Self::GuildMemberBotNick { guild_id } => {
                write!(path, "/guilds/{guild_id}/members/@me/nick")
            }
            Self::GuildMemberRole { guild_id, user_id, role_id } => {
                write!(path, "/guilds/{guild_id}/members/{user_id}/roles/{role_id}")
            }
            Self::GuildBans { guild_id } => write!(path, "/guilds/{guild_id}/bans"),
            Self::GuildBan { guild_id, user_id } => write!(path, "/guilds/{guild_id}/bans/{user_id}"),
            Self::Invite { code } => write!(path, "/invites/{code}"),
        };
        path
    }
}
