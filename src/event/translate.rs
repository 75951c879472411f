//! Dispatch-to-event translation.
//!
//! Each arm applies exactly the cache mutation its dispatch implies, then builds
//! the event from the resulting records. Update events capture the cached state
//! before the mutation.

use super::{Event, TranslateError};
use crate::cache::{Cache, Resolution};
use crate::gateway::dispatch::{
    Dispatch, GuildMember, GuildRole, GuildRoleDelete, GuildUser, MessageDelete,
    MessageDeleteBulk, PresenceUpdate, Ready,
};
use crate::model::{Channel, ChannelPacket, Member, Record as _};
use crate::types::Snowflake;

/// Apply `dispatch` to `cache` and build the matching [`Event`].
///
/// Fails without touching the cache when the dispatch needs a guild that is
/// unknown or pending.
pub fn translate(cache: &Cache, dispatch: Dispatch) -> Result<Event, TranslateError> {
    let event = match dispatch {
        Dispatch::Ready(ready) => {
            let Ready {
                user,
                private_channels,
                guilds,
                session_id,
                ..
            } = *ready;

            let user = cache.pull_current_user(user);
            for channel in private_channels {
                cache.pull_channel(channel);
            }
            for guild in &guilds {
                cache.add_pending_guild(guild.id);
            }

            Event::Ready {
                user,
                guilds: guilds.iter().map(|guild| guild.id).collect(),
                session_id,
            }
        }
        Dispatch::Resumed(_) => Event::Resumed,

        Dispatch::GuildCreate(packet) => {
            if packet.unavailable == Some(true) {
                cache.demote_guild(packet.id);
                return Ok(Event::GuildUnavailable { id: packet.id });
            }

            match cache.pull_guild(*packet) {
                (guild, Resolution::Joined) => Event::GuildJoin(guild),
                (guild, _) => Event::GuildAvailable(guild),
            }
        }
        Dispatch::GuildUpdate(packet) => {
            let id = packet.id;
            let change = cache
                .update_guild(id, |guild| guild.merge(*packet))
                .ok_or(TranslateError::MissingGuild(id))?;

            Event::GuildUpdate {
                before: change.before,
                after: change.after,
            }
        }
        Dispatch::GuildDelete(guild) if guild.is_outage() => {
            cache.demote_guild(guild.id);
            Event::GuildUnavailable { id: guild.id }
        }
        Dispatch::GuildDelete(guild) => Event::GuildRemove {
            id: guild.id,
            guild: cache.remove_guild(guild.id),
        },

        Dispatch::GuildBanAdd(GuildUser { guild_id, user }) => Event::Ban {
            guild_id,
            user: cache.pull_user(user),
        },
        Dispatch::GuildBanRemove(GuildUser { guild_id, user }) => Event::Unban {
            guild_id,
            user: cache.pull_user(user),
        },
        Dispatch::GuildEmojisUpdate(update) => {
            let guild_id = update.guild_id;
            let change = cache
                .update_guild(guild_id, |guild| guild.replace_emojis(update.emojis))
                .ok_or(TranslateError::MissingGuild(guild_id))?;

            Event::EmojisUpdate {
                guild_id,
                before: change.before.emojis.clone(),
                after: change.after.emojis.clone(),
            }
        }

        Dispatch::GuildMemberAdd(GuildMember { guild_id, member }) => {
            require_guild(cache, guild_id)?;
            let user = cache.pull_user(member.user.clone());
            let change = cache
                .update_guild(guild_id, |guild| {
                    let member = Member::from_packet(member);
                    if guild.members.insert(member.user_id, member.clone()).is_none() {
                        guild.member_count += 1;
                    }
                    member
                })
                .ok_or(TranslateError::MissingGuild(guild_id))?;

            Event::MemberJoin {
                guild_id,
                user,
                member: change.output,
            }
        }
        Dispatch::GuildMemberUpdate(GuildMember { guild_id, member }) => {
            require_guild(cache, guild_id)?;
            cache.pull_user(member.user.clone());
            let change = cache
                .update_guild(guild_id, |guild| {
                    let user_id = member.user.id;
                    let before = guild.members.get(&user_id).cloned();
                    let after = match guild.members.get_mut(&user_id) {
                        Some(existing) => {
                            existing.merge(member);
                            existing.clone()
                        }
                        None => {
                            let created = Member::from_packet(member);
                            guild.members.insert(user_id, created.clone());
                            created
                        }
                    };
                    (before, after)
                })
                .ok_or(TranslateError::MissingGuild(guild_id))?;
            let (before, after) = change.output;

            Event::MemberUpdate {
                guild_id,
                before,
                after,
            }
        }
        Dispatch::GuildMemberRemove(GuildUser { guild_id, user }) => {
            require_guild(cache, guild_id)?;
            let user = cache.pull_user(user);
            let change = cache
                .update_guild(guild_id, |guild| {
                    let member = guild.members.remove(&user.id);
                    if member.is_some() {
                        guild.member_count = guild.member_count.saturating_sub(1);
                    }
                    member
                })
                .ok_or(TranslateError::MissingGuild(guild_id))?;

            Event::MemberLeave {
                guild_id,
                user,
                member: change.output,
            }
        }

        Dispatch::GuildRoleCreate(GuildRole { guild_id, role }) => {
            cache
                .update_guild(guild_id, |guild| guild.roles.insert(role.id, role.clone()))
                .ok_or(TranslateError::MissingGuild(guild_id))?;
            Event::RoleCreate { guild_id, role }
        }
        Dispatch::GuildRoleUpdate(GuildRole { guild_id, role }) => {
            let change = cache
                .update_guild(guild_id, |guild| guild.roles.insert(role.id, role.clone()))
                .ok_or(TranslateError::MissingGuild(guild_id))?;
            Event::RoleUpdate {
                guild_id,
                before: change.output,
                after: role,
            }
        }
        Dispatch::GuildRoleDelete(GuildRoleDelete { guild_id, role_id }) => {
            let change = cache
                .update_guild(guild_id, |guild| {
                    for member in guild.members.values_mut() {
                        member.roles.retain(|id| *id != role_id);
                    }
                    guild.roles.remove(&role_id)
                })
                .ok_or(TranslateError::MissingGuild(guild_id))?;
            Event::RoleDelete {
                guild_id,
                role_id,
                role: change.output,
            }
        }

        Dispatch::ChannelCreate(packet) => {
            let missing = missing_owner(cache, &packet);
            Event::ChannelCreate(cache.push_channel(*packet).ok_or(missing)?)
        }
        Dispatch::ChannelUpdate(packet) => {
            let missing = missing_owner(cache, &packet);
            let before = cache.channel(packet.id);
            let after = cache.pull_channel(*packet).ok_or(missing)?;
            Event::ChannelUpdate { before, after }
        }
        Dispatch::ChannelDelete(packet) => {
            let channel = match cache.remove_channel(packet.id) {
                Some(channel) => channel,
                None => Channel::from_packet(*packet),
            };
            Event::ChannelDelete(channel)
        }

        Dispatch::MessageCreate(packet) => Event::MessageCreate(cache.push_message(*packet)),
        Dispatch::MessageUpdate(packet) => {
            let (channel_id, message_id) = (packet.channel_id, packet.id);
            let before = cache.message(channel_id, message_id);
            let after = before.is_some().then(|| cache.pull_message(*packet));

            Event::MessageUpdate {
                channel_id,
                message_id,
                before,
                after,
            }
        }
        Dispatch::MessageDelete(MessageDelete { id, channel_id, .. }) => Event::MessageDelete {
            channel_id,
            message_id: id,
            message: cache.remove_message(channel_id, id),
        },
        Dispatch::MessageDeleteBulk(MessageDeleteBulk {
            ids, channel_id, ..
        }) => {
            let messages = ids
                .iter()
                .filter_map(|id| cache.remove_message(channel_id, *id))
                .collect();

            Event::MessageDeleteBulk {
                channel_id,
                message_ids: ids,
                messages,
            }
        }

        Dispatch::MessageReactionAdd(reaction) => Event::ReactionAdd(reaction),
        Dispatch::MessageReactionRemove(reaction) => Event::ReactionRemove(reaction),
        Dispatch::TypingStart(typing) => Event::TypingStart(typing),

        Dispatch::PresenceUpdate(presence) => {
            let PresenceUpdate {
                user,
                guild_id,
                status,
                roles,
                game,
            } = *presence;
            let user = cache.pull_user(user);

            if let (Some(guild_id), Some(roles)) = (guild_id, roles) {
                cache.update_guild(guild_id, |guild| {
                    if let Some(member) = guild.members.get_mut(&user.id) {
                        member.roles = roles;
                    }
                });
            }

            Event::PresenceUpdate {
                user,
                guild_id,
                status,
                game,
            }
        }
        Dispatch::UserUpdate(packet) => {
            let before = cache.current_user();
            let after = cache.pull_current_user(packet);
            Event::UserUpdate { before, after }
        }

        Dispatch::Unknown { name, data } => Event::Unknown { name, data },
    };

    Ok(event)
}

/// Fail before any cache write when the guild is unknown or pending.
fn require_guild(cache: &Cache, guild_id: Snowflake) -> Result<(), TranslateError> {
    match cache.guild(guild_id) {
        Some(_) => Ok(()),
        None => Err(TranslateError::MissingGuild(guild_id)),
    }
}

/// The error to report if `packet` cannot be placed in the cache.
fn missing_owner(cache: &Cache, packet: &ChannelPacket) -> TranslateError {
    match packet.guild_id.or_else(|| cache.channel_guild(packet.id)) {
        Some(guild_id) => TranslateError::MissingGuild(guild_id),
        None => TranslateError::MissingChannel(packet.id),
    }
}
