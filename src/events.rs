use poise::serenity_prelude as serenity;
use tracing::{info, warn};

use crate::{
    commands::Data,
    common::types::{AnyError, GuildId},
};

/// The guild the bot itself was disconnected from, if this voice state
/// update says so.
pub fn departed_guild(
    bot_id: serenity::UserId,
    user_id: serenity::UserId,
    guild_id: Option<serenity::GuildId>,
    channel_id: Option<serenity::ChannelId>,
) -> Option<GuildId> {
    if user_id != bot_id || channel_id.is_some() {
        return None;
    }
    guild_id.map(GuildId::from)
}

pub async fn handle(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, AnyError>,
    data: &Data,
) -> Result<(), AnyError> {
    match event {
        serenity::FullEvent::Ready { data_about_bot } => {
            info!(
                "Logged in as {} ({} guild(s))",
                data_about_bot.user.name,
                data_about_bot.guilds.len()
            );
        }
        serenity::FullEvent::VoiceStateUpdate { new, .. } => {
            let bot_id = ctx.cache.current_user().id;
            if let Some(guild_id) = departed_guild(bot_id, new.user_id, new.guild_id, new.channel_id)
            {
                // After a /stop the session is already gone and this is a no-op.
                if data.registry.disconnected(guild_id) {
                    warn!("[{}] Bot was disconnected from voice; closing session", guild_id);
                }
            }
        }
        _ => {}
    }
    Ok(())
}
