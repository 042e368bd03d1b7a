use tracing::info;

use super::{Context, failure_reply};
use crate::{
    chime::ClipLibrary,
    common::types::{AnyError, ChannelId},
    session::SessionSnapshot,
};

/// あなたがいるボイスチャンネルに参加します（毎正時に時報を流します）
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn start(ctx: Context<'_>) -> Result<(), AnyError> {
    let Some(guild_id) = ctx.guild_id() else {
        ctx.say("このコマンドはサーバー内でのみ使用できます。").await?;
        return Ok(());
    };

    let channel_id: Option<ChannelId> = ctx.guild().and_then(|guild| {
        guild
            .voice_states
            .get(&ctx.author().id)
            .and_then(|state| state.channel_id)
            .map(ChannelId::from)
    });

    let registry = &ctx.data().registry;
    let reply = match registry.start(guild_id.into(), channel_id).await {
        Ok(session) => {
            info!(
                "[{}] {} started chimes in channel {}",
                session.guild_id,
                ctx.author().name,
                session.channel_id
            );
            let mut reply = joined_reply(&session);
            if let Some(notice) = missing_clips_notice(registry.clips()) {
                reply.push('\n');
                reply.push_str(&notice);
            }
            reply
        }
        Err(e) => failure_reply(guild_id.into(), &e),
    };

    ctx.say(reply).await?;
    Ok(())
}

fn joined_reply(session: &SessionSnapshot) -> String {
    format!(
        "<#{}> に参加しました（接続時刻: {}）。毎正時に時報を流します。",
        session.channel_id,
        session.connected_since()
    )
}

/// Warns about absent clip files; those hours are skipped.
fn missing_clips_notice(clips: &ClipLibrary) -> Option<String> {
    let missing = clips.missing();
    if missing.is_empty() {
        return None;
    }
    let list = missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "注意: 音声ファイルが見つかりません (`{}` 内の {})。該当する時刻の時報はスキップされます。",
        clips.dir().display(),
        list
    ))
}
