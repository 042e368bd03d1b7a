use tracing::info;

use super::{Context, failure_reply};
use crate::common::types::AnyError;

/// ボイスチャンネルから切断します（時報も停止）
#[poise::command(slash_command, prefix_command, guild_only)]
pub async fn stop(ctx: Context<'_>) -> Result<(), AnyError> {
    let Some(guild_id) = ctx.guild_id() else {
        ctx.say("このコマンドはサーバー内でのみ使用できます。").await?;
        return Ok(());
    };

    let reply = match ctx.data().registry.stop(guild_id.into()).await {
        Ok(()) => {
            info!("[{}] {} stopped chimes", guild_id, ctx.author().name);
            "切断しました。時報も停止しました。".to_string()
        }
        Err(e) => failure_reply(guild_id.into(), &e),
    };

    ctx.say(reply).await?;
    Ok(())
}
