use super::Context;
use crate::common::types::AnyError;

/// ボットの招待リンクを表示します
#[poise::command(slash_command, prefix_command)]
pub async fn invite(ctx: Context<'_>) -> Result<(), AnyError> {
    let reply = invite_reply(ctx.data().invite_link.as_deref());
    ctx.say(reply).await?;
    Ok(())
}

fn invite_reply(link: Option<&str>) -> String {
    match link.map(str::trim).filter(|l| !l.is_empty()) {
        Some(link) => format!("招待リンクはこちら: {}", link),
        None => "招待リンクは設定されていません。".to_string(),
    }
}
