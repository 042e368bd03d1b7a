use std::sync::Arc;

use tracing::{error, warn};

use crate::{
    common::{
        errors::SessionError,
        types::{AnyError, GuildId},
    },
    session::SessionRegistry,
};

mod invite;
mod start;
mod stop;

pub use invite::invite;
pub use start::start;
pub use stop::stop;

/// State shared with every command invocation.
pub struct Data {
    pub registry: Arc<SessionRegistry>,
    pub invite_link: Option<String>,
}

pub type Context<'a> = poise::Context<'a, Data, AnyError>;

pub fn all() -> Vec<poise::Command<Data, AnyError>> {
    vec![start(), stop(), invite()]
}

/// The reply shown to the user for a failed `start` or `stop`.
pub fn error_reply(error: &SessionError) -> String {
    match error {
        SessionError::AlreadyConnected(_) => {
            "すでにボイスチャンネルに接続しています。移動する場合は先に /stop してください。"
                .to_string()
        }
        SessionError::NotConnected(_) => {
            "現在どのボイスチャンネルにも接続していません。".to_string()
        }
        SessionError::NoChannelForUser => "まず先にボイスチャンネルに参加してください。".to_string(),
        SessionError::ConnectionFailure(e) => format!(
            "ボイス接続中にエラーが発生しました。ボットに『接続』と『発言』権限があるか確認してください。({})",
            e
        ),
        SessionError::PlaybackInitFailure(e) => format!("音声を再生できませんでした: {}", e),
    }
}

/// Logs environment-level failures, then maps the error to its reply.
pub fn failure_reply(guild_id: GuildId, error: &SessionError) -> String {
    if !error.is_user_error() {
        warn!("[{}] {}", guild_id, error);
    }
    error_reply(error)
}

/// Logs framework-level failures and tells the user something went wrong.
pub async fn on_error(error: poise::FrameworkError<'_, Data, AnyError>) {
    match error {
        poise::FrameworkError::Setup { error, .. } => {
            error!("Failed to start the bot: {}", error);
        }
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!("Command '{}' failed: {}", ctx.command().name, error);
            if let Err(e) = ctx.say("コマンドの実行中にエラーが発生しました。").await {
                warn!("Could not report the error to the user: {}", e);
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!("Error while handling a framework error: {}", e);
            }
        }
    }
}
