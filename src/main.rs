use std::sync::Arc;

use chimebot::{
    chime::{ClipLibrary, Clock, HourlyScheduler, SystemClock},
    commands::{self, Data},
    common::{
        banner::{BannerInfo, print_banner},
        logger,
        types::AnyResult,
    },
    configs::Config,
    events,
    session::SessionRegistry,
    voice::SongbirdBackend,
};
use poise::serenity_prelude as serenity;
use songbird::SerenityInit;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(&config.logging);
    print_banner(&BannerInfo::default());

    let configured = config.chime.offset()?;
    let clock = SystemClock::detect(configured);
    logger::set_clock(clock.clone());
    match configured {
        Some(offset) => info!("Chiming on fixed UTC offset {}", offset),
        None => info!("Chiming on the host time zone (currently {})", clock.offset()),
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config, clock))
}

async fn run(config: Config, clock: SystemClock) -> AnyResult<()> {
    let clips = Arc::new(ClipLibrary::new(
        config.chime.audio_dir.clone(),
        config.chime.extension.clone(),
    ));
    let missing = clips.missing();
    if !missing.is_empty() {
        warn!(
            "{} clip(s) missing from {}; those hours will be skipped",
            missing.len(),
            clips.dir().display()
        );
    }

    let clock: Arc<dyn Clock> = Arc::new(clock);
    let voice = songbird::Songbird::serenity();
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(SongbirdBackend::new(voice.clone())),
        clips,
        clock.clone(),
    ));

    let shutdown = CancellationToken::new();
    let scheduler = HourlyScheduler::new(
        registry.clone(),
        clock,
        config.chime.tolerance()?,
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    let data = Data {
        registry: registry.clone(),
        invite_link: config.bot.invite_link.clone(),
    };

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: config.bot.prefix.clone(),
                ..Default::default()
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(events::handle(ctx, event, framework, data))
            },
            on_error: |error| Box::pin(commands::on_error(error)),
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                info!("Registered {} command(s)", framework.options().commands.len());
                Ok(data)
            })
        })
        .build();

    let mut intents = serenity::GatewayIntents::non_privileged();
    if config.bot.prefix.is_some() {
        intents |= serenity::GatewayIntents::MESSAGE_CONTENT;
    }

    let mut client = serenity::ClientBuilder::new(&config.bot.token, intents)
        .framework(framework)
        .register_songbird_with(voice)
        .await?;

    let shard_manager = client.shard_manager.clone();
    let signal_registry = registry.clone();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for the shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        signal_shutdown.cancel();
        signal_registry.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    let result = client.start().await;

    shutdown.cancel();
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task ended abnormally: {}", e);
    }
    result?;
    info!("Bye");
    Ok(())
}
