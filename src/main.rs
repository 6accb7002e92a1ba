mod config;
mod modules;
mod tasks;

use std::sync::Arc;

use log::{error, info};
use poise::serenity_prelude::FullEvent;
use sqlx::postgres::PgPoolOptions;

use crate::modules::raid_protection::detector::BurstDetector;
use crate::modules::raid_protection::incidents::IncidentStore;
use crate::modules::raid_protection::lockdown::LockdownRegistry;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

// User data, which is stored and accessible in all command invocations
pub struct Data {
    pub pool: sqlx::PgPool,
    pub incidents: Arc<IncidentStore>,
    pub detector: Arc<BurstDetector>,
    pub lockdowns: Arc<LockdownRegistry>,
}

#[poise::command(prefix_command)]
async fn register(ctx: Context<'_>) -> Result<(), Error> {
    poise::builtins::register_application_commands_buttons(ctx).await?;
    Ok(())
}

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    // This is our custom error handler
    // They are many errors that can occur, so we only handle the ones we want to customize
    // and forward the rest to the default handler
    match error {
        poise::FrameworkError::Setup { error, .. } => panic!("Failed to start bot: {:?}", error),
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!("Error in command `{}`: {:?}", ctx.command().name, error,);
            let err = ctx
                .say(format!(
                    "There was an error running this command: {}",
                    error
                ))
                .await;

            if let Err(e) = err {
                error!("Error while sending error message: {}", e);
            }
        }
        poise::FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            error!(
                "[Possible] error in command `{}`: {:?}",
                ctx.command().name,
                error,
            );
            if let Some(error) = error {
                let err = ctx.say(format!("**{}**", error)).await;

                if let Err(e) = err {
                    error!("Error while sending error message: {}", e);
                }
            }
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

async fn event_listener(
    ctx: &serenity::client::Context,
    event: &FullEvent,
    user_data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!("{} is ready!", data_about_bot.user.name);

            tokio::task::spawn(crate::tasks::taskcat::start_all_tasks(
                user_data.detector.clone(),
            ));
        }
        _ => {
            modules::raid_protection::events::event_listener(ctx, event, user_data).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    const MAX_CONNECTIONS: u32 = 3; // max connections to the database, we don't need too many here

    std::env::set_var("RUST_LOG", "raidguard=info");

    env_logger::init();

    // GUILD_MEMBERS and MESSAGE_CONTENT are privileged and must be enabled
    // on the application's portal page
    let intents = serenity::all::GatewayIntents::GUILDS
        | serenity::all::GatewayIntents::GUILD_MEMBERS
        | serenity::all::GatewayIntents::GUILD_MESSAGES
        | serenity::all::GatewayIntents::MESSAGE_CONTENT;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            initialize_owners: true,
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some("%".into()),
                ..poise::PrefixFrameworkOptions::default()
            },
            event_handler: |ctx, event, _fc, user_data| {
                Box::pin(event_listener(ctx, event, user_data))
            },
            commands: {
                let mut cmds = vec![register()];

                for module in modules::enabled_modules() {
                    cmds.extend(module.commands);
                }

                cmds
            },
            on_error: |error| Box::pin(on_error(error)),
            ..poise::FrameworkOptions::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let pool = PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .connect(&config::CONFIG.meta.postgres_url)
                    .await?;

                info!("Connected to postgres");

                let incidents = Arc::new(IncidentStore::open(&config::CONFIG.meta.incident_log)?);

                info!(
                    "Incident log loaded from {} ({} incident(s))",
                    config::CONFIG.meta.incident_log,
                    incidents.list(None).len()
                );

                Ok(Data {
                    pool,
                    incidents,
                    detector: Arc::new(BurstDetector::default()),
                    lockdowns: Arc::new(LockdownRegistry::default()),
                })
            })
        })
        .build();

    let mut client =
        serenity::all::ClientBuilder::new(&config::CONFIG.discord_auth.token, intents)
            .framework(framework)
            .await
            .expect("Error creating client");

    if let Err(e) = client.start().await {
        error!("Client error: {:?}", e);
    }
}
