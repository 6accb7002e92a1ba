use poise::{serenity_prelude::CreateEmbed, CreateReply};

type Error = crate::Error;
type Context<'a> = crate::Context<'a>;

#[poise::command(category = "Stats", prefix_command, slash_command, user_cooldown = 1)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    let latency = ctx.ping().await;

    ctx.send(
        CreateReply::default().embed(
            CreateEmbed::default()
                .title("Pong")
                .field("Gateway Latency", format!("{}ms", latency.as_millis()), true)
                .field("Shard", ctx.serenity_context().shard_id.to_string(), true),
        ),
    )
    .await?;

    Ok(())
}
