use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use huck_client::engine::{ChatEngine, Connectivity, FetchStatus, Notice};
use huck_client::remote::HttpStore;
use huck_client::ws::WsFeed;
use huck_client::ClientConfig;

const DEFAULT_CHANNEL: &str = "general";

const HELP: &str = "\
commands:
  <text>                 send a message
  /join <channel>        switch channel
  /channels              list channels
  /create <name> [desc]  create a channel and join it
  /react <n> <emoji>     toggle a reaction on message n
  /resync                reload the channel from the server
  /logout                forget this login and exit
  /quit                  exit";

enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env()?;

    // Logs go to stderr so they do not interleave with the chat view
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huck_client=info".into()),
        )
        .init();

    info!("Connecting to {}", config.server_url);
    let remote = Arc::new(HttpStore::new(config.server_url.as_str())?);
    let transport = Arc::new(WsFeed::new(config.feed_url()));
    let (mut engine, mut inbox) = ChatEngine::new(config, remote, transport);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let restored = engine
        .restore_session()
        .await
        .map(|profile| profile.username.clone());
    if let Some(username) = restored {
        println!("welcome back, {username}");
    } else {
        loop {
            println!("choose a username:");
            let Some(line) = lines.next_line().await? else {
                return Ok(());
            };
            match engine.login(&line).await {
                Ok(profile) => {
                    println!("logged in as {}", profile.username);
                    break;
                }
                Err(e) => println!("! login failed: {e}"),
            }
            // Already reported above
            engine.take_notices();
        }
    }

    engine
        .refresh_channels()
        .await
        .context("could not list channels")?;
    let first = engine
        .channels()
        .iter()
        .find(|c| c.name == DEFAULT_CHANNEL)
        .or_else(|| engine.channels().first())
        .map(|c| c.id);
    match first {
        Some(channel_id) => {
            engine.select_channel(channel_id)?;
        }
        None => println!("no channels yet, /create one"),
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match command(&mut engine, line.trim()).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break,
                    Err(e) => println!("! {e}"),
                }
            }
            Some(input) = inbox.recv() => {
                if engine.handle(input) {
                    render(&engine);
                }
            }
        }

        for notice in engine.take_notices() {
            show_notice(&engine, notice);
        }
    }

    Ok(())
}

async fn command(engine: &mut ChatEngine, line: &str) -> anyhow::Result<Flow> {
    if line.is_empty() {
        return Ok(Flow::Continue);
    }
    if !line.starts_with('/') {
        engine.set_composer(line);
        engine.send_message()?;
        return Ok(Flow::Continue);
    }

    let mut parts = line.splitn(3, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let first = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let rest = parts.next().map(str::trim).unwrap_or_default();

    match (name, first) {
        ("/quit", _) => return Ok(Flow::Quit),
        ("/help", _) => println!("{HELP}"),
        ("/channels", _) => {
            let active = engine.active_channel_id();
            for channel in engine.refresh_channels().await? {
                let marker = if Some(channel.id) == active { "*" } else { " " };
                println!("{marker} #{:<16} {}", channel.name, channel.description);
            }
        }
        ("/join", Some(channel)) => {
            let channel = channel.trim_start_matches('#');
            if !engine.channels().iter().any(|c| c.name == channel) {
                engine.refresh_channels().await?;
            }
            engine.select_channel_by_name(channel)?;
            render(engine);
        }
        ("/create", Some(channel)) => {
            let channel = engine.create_channel(channel, rest).await?;
            println!("created #{}", channel.name);
            engine.select_channel(channel.id)?;
            render(engine);
        }
        ("/react", Some(position)) => {
            if rest.is_empty() {
                bail!("usage: /react <n> <emoji>");
            }
            let n: usize = position
                .parse()
                .with_context(|| format!("'{position}' is not a message number"))?;
            let message_id = engine
                .view()
                .get(n.wrapping_sub(1))
                .map(|m| m.id)
                .with_context(|| format!("no message {n}"))?;
            engine.toggle_reaction(message_id, rest)?;
        }
        ("/resync", _) => engine.resync()?,
        ("/logout", _) => {
            engine.logout().await?;
            println!("logged out");
            return Ok(Flow::Quit);
        }
        _ => bail!("unknown command, try /help"),
    }
    Ok(Flow::Continue)
}

fn render(engine: &ChatEngine) {
    let name = engine
        .active_channel()
        .map(|c| c.name.as_str())
        .unwrap_or("?");
    let status = match engine.fetch_status() {
        Some(FetchStatus::Loading) => " (loading)",
        Some(FetchStatus::Failed(_)) => " (history unavailable)",
        _ => "",
    };
    println!("--- #{name}{status} ---");

    for (i, message) in engine.view().iter().enumerate() {
        let reactions: Vec<String> = engine
            .reaction_summary(message.id)
            .into_iter()
            .map(|group| {
                if group.reacted {
                    format!("[{} {}]", group.emoji_code, group.count)
                } else {
                    format!("{} {}", group.emoji_code, group.count)
                }
            })
            .collect();
        println!(
            "{:>3} {} <{}> {}  {}",
            i + 1,
            message.created_at.format("%H:%M"),
            message.author.username,
            message.content,
            reactions.join(" ")
        );
    }
}

fn show_notice(engine: &ChatEngine, notice: Notice) {
    match notice {
        Notice::LoginFailed(reason) => println!("! login failed: {reason}"),
        Notice::SendFailed(reason) => println!("! message not sent: {reason}"),
        Notice::ReactionFailed(reason) => println!("! reaction failed: {reason}"),
        Notice::ChannelsFailed(reason) => println!("! could not list channels: {reason}"),
        Notice::FetchFailed { reason, .. } => {
            println!("! could not load history: {reason}");
            render(engine);
        }
        Notice::Connectivity(Connectivity::Degraded) => println!("~ connection lost, retrying"),
        Notice::Connectivity(Connectivity::Connected) => println!("~ live"),
        Notice::Connectivity(_) => {}
    }
}
