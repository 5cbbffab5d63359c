use clap::{Parser, Subcommand};
use slackcord::convert::{ImportReport, Importer, RunContext};
use slackcord::export::ExportDir;
use slackcord::transport::discord::DiscordTransport;
use slackcord::transport::{Directory, DryRunTransport, NullDirectory, Transport};

#[derive(Parser)]
#[command(
    name = "slackcord",
    version,
    about = "Replay a Slack export archive into a Discord server"
)]
struct Cli {
    /// Path to config file (default: ~/.slackcord/config.toml)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import an export directory into the configured guild
    Import {
        /// Export root, a channel subdirectory, or a single day file
        path: std::path::PathBuf,
        /// Convert everything but send nothing
        #[arg(long)]
        dry_run: bool,
    },
    /// Show what an export contains without touching Discord
    Inspect {
        /// Export root, a channel subdirectory, or a single day file
        path: std::path::PathBuf,
    },
    /// Initialize a new slackcord config directory
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("slackcord=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Import { path, dry_run } => {
            run_import(cli.config.as_deref(), &path, dry_run).await
        }
        Commands::Inspect { path } => run_inspect(&path),
        Commands::Init => run_init(cli.config.as_deref()),
    }
}

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

fn run_init(config_override: Option<&std::path::Path>) -> anyhow::Result<()> {
    let dir = match config_override {
        Some(p) => p
            .parent()
            .map(|d| d.to_path_buf())
            .unwrap_or_else(slackcord::config::config_dir),
        None => slackcord::config::config_dir(),
    };
    std::fs::create_dir_all(&dir)?;

    let config_path = match config_override {
        Some(p) => p.to_path_buf(),
        None => dir.join("config.toml"),
    };
    if !config_path.exists() {
        std::fs::write(
            &config_path,
            r#"[discord]
bot_token = "${DISCORD_BOT_TOKEN}"
guild_id = 0
# Replaying an archive should not mass-ping the server
allow_broadcast = false

[import]
create_channels = true
# Empty means every channel in the export
channels = []
user_map = "slackcord_users.json"

# Discord's published ceilings; override only if the platform changes them
[limits]
max_message_chars = 2000
max_embed_chars = 4096
max_embeds_per_message = 10
max_total_embed_chars = 6000
"#,
        )?;
        println!("Created {}", config_path.display());
    } else {
        println!("Config already exists: {}", config_path.display());
    }

    println!("slackcord initialized at {}", dir.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Inspect
// ---------------------------------------------------------------------------

fn run_inspect(path: &std::path::Path) -> anyhow::Result<()> {
    let export = ExportDir::open(path, "slackcord_users.json")?;

    println!("=== Export ({}) ===", export.root().display());
    println!("Users: {}", export.users.len());
    println!("Mapped to Discord: {}", export.user_map.len());
    println!();

    let names = export.channel_names();
    println!("=== Channels ({}) ===", names.len());
    for name in names {
        let messages = export.messages(name)?;
        let with_files = messages.iter().filter(|m| !m.files.is_empty()).count();
        let replies = messages.iter().filter(|m| m.parent_ts().is_some()).count();
        println!(
            "  #{}: {} messages, {} with attachments, {} thread replies",
            name,
            messages.len(),
            with_files,
            replies
        );
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

async fn run_import(
    config_path: Option<&std::path::Path>,
    export_path: &std::path::Path,
    dry_run: bool,
) -> anyhow::Result<()> {
    let config = slackcord::config::load_config(config_path)?;
    let export = ExportDir::open(export_path, &config.import.user_map)?;

    let selected: Vec<String> = export
        .channel_names()
        .into_iter()
        .filter(|name| {
            config.import.channels.is_empty()
                || config.import.channels.iter().any(|c| c == name)
        })
        .map(String::from)
        .collect();
    if selected.is_empty() {
        anyhow::bail!("No channels selected for import");
    }

    if dry_run {
        tracing::info!("Dry run: nothing will be sent to Discord");
        let transport = DryRunTransport::new();
        let directory = NullDirectory {
            allow_broadcast: config.discord.allow_broadcast,
        };
        run_channels(&export, &transport, &directory, &config, &selected).await
    } else {
        let (transport, directory) = DiscordTransport::connect(&config.discord).await?;
        run_channels(&export, &transport, &directory, &config, &selected).await
    }
}

async fn run_channels(
    export: &ExportDir,
    transport: &dyn Transport,
    directory: &dyn Directory,
    config: &slackcord::config::Config,
    channels: &[String],
) -> anyhow::Result<()> {
    // Ctrl+C stops between messages, after in-flight payloads settle
    let cancel = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down after the current message...");
            cancel.store(true, std::sync::atomic::Ordering::Relaxed);
        });
    }

    let importer = Importer::for_export(export, transport, directory, config.limits.clone())
        .with_cancel(cancel.clone());
    let mut ctx = RunContext::default();
    let mut total = ImportReport::default();

    for name in channels {
        if cancel.load(std::sync::atomic::Ordering::Relaxed) {
            break;
        }
        let channel = match transport
            .ensure_channel(name, config.import.create_channels)
            .await
        {
            Ok(channel) => channel,
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                tracing::error!("Skipping #{name}: {err}");
                continue;
            }
        };

        tracing::info!("Importing #{} → channel {}", name, channel.id);
        let messages = export.messages(name)?;
        let report = importer.import_channel(&channel, &messages, &mut ctx).await?;
        total.merge(report);
    }

    println!("Import complete: {}", total.summary());
    for failure in &total.failures {
        println!(
            "  {} {:?}: {}",
            failure.ts,
            failure.state,
            failure.detail.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
