//! Ladder Admin CLI Tool
//!
//! Operator command-line tool for the rating ladder database and queue.
//!
//! Usage:
//!   cargo run --bin ladder-admin -- --help
//!   cargo run --bin ladder-admin -- add-player --username alice
//!   cargo run --bin ladder-admin -- ranking --limit 20
//!   cargo run --bin ladder-admin -- record --player1 1 --player2 2 --winner 1
//!   cargo run --bin ladder-admin -- report --player1 1 --player2 2 --winner 2

use amqprs::channel::{BasicPublishArguments, QueueDeclareArguments};
use amqprs::BasicProperties;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rating_ladder::amqp::connection::{AmqpConfig, AmqpConnection};
use rating_ladder::amqp::messages::MessageUtils;
use rating_ladder::config::{validate_config, AppConfig};
use rating_ladder::ladder::MatchRecorder;
use rating_ladder::storage::{MatchStore, SqliteMatchStore};
use rating_ladder::types::{MatchId, MatchRecord, MatchReport, Player, PlayerId};
use rating_ladder::utils::generate_correlation_id;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ladder-admin")]
#[command(about = "Operator tool for the rating ladder database and match report queue")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML); environment variables otherwise
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database URL override
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL")]
    amqp_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new player at the initial rating
    AddPlayer {
        #[arg(short, long)]
        username: String,
    },
    /// List every player, highest rating first
    Players,
    /// Show the ranking of players with at least one match
    Ranking {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show recent matches, optionally for one player
    Matches {
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(short, long)]
        player: Option<i64>,
    },
    /// Show a single match
    ShowMatch {
        #[arg(short, long)]
        id: i64,
    },
    /// Record a match directly against the database
    Record {
        #[arg(long)]
        player1: i64,
        #[arg(long)]
        player2: i64,
        #[arg(long)]
        winner: i64,
    },
    /// Publish a match report to the service queue
    Report {
        #[arg(long)]
        player1: i64,
        #[arg(long)]
        player2: i64,
        #[arg(long)]
        winner: i64,
    },
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    if let Some(url) = &cli.amqp_url {
        config.amqp.url = url.clone();
    }

    validate_config(&config)?;
    Ok(config)
}

async fn open_store(config: &AppConfig) -> Result<Arc<SqliteMatchStore>> {
    let store = SqliteMatchStore::open(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.url))?;
    Ok(Arc::new(store))
}

fn print_players(players: &[Player]) {
    if players.is_empty() {
        println!("No players found.");
        return;
    }

    println!(
        "{:>4}  {:>6}  {:<20} {:>7} {:>5}",
        "#", "id", "username", "rating", "W/P"
    );
    for (rank, player) in players.iter().enumerate() {
        println!(
            "{:>4}  {:>6}  {:<20} {:>7} {:>2}/{:<2}",
            rank + 1,
            player.id,
            player.username,
            player.rating,
            player.wins,
            player.matches_played
        );
    }
}

fn print_match(record: &MatchRecord) {
    println!(
        "Match {} at {}: {} ({} -> {}) vs {} ({} -> {}), winner {}",
        record.id,
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        record.player1.username,
        record.player1_rating_before,
        record.player1_rating_after,
        record.player2.username,
        record.player2_rating_before,
        record.player2_rating_after,
        record.winner.username
    );
}

async fn publish_report(config: &AppConfig, report: &MatchReport) -> Result<()> {
    let connection = AmqpConnection::new(AmqpConfig::from_url(&config.amqp.url)?).await?;
    let channel = connection.open_channel().await?;

    let queue_name = &config.amqp.queue_name;
    channel
        .queue_declare(
            QueueDeclareArguments::new(queue_name)
                .durable(true)
                .auto_delete(false)
                .finish(),
        )
        .await
        .with_context(|| format!("Failed to declare queue {}", queue_name))?;

    let correlation_id = generate_correlation_id();
    let mut properties = BasicProperties::default();
    properties
        .with_message_id(&correlation_id)
        .with_content_type("application/json")
        .with_persistence(true);

    channel
        .basic_publish(
            properties,
            MessageUtils::serialize_match_report(report)?,
            BasicPublishArguments::new("", queue_name),
        )
        .await
        .context("Failed to publish match report")?;

    println!("✅ Published match report {} to '{}'", correlation_id, queue_name);

    if let Err(e) = channel.close().await {
        eprintln!("⚠️  Failed to close channel: {}", e);
    }
    connection.close().await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::AddPlayer { username } => {
            let store = open_store(&config).await?;
            let player = store.create_player(&username).await?;
            println!(
                "✅ Registered '{}' with id {} at rating {}",
                player.username, player.id, player.rating
            );
        }

        Commands::Players => {
            let store = open_store(&config).await?;
            print_players(&store.list_players().await?);
        }

        Commands::Ranking { limit } => {
            let store = open_store(&config).await?;
            let limit = limit.unwrap_or(config.ladder.ranking_limit);
            print_players(&store.ranking(limit).await?);
        }

        Commands::Matches { limit, player } => {
            let store = open_store(&config).await?;
            let limit = limit.unwrap_or(config.ladder.recent_matches_limit);
            let matches = match player {
                Some(id) => store.matches_for_player(PlayerId::new(id), limit).await?,
                None => store.recent_matches(limit).await?,
            };

            if matches.is_empty() {
                println!("No matches found.");
            }
            for record in &matches {
                print_match(record);
            }
        }

        Commands::ShowMatch { id } => {
            let store = open_store(&config).await?;
            match store.get_match(MatchId::new(id)).await? {
                Some(record) => print_match(&record),
                None => {
                    eprintln!("❌ Match {} not found", id);
                    std::process::exit(1);
                }
            }
        }

        Commands::Record {
            player1,
            player2,
            winner,
        } => {
            let store = open_store(&config).await?;
            let recorder = MatchRecorder::new(store);
            let report =
                MatchReport::new(PlayerId::new(player1), PlayerId::new(player2), PlayerId::new(winner));

            match recorder.record_match(&report).await {
                Ok(record) => {
                    println!("✅ Recorded:");
                    print_match(&record);
                }
                Err(e) => {
                    eprintln!("❌ Match not recorded ({}): {}", e.kind(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Report {
            player1,
            player2,
            winner,
        } => {
            let report =
                MatchReport::new(PlayerId::new(player1), PlayerId::new(player2), PlayerId::new(winner));
            if let Err(e) = publish_report(&config, &report).await {
                eprintln!("❌ Failed to publish match report: {:#}", e);
                eprintln!("💡 Check that the broker at {} is reachable", config.amqp.url);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
