use anyhow::Context;
use clap::{Parser, Subcommand};
use souk_backend_runtime::{telemetry, BackendServices};
use souk_config::load as load_config;
use souk_gateway::{build_router, GatewayState};
use sqlx::Row;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "souk-server")]
#[command(about = "Souk marketplace conversation backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and WebSocket server (default)
    Serve,
    /// Create a demo owner, buyer and listing and print session tokens
    SeedData,
    /// Print conversations with their message counts
    DumpData,
    /// Delete all conversations and their messages
    ClearData,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing().context("failed to initialise tracing")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::SeedData => seed_data().await,
        Commands::DumpData => dump_data().await,
        Commands::ClearData => clear_data().await,
    }
}

async fn initialise() -> anyhow::Result<(souk_config::AppConfig, BackendServices)> {
    let config = load_config().context("failed to load configuration")?;

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    Ok((config, services))
}

async fn run_server() -> anyhow::Result<()> {
    info!("starting Souk backend");

    let (config, services) = initialise().await?;

    let state = GatewayState::new(services.authenticator.clone(), services.hub.clone());
    let app = build_router(state);

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(souk_backend_runtime::shutdown_signal())
        .await
        .context("http server error")?;

    info!("backend shut down");
    Ok(())
}

async fn seed_data() -> anyhow::Result<()> {
    info!("seeding database with demo data");

    let (_config, services) = initialise().await?;
    let authenticator = &services.authenticator;

    let mut tokens = Vec::new();
    for (email, name) in [
        ("owner@souk.test", "Demo Owner"),
        ("buyer@souk.test", "Demo Buyer"),
    ] {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&services.db_pool)
            .await
            .with_context(|| format!("failed to look up {email}"))?;

        let user_id = match existing {
            Some(id) => id,
            None => {
                authenticator
                    .create_user(email, Some(name))
                    .await
                    .with_context(|| format!("failed to create {email}"))?
                    .id
            }
        };

        let session = authenticator
            .issue_session(user_id)
            .await
            .with_context(|| format!("failed to issue session for {email}"))?;
        tokens.push((email, user_id, session.token));
    }

    let owner_id = tokens[0].1;
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO listings (public_id, owner_id, title, price_cents, image_url, active, created_at, updated_at)
        VALUES (?, ?, ?, ?, NULL, 1, ?, ?)
        "#,
    )
    .bind("demo-bike")
    .bind(owner_id)
    .bind("Road bike, 56cm frame")
    .bind(45_000i64)
    .bind(&now)
    .bind(&now)
    .execute(&services.db_pool)
    .await
    .context("failed to insert demo listing")?;

    println!("Database seeded with demo data:");
    println!("- listing: demo-bike");
    for (email, _, token) in &tokens {
        println!("- {email}: {token}");
    }
    println!("Connect with ws://<host>/ws?token=<token> or run 'dump-data'");

    Ok(())
}

async fn dump_data() -> anyhow::Result<()> {
    info!("dumping conversations from database");

    let (_config, services) = initialise().await?;

    let conversations = sqlx::query(
        r#"
        SELECT c.public_id,
               l.public_id AS listing,
               c.participant_low,
               c.participant_high,
               c.last_message_at,
               (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS message_count,
               (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id AND m.is_read = 0) AS unread_count
        FROM conversations c
        JOIN listings l ON l.id = c.listing_id
        ORDER BY c.last_message_at DESC
        "#,
    )
    .fetch_all(&services.db_pool)
    .await
    .context("failed to fetch conversations")?;

    println!("=== CONVERSATIONS ===");
    if conversations.is_empty() {
        println!("No conversations found in database");
        return Ok(());
    }

    println!("Found {} conversations:", conversations.len());
    println!(
        "{:<28} {:<20} {:<12} {:<10} {:<8} {:<35}",
        "Public ID", "Listing", "Participants", "Messages", "Unread", "Last Message At"
    );
    println!("{}", "-".repeat(118));

    for conversation in conversations {
        let public_id: String = conversation.get("public_id");
        let listing: String = conversation.get("listing");
        let low: i64 = conversation.get("participant_low");
        let high: i64 = conversation.get("participant_high");
        let last_message_at: String = conversation.get("last_message_at");
        let message_count: i64 = conversation.get("message_count");
        let unread_count: i64 = conversation.get("unread_count");

        println!(
            "{:<28} {:<20} {:<12} {:<10} {:<8} {:<35}",
            public_id,
            listing,
            format!("{low}/{high}"),
            message_count,
            unread_count,
            last_message_at
        );
    }

    Ok(())
}

async fn clear_data() -> anyhow::Result<()> {
    info!("clearing conversations from database");

    let (_config, services) = initialise().await?;

    let messages_deleted = sqlx::query("DELETE FROM messages")
        .execute(&services.db_pool)
        .await
        .context("failed to delete messages")?;

    let conversations_deleted = sqlx::query("DELETE FROM conversations")
        .execute(&services.db_pool)
        .await
        .context("failed to delete conversations")?;

    println!("Database cleared:");
    println!("- {} messages deleted", messages_deleted.rows_affected());
    println!(
        "- {} conversations deleted",
        conversations_deleted.rows_affected()
    );

    Ok(())
}
