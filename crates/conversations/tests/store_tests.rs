use std::sync::Arc;

use futures_util::future::join_all;
use souk_config::{DatabaseConfig, MessagingConfig};
use souk_conversations::{
    ConversationError, ConversationServices, ConversationStore, SendMessage,
    SqliteConversationStore,
};
use souk_database::initialize_database;
use sqlx::SqlitePool;
use tempfile::TempDir;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

struct TestContext {
    pool: SqlitePool,
    store: Arc<SqliteConversationStore>,
    services: ConversationServices,
    _temp_dir: TempDir,
}

impl TestContext {
    async fn new() -> TestResult<Self> {
        let temp_dir = TempDir::new()?;
        let database = DatabaseConfig {
            url: format!("sqlite://{}", temp_dir.path().join("conversations.db").display()),
            max_connections: 8,
        };
        let pool = initialize_database(&database).await?;
        let store = Arc::new(SqliteConversationStore::new(pool.clone()));
        let services = ConversationServices::new(store.clone(), &MessagingConfig::default());

        Ok(Self {
            pool,
            store,
            services,
            _temp_dir: temp_dir,
        })
    }

    async fn user(&self, public_id: &str) -> TestResult<i64> {
        let id = sqlx::query(
            "INSERT INTO users (public_id, email, display_name, created_at, updated_at)
             VALUES (?, ?, ?, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .bind(public_id)
        .bind(format!("{public_id}@example.com"))
        .bind(public_id.to_uppercase())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    async fn listing(&self, public_id: &str, owner_id: i64) -> TestResult<i64> {
        let id = sqlx::query(
            "INSERT INTO listings (public_id, owner_id, title, price_cents, created_at, updated_at)
             VALUES (?, ?, 'Road bike', 25000, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .bind(public_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    async fn count(&self, table: &str) -> TestResult<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[tokio::test]
async fn repeated_start_reuses_the_conversation() -> TestResult {
    let ctx = TestContext::new().await?;
    let buyer = ctx.user("buyer").await?;
    let owner = ctx.user("owner").await?;
    ctx.listing("bike", owner).await?;

    let first = ctx
        .services
        .ingress
        .start(buyer, "bike", "Is this available?")
        .await?;
    assert!(first.created);
    assert_eq!(first.recipient_id, owner);
    assert_eq!(first.message.sender_id, buyer);
    assert_eq!(first.message.sender_public_id, "buyer");

    let second = ctx
        .services
        .ingress
        .start(buyer, "bike", "Still available?")
        .await?;
    assert!(!second.created);
    assert_eq!(second.conversation.id, first.conversation.id);

    assert_eq!(ctx.count("conversations").await?, 1);
    assert_eq!(ctx.count("messages").await?, 2);

    Ok(())
}

#[tokio::test]
async fn concurrent_starts_converge_to_one_conversation() -> TestResult {
    let ctx = TestContext::new().await?;
    let buyer = ctx.user("buyer").await?;
    let owner = ctx.user("owner").await?;
    ctx.listing("bike", owner).await?;

    let tasks = (0..8).map(|i| {
        let ingress = ctx.services.ingress.clone();
        tokio::spawn(async move {
            ingress
                .send(buyer, &SendMessage::about_listing("bike", format!("hello {i}")))
                .await
        })
    });

    let results = join_all(tasks).await;
    let mut conversation_ids = Vec::new();
    let mut created = 0;
    for result in results {
        let sent = result??;
        conversation_ids.push(sent.conversation.id);
        if sent.created {
            created += 1;
        }
    }

    conversation_ids.dedup();
    assert_eq!(conversation_ids.len(), 1);
    assert_eq!(created, 1);
    assert_eq!(ctx.count("conversations").await?, 1);
    assert_eq!(ctx.count("messages").await?, 8);

    Ok(())
}

#[tokio::test]
async fn owner_cannot_start_on_own_listing() -> TestResult {
    let ctx = TestContext::new().await?;
    let owner = ctx.user("owner").await?;
    ctx.listing("bike", owner).await?;

    let err = ctx
        .services
        .ingress
        .start(owner, "bike", "anyone?")
        .await
        .expect_err("own listing");
    assert!(matches!(err, ConversationError::OwnListing));

    assert_eq!(ctx.count("conversations").await?, 0);
    assert_eq!(ctx.count("messages").await?, 0);

    Ok(())
}

#[tokio::test]
async fn empty_first_message_creates_nothing() -> TestResult {
    let ctx = TestContext::new().await?;
    let buyer = ctx.user("buyer").await?;
    let owner = ctx.user("owner").await?;
    ctx.listing("bike", owner).await?;

    let err = ctx
        .services
        .ingress
        .start(buyer, "bike", "  ")
        .await
        .expect_err("empty content");
    assert!(matches!(err, ConversationError::Validation { .. }));
    assert_eq!(ctx.count("conversations").await?, 0);

    Ok(())
}

#[tokio::test]
async fn failed_first_message_leaves_no_conversation() -> TestResult {
    let ctx = TestContext::new().await?;
    let buyer = ctx.user("buyer").await?;
    let owner = ctx.user("owner").await?;
    ctx.listing("bike", owner).await?;

    sqlx::query(
        "CREATE TRIGGER reject_messages BEFORE INSERT ON messages
         BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(&ctx.pool)
    .await?;

    let err = ctx
        .services
        .ingress
        .start(buyer, "bike", "Is this available?")
        .await
        .expect_err("message insert fails");
    assert!(matches!(err, ConversationError::Database(_)));

    assert_eq!(ctx.count("conversations").await?, 0);
    assert_eq!(ctx.count("messages").await?, 0);
    assert!(ctx.services.queries.list(owner).await?.is_empty());

    sqlx::query("DROP TRIGGER reject_messages")
        .execute(&ctx.pool)
        .await?;
    let sent = ctx.services.ingress.start(buyer, "bike", "Is this available?").await?;
    assert!(sent.created);
    assert_eq!(ctx.count("conversations").await?, 1);

    Ok(())
}

#[tokio::test]
async fn inactive_listing_cannot_be_messaged() -> TestResult {
    let ctx = TestContext::new().await?;
    let buyer = ctx.user("buyer").await?;
    let owner = ctx.user("owner").await?;
    let listing = ctx.listing("bike", owner).await?;

    sqlx::query("UPDATE listings SET active = 0 WHERE id = ?")
        .bind(listing)
        .execute(&ctx.pool)
        .await?;

    let err = ctx
        .services
        .ingress
        .start(buyer, "bike", "Still for sale?")
        .await
        .expect_err("inactive listing");
    assert!(matches!(err, ConversationError::ListingNotFound { .. }));
    assert_eq!(ctx.count("conversations").await?, 0);

    Ok(())
}

#[tokio::test]
async fn non_participant_post_creates_no_message() -> TestResult {
    let ctx = TestContext::new().await?;
    let buyer = ctx.user("buyer").await?;
    let owner = ctx.user("owner").await?;
    let stranger = ctx.user("stranger").await?;
    ctx.listing("bike", owner).await?;

    let sent = ctx.services.ingress.start(buyer, "bike", "hi").await?;

    let err = ctx
        .services
        .ingress
        .post(stranger, &sent.conversation.public_id, "let me in")
        .await
        .expect_err("stranger must be refused");
    assert!(matches!(err, ConversationError::AccessDenied { .. }));
    assert_eq!(ctx.count("messages").await?, 1);

    Ok(())
}

#[tokio::test]
async fn mark_read_flips_only_incoming_and_is_idempotent() -> TestResult {
    let ctx = TestContext::new().await?;
    let buyer = ctx.user("buyer").await?;
    let owner = ctx.user("owner").await?;
    ctx.listing("bike", owner).await?;

    let sent = ctx.services.ingress.start(buyer, "bike", "one").await?;
    let conversation_id = sent.conversation.public_id.clone();
    ctx.services.ingress.post(buyer, &conversation_id, "two").await?;
    ctx.services.ingress.post(owner, &conversation_id, "yes").await?;

    let receipt = ctx
        .services
        .read_tracker
        .mark_read(owner, &conversation_id)
        .await?;
    assert_eq!(receipt.updated, 2);

    let again = ctx
        .services
        .read_tracker
        .mark_read(owner, &conversation_id)
        .await?;
    assert_eq!(again.updated, 0);
    assert!(!again.changed());

    let read_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE is_read = 1")
        .fetch_one(&ctx.pool)
        .await?;
    assert_eq!(read_count, 2);

    let owner_message_read: bool =
        sqlx::query_scalar("SELECT is_read FROM messages WHERE sender_id = ?")
            .bind(owner)
            .fetch_one(&ctx.pool)
            .await?;
    assert!(!owner_message_read, "reader's own messages stay unread");

    Ok(())
}

#[tokio::test]
async fn history_matches_persistence_order() -> TestResult {
    let ctx = TestContext::new().await?;
    let buyer = ctx.user("buyer").await?;
    let owner = ctx.user("owner").await?;
    ctx.listing("bike", owner).await?;

    let sent = ctx.services.ingress.start(buyer, "bike", "m0").await?;
    let conversation_id = sent.conversation.public_id.clone();
    for i in 1..5 {
        let sender = if i % 2 == 0 { buyer } else { owner };
        ctx.services
            .ingress
            .post(sender, &conversation_id, &format!("m{i}"))
            .await?;
    }

    let page = ctx
        .services
        .queries
        .history(owner, &conversation_id, 1)
        .await?;
    let contents: Vec<&str> = page.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    assert!(!page.has_more);

    let ids: Vec<i64> = page.messages.iter().map(|m| m.id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);

    Ok(())
}

#[tokio::test]
async fn summaries_report_counterpart_and_unread() -> TestResult {
    let ctx = TestContext::new().await?;
    let buyer = ctx.user("buyer").await?;
    let other_buyer = ctx.user("other").await?;
    let owner = ctx.user("owner").await?;
    ctx.listing("bike", owner).await?;

    ctx.services.ingress.start(buyer, "bike", "first").await?;
    ctx.services.ingress.start(buyer, "bike", "second").await?;
    let latest = ctx
        .services
        .ingress
        .start(other_buyer, "bike", "newest thread")
        .await?;

    let inbox = ctx.services.queries.list(owner).await?;
    assert_eq!(inbox.len(), 2);

    let top = &inbox[0];
    assert_eq!(top.conversation_id, latest.conversation.public_id);
    assert_eq!(top.other_participant.id, "other");
    assert_eq!(top.unread_count, 1);
    assert_eq!(
        top.last_message.as_ref().map(|m| m.content.as_str()),
        Some("newest thread")
    );
    assert_eq!(top.listing.id, "bike");

    assert_eq!(inbox[1].unread_count, 2);
    assert_eq!(ctx.services.queries.unread_total(owner).await?, 3);
    assert_eq!(ctx.services.queries.unread_total(buyer).await?, 0);

    let buyer_inbox = ctx.services.queries.list(buyer).await?;
    assert_eq!(buyer_inbox.len(), 1);
    assert_eq!(buyer_inbox[0].other_participant.id, "owner");
    assert_eq!(buyer_inbox[0].unread_count, 0);

    Ok(())
}

#[tokio::test]
async fn store_lookups_return_none_for_unknown_ids() -> TestResult {
    let ctx = TestContext::new().await?;

    assert!(ctx.store.find_listing("nope").await?.is_none());
    assert!(ctx.store.find_conversation("nope").await?.is_none());

    Ok(())
}
