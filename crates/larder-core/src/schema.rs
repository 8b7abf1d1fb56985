//! SQLite schema for the derived index.
//!
//! Migration tooling lives outside this workspace; this module only
//! bootstraps a fresh database (and asserts the version of an existing one)
//! so that tests and new deployments can start from an empty file. The
//! `record` table is the local mirror of the append-only record log; every
//! other table is derived from it by the indexing layer.

use rusqlite::{Connection, Result};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the database schema.
///
/// Creates all tables if they don't exist and stamps the schema version.
/// Safe to call on every open; a no-op for an up-to-date database.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Create all tables for a fresh database.
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Local mirror of the record log: one row per live record URI.
        CREATE TABLE IF NOT EXISTS record (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            did TEXT NOT NULL,
            collection TEXT NOT NULL,
            json TEXT NOT NULL,
            indexed_at TEXT NOT NULL,
            takedown_ref TEXT,
            tags TEXT NOT NULL DEFAULT '[]'
        );

        -- Derived content tables, one per collection.
        CREATE TABLE IF NOT EXISTS post (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            creator TEXT NOT NULL,
            text TEXT NOT NULL,
            reply_root TEXT,
            reply_parent TEXT,
            created_at TEXT NOT NULL,
            indexed_at TEXT NOT NULL,
            sort_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS repost (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            creator TEXT NOT NULL,
            subject TEXT NOT NULL,
            subject_cid TEXT NOT NULL,
            created_at TEXT NOT NULL,
            indexed_at TEXT NOT NULL,
            sort_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recipe_post (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            creator TEXT NOT NULL,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL,
            indexed_at TEXT NOT NULL,
            sort_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recipe_revision (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            creator TEXT NOT NULL,
            recipe_post_uri TEXT NOT NULL,
            created_at TEXT NOT NULL,
            indexed_at TEXT NOT NULL,
            sort_at TEXT NOT NULL
        );

        -- The currently-effective revision per recipe post.
        -- Last observed revision wins; repointed with an upsert.
        CREATE TABLE IF NOT EXISTS recipe_head_revision (
            recipe_post_uri TEXT PRIMARY KEY,
            recipe_revision_uri TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS review_rating (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            creator TEXT NOT NULL,
            subject TEXT NOT NULL,
            subject_cid TEXT NOT NULL,
            rating REAL,
            review_body TEXT,
            created_at TEXT NOT NULL,
            indexed_at TEXT NOT NULL,
            sort_at TEXT NOT NULL
        );

        -- Materialized rating aggregates, recomputed per subject on any
        -- review change.
        CREATE TABLE IF NOT EXISTS rating_agg (
            uri TEXT NOT NULL,
            aspect TEXT NOT NULL DEFAULT '',
            rating_count INTEGER NOT NULL DEFAULT 0,
            rating_average REAL,
            review_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (uri, aspect)
        );

        -- Unified feed index: one row per timeline-eligible item.
        CREATE TABLE IF NOT EXISTS feed_item (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            type TEXT NOT NULL,
            post_uri TEXT NOT NULL,
            originator_did TEXT NOT NULL,
            sort_at TEXT NOT NULL
        );

        -- Records that lost a content-addressed uniqueness race
        -- (e.g. a second review of the same subject by the same author).
        CREATE TABLE IF NOT EXISTS duplicate_record (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            duplicate_of TEXT NOT NULL,
            indexed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS likes (
            uri TEXT PRIMARY KEY,
            cid TEXT NOT NULL,
            creator TEXT NOT NULL,
            subject TEXT NOT NULL,
            subject_cid TEXT NOT NULL,
            created_at TEXT NOT NULL,
            indexed_at TEXT NOT NULL,
            sort_at TEXT NOT NULL
        );

        -- Social graph.
        CREATE TABLE IF NOT EXISTS follow (
            creator TEXT NOT NULL,
            subject_did TEXT NOT NULL,
            PRIMARY KEY (creator, subject_did)
        );

        CREATE TABLE IF NOT EXISTS actor_block (
            creator TEXT NOT NULL,
            subject_did TEXT NOT NULL,
            PRIMARY KEY (creator, subject_did)
        );

        CREATE TABLE IF NOT EXISTS actor_mute (
            creator TEXT NOT NULL,
            subject_did TEXT NOT NULL,
            PRIMARY KEY (creator, subject_did)
        );

        CREATE TABLE IF NOT EXISTS thread_mute (
            creator TEXT NOT NULL,
            root_uri TEXT NOT NULL,
            PRIMARY KEY (creator, root_uri)
        );

        CREATE TABLE IF NOT EXISTS bookmark (
            creator TEXT NOT NULL,
            subject_uri TEXT NOT NULL,
            PRIMARY KEY (creator, subject_uri)
        );

        -- Indexes for the serving path.
        CREATE INDEX IF NOT EXISTS idx_feed_item_sort ON feed_item(sort_at DESC, cid DESC);
        CREATE INDEX IF NOT EXISTS idx_feed_item_originator ON feed_item(originator_did, sort_at DESC, cid DESC);
        CREATE INDEX IF NOT EXISTS idx_feed_item_type ON feed_item(type, sort_at DESC, cid DESC);
        CREATE INDEX IF NOT EXISTS idx_post_reply_parent ON post(reply_parent);
        CREATE INDEX IF NOT EXISTS idx_recipe_revision_post ON recipe_revision(recipe_post_uri);
        CREATE INDEX IF NOT EXISTS idx_review_rating_subject ON review_rating(subject);
        CREATE INDEX IF NOT EXISTS idx_review_rating_creator_subject ON review_rating(creator, subject);
        CREATE INDEX IF NOT EXISTS idx_likes_subject ON likes(subject);
        CREATE INDEX IF NOT EXISTS idx_likes_creator_subject ON likes(creator, subject);
        CREATE INDEX IF NOT EXISTS idx_repost_creator_subject ON repost(creator, subject);
        CREATE INDEX IF NOT EXISTS idx_follow_creator ON follow(creator);
        "#,
    )?;

    Ok(())
}
