//! SQL schema for the QuickPoll SQLite store.
//!
//! Executed once at connection startup. Every invariant the clients rely on
//! under concurrency lives here: uniqueness of votes and likes per session,
//! vote/option/poll consistency, and the trigger-maintained counters.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS polls (
    poll_id     TEXT PRIMARY KEY,
    title       TEXT NOT NULL CHECK (length(trim(title)) > 0),
    likes_count INTEGER NOT NULL DEFAULT 0 CHECK (likes_count >= 0),
    created_at  TEXT NOT NULL       -- RFC 3339 UTC, fixed width
);

CREATE TABLE IF NOT EXISTS poll_options (
    option_id   TEXT PRIMARY KEY,
    poll_id     TEXT NOT NULL REFERENCES polls(poll_id),
    option_text TEXT NOT NULL CHECK (length(trim(option_text)) > 0),
    votes_count INTEGER NOT NULL DEFAULT 0 CHECK (votes_count >= 0),
    position    INTEGER NOT NULL,   -- insertion order within the poll
    created_at  TEXT NOT NULL,
    UNIQUE (option_id, poll_id)
);

-- One vote per (poll, session); the option must belong to the poll.
CREATE TABLE IF NOT EXISTS votes (
    vote_id    TEXT PRIMARY KEY,
    poll_id    TEXT NOT NULL REFERENCES polls(poll_id),
    option_id  TEXT NOT NULL,
    session_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (poll_id, session_id),
    FOREIGN KEY (option_id, poll_id) REFERENCES poll_options(option_id, poll_id)
);

CREATE TABLE IF NOT EXISTS likes (
    like_id    TEXT PRIMARY KEY,
    poll_id    TEXT NOT NULL REFERENCES polls(poll_id),
    session_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (poll_id, session_id)
);

CREATE INDEX IF NOT EXISTS polls_created_idx   ON polls(created_at);
CREATE INDEX IF NOT EXISTS options_poll_idx    ON poll_options(poll_id);

-- ── Counters ────────────────────────────────────────────────────────────────

CREATE TRIGGER IF NOT EXISTS votes_count_insert AFTER INSERT ON votes
BEGIN
    UPDATE poll_options SET votes_count = votes_count + 1
     WHERE option_id = NEW.option_id;
END;

CREATE TRIGGER IF NOT EXISTS likes_count_insert AFTER INSERT ON likes
BEGIN
    UPDATE polls SET likes_count = likes_count + 1 WHERE poll_id = NEW.poll_id;
END;

CREATE TRIGGER IF NOT EXISTS likes_count_delete AFTER DELETE ON likes
BEGIN
    UPDATE polls SET likes_count = likes_count - 1 WHERE poll_id = OLD.poll_id;
END;

-- ── Change log ──────────────────────────────────────────────────────────────
-- Append-only record of row changes, tailed by the relay. AUTOINCREMENT keeps
-- seq strictly increasing across pruning.

CREATE TABLE IF NOT EXISTS change_log (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    kind       TEXT NOT NULL,       -- 'insert' | 'update' | 'delete'
    row_id     TEXT NOT NULL,
    poll_id    TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS polls_log_insert AFTER INSERT ON polls
BEGIN
    INSERT INTO change_log (table_name, kind, row_id, poll_id)
    VALUES ('polls', 'insert', NEW.poll_id, NEW.poll_id);
END;

CREATE TRIGGER IF NOT EXISTS polls_log_update AFTER UPDATE ON polls
BEGIN
    INSERT INTO change_log (table_name, kind, row_id, poll_id)
    VALUES ('polls', 'update', NEW.poll_id, NEW.poll_id);
END;

CREATE TRIGGER IF NOT EXISTS polls_log_delete AFTER DELETE ON polls
BEGIN
    INSERT INTO change_log (table_name, kind, row_id, poll_id)
    VALUES ('polls', 'delete', OLD.poll_id, OLD.poll_id);
END;

CREATE TRIGGER IF NOT EXISTS options_log_insert AFTER INSERT ON poll_options
BEGIN
    INSERT INTO change_log (table_name, kind, row_id, poll_id)
    VALUES ('poll_options', 'insert', NEW.option_id, NEW.poll_id);
END;

CREATE TRIGGER IF NOT EXISTS options_log_update AFTER UPDATE ON poll_options
BEGIN
    INSERT INTO change_log (table_name, kind, row_id, poll_id)
    VALUES ('poll_options', 'update', NEW.option_id, NEW.poll_id);
END;

CREATE TRIGGER IF NOT EXISTS options_log_delete AFTER DELETE ON poll_options
BEGIN
    INSERT INTO change_log (table_name, kind, row_id, poll_id)
    VALUES ('poll_options', 'delete', OLD.option_id, OLD.poll_id);
END;

CREATE TRIGGER IF NOT EXISTS votes_log_insert AFTER INSERT ON votes
BEGIN
    INSERT INTO change_log (table_name, kind, row_id, poll_id)
    VALUES ('votes', 'insert', NEW.vote_id, NEW.poll_id);
END;

CREATE TRIGGER IF NOT EXISTS likes_log_insert AFTER INSERT ON likes
BEGIN
    INSERT INTO change_log (table_name, kind, row_id, poll_id)
    VALUES ('likes', 'insert', NEW.like_id, NEW.poll_id);
END;

CREATE TRIGGER IF NOT EXISTS likes_log_delete AFTER DELETE ON likes
BEGIN
    INSERT INTO change_log (table_name, kind, row_id, poll_id)
    VALUES ('likes', 'delete', OLD.like_id, OLD.poll_id);
END;

PRAGMA user_version = 1;
";
