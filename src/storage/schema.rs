//! Database schema.
//!
//! One key table holds identity, type, version and expiry for every key.
//! Each value type has its own payload table pointing back at the key row;
//! deleting a key row cascades to its payload.

use sqlx::SqliteConnection;

pub(crate) const SCHEMA: &[&str] = &[
    "pragma foreign_keys = on",
    "create table if not exists
    rkey (
        id       integer primary key,
        key      text not null,
        type     integer not null,
        version  integer not null,
        etime    integer,
        mtime    integer not null
    )",
    "create unique index if not exists rkey_key_idx on rkey (key)",
    "create index if not exists rkey_etime_idx on rkey (etime) where etime is not null",
    "create table if not exists
    rstring (
        key_id integer not null references rkey(id) on delete cascade,
        value  blob not null
    )",
    "create unique index if not exists rstring_pk_idx on rstring (key_id)",
    "create table if not exists
    rlist (
        rowid  integer primary key,
        key_id integer not null references rkey(id) on delete cascade,
        pos    real not null,
        elem   blob not null
    )",
    "create unique index if not exists rlist_pk_idx on rlist (key_id, pos)",
    "create table if not exists
    rset (
        key_id integer not null references rkey(id) on delete cascade,
        elem   blob not null
    )",
    "create unique index if not exists rset_pk_idx on rset (key_id, elem)",
    "create table if not exists
    rhash (
        key_id integer not null references rkey(id) on delete cascade,
        field  text not null,
        value  blob not null
    )",
    "create unique index if not exists rhash_pk_idx on rhash (key_id, field)",
    "create table if not exists
    rzset (
        key_id integer not null references rkey(id) on delete cascade,
        elem   blob not null,
        score  real not null
    )",
    "create unique index if not exists rzset_pk_idx on rzset (key_id, elem)",
    "create index if not exists rzset_score_idx on rzset (key_id, score, elem)",
];

/// Creates all tables and indexes that do not exist yet.
pub(crate) async fn init(conn: &mut SqliteConnection) -> sqlx::Result<()> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(&mut *conn).await?;
    }
    Ok(())
}
