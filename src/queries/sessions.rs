use sea_query::{Expr, Query, SqliteQueryBuilder};
use uuid::Uuid;

use crate::schema::Sessions;

/// INSERT INTO sessions (id, user_id, created_at) VALUES (?, ?, ?)
pub fn insert(id: Uuid, user_id: &str, created_at_ms: i64) -> String {
    Query::insert()
        .into_table(Sessions::Table)
        .columns([Sessions::Id, Sessions::UserId, Sessions::CreatedAt])
        .values_panic([id.to_string().into(), user_id.into(), created_at_ms.into()])
        .to_string(SqliteQueryBuilder)
}

/// SELECT user_id FROM sessions WHERE id = ?
pub fn select_owner(id: Uuid) -> String {
    Query::select()
        .column(Sessions::UserId)
        .from(Sessions::Table)
        .and_where(Expr::col(Sessions::Id).eq(id.to_string()))
        .to_string(SqliteQueryBuilder)
}
