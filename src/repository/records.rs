//! Diesel row types for the catalog tables.

use diesel::prelude::*;

use crate::schema;

/// Work row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::works)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WorkRecord {
    pub id: i64,
    pub title: String,
    pub genre: String,
    pub region: String,
    pub year: String,
    pub actors: String,
    pub directors: String,
    pub synopsis: String,
    pub url: String,
    pub last_seen: String,
}

/// New or replacement work row.
#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::works)]
pub struct NewWork<'a> {
    pub id: i64,
    pub title: &'a str,
    pub genre: &'a str,
    pub region: &'a str,
    pub year: &'a str,
    pub actors: &'a str,
    pub directors: &'a str,
    pub synopsis: &'a str,
    pub url: &'a str,
    pub last_seen: &'a str,
}

/// Episode row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::episodes)]
#[diesel(primary_key(work_id, episode))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EpisodeRecord {
    pub work_id: i64,
    pub episode: i32,
    pub name: String,
    pub play_url: String,
    pub media_url: Option<String>,
    pub last_seen: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::episodes)]
pub struct NewEpisode<'a> {
    pub work_id: i64,
    pub episode: i32,
    pub name: &'a str,
    pub play_url: &'a str,
    pub media_url: Option<&'a str>,
    pub last_seen: &'a str,
}

/// Category progress row.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::category_progress)]
#[diesel(primary_key(category))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProgressRecord {
    pub category: i32,
    pub current_page: i32,
    pub total_pages: i32,
    pub last_work_id: Option<i64>,
    pub status: String,
    pub updated_at: String,
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::category_progress)]
#[diesel(treat_none_as_null = true)]
pub struct NewProgress<'a> {
    pub category: i32,
    pub current_page: i32,
    pub total_pages: i32,
    pub last_work_id: Option<i64>,
    pub status: &'a str,
    pub updated_at: &'a str,
}
