use sqlx::{postgres::PgPoolOptions, PgPool};

pub fn get_db_url_with_name(db_url: &str, name: &str) -> String {
    let separator = if db_url.contains('?') { '&' } else { '?' };
    format!("{db_url}{separator}application_name={name}")
}

pub async fn get_db_pool(db_url: &str, name: &str, max_connections: u32) -> sqlx::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&get_db_url_with_name(db_url, name))
        .await
}
