use log::info;
use sqlx::{Executor, PgPool};

/// Schema for the camera state table. Idempotent.
const SCHEMA: &[(&str, &str)] = &[
    (
        "001_camera_state",
        r#"
        CREATE TABLE IF NOT EXISTS camera_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ),
];

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    for (name, sql) in SCHEMA {
        pool.execute(*sql).await?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered_and_idempotent() {
        let names: Vec<_> = SCHEMA.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(SCHEMA.iter().all(|(_, sql)| sql.contains("IF NOT EXISTS")));
    }
}
