use std::collections::HashSet;
use std::str::FromStr;

use chrono::{Local, NaiveDate};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};

use crate::error::{StoreError, ValidationError};
use crate::models::{ImprovementTarget, Leader, LeaderAssessment, ScoreRecord, Scores};
use crate::registry::DimensionRegistry;

/// Opens (creating if needed) the SQLite database behind `database_url`.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    if in_memory {
        // Every connection to `:memory:` is a separate database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        return Ok(pool);
    }

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Creates missing tables and adds a column for every registry dimension an
/// existing assessments table does not have yet.
pub async fn init_db(pool: &SqlitePool, registry: &DimensionRegistry) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS grid_leaders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            area TEXT NOT NULL,
            UNIQUE (name, area)
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    let dimension_columns: String = registry.keys().map(|key| format!("{key} REAL, ")).collect();
    let create_assessments = format!(
        "CREATE TABLE IF NOT EXISTS assessments (\
         id INTEGER PRIMARY KEY AUTOINCREMENT, \
         leader_id INTEGER NOT NULL, \
         date TEXT NOT NULL, \
         {dimension_columns}\
         import_date TEXT NOT NULL, \
         FOREIGN KEY (leader_id) REFERENCES grid_leaders (id))"
    );
    sqlx::query(&create_assessments).execute(&mut *tx).await?;

    let existing = sqlx::query("PRAGMA table_info(assessments)")
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect::<Result<HashSet<String>, _>>()?;

    for key in registry.keys().filter(|key| !existing.contains(*key)) {
        tracing::info!(column = key, "adding dimension column to assessments");
        sqlx::query(&format!("ALTER TABLE assessments ADD COLUMN {key} REAL"))
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS assessments_leader_date ON assessments (leader_id, date)",
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS improvement_targets (
            leader_id INTEGER NOT NULL,
            dimension TEXT NOT NULL,
            target_score REAL NOT NULL,
            PRIMARY KEY (leader_id, dimension),
            FOREIGN KEY (leader_id) REFERENCES grid_leaders (id)
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Loads a small demo team so the reports have something to show.
pub async fn seed(pool: &SqlitePool, registry: &DimensionRegistry) -> Result<usize, StoreError> {
    let leaders = vec![
        ("Avery Lee", "North Grid", 88.0),
        ("Jules Moreno", "Riverside Grid", 76.0),
        ("Kiara Patel", "Old Town Grid", 63.0),
    ];
    let dates = [
        NaiveDate::from_ymd_opt(2025, 5, 31),
        NaiveDate::from_ymd_opt(2025, 6, 30),
    ];
    let today = Local::now().date_naive();

    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for (name, area, base) in leaders {
        let (leader, _) = upsert_leader_in(&mut tx, name, area).await?;
        for (month, date) in dates.iter().flatten().enumerate() {
            let scores: Scores = registry
                .keys()
                .enumerate()
                .map(|(index, key)| {
                    let offset = ((index * 7 + month * 3) % 11) as f64 - 5.0;
                    (key.to_string(), (base + offset).clamp(0.0, 100.0))
                })
                .collect();
            insert_score_record(&mut tx, registry, leader.id, *date, &scores, today).await?;
            inserted += 1;
        }
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Returns the leader identified by `(name, area)`, creating it on first sight.
pub async fn upsert_leader(pool: &SqlitePool, name: &str, area: &str) -> Result<Leader, StoreError> {
    let mut conn = pool.acquire().await?;
    let (leader, _) = upsert_leader_in(&mut conn, name, area).await?;
    Ok(leader)
}

/// Insert-or-ignore on `(name, area)`; the flag reports whether a row was created.
pub(crate) async fn upsert_leader_in(
    conn: &mut SqliteConnection,
    name: &str,
    area: &str,
) -> Result<(Leader, bool), StoreError> {
    let created = sqlx::query(
        "INSERT INTO grid_leaders (name, area) VALUES (?, ?) ON CONFLICT (name, area) DO NOTHING",
    )
    .bind(name)
    .bind(area)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        > 0;

    let row = sqlx::query("SELECT id, name, area FROM grid_leaders WHERE name = ? AND area = ?")
        .bind(name)
        .bind(area)
        .fetch_one(&mut *conn)
        .await?;

    Ok((leader_from_row(&row)?, created))
}

pub async fn list_leaders(pool: &SqlitePool) -> Result<Vec<Leader>, StoreError> {
    let rows = sqlx::query("SELECT id, name, area FROM grid_leaders ORDER BY name, area")
        .fetch_all(pool)
        .await?;
    let leaders = rows.iter().map(leader_from_row).collect::<Result<_, _>>()?;
    Ok(leaders)
}

pub async fn find_leader(
    pool: &SqlitePool,
    name: &str,
    area: &str,
) -> Result<Option<Leader>, StoreError> {
    let row = sqlx::query("SELECT id, name, area FROM grid_leaders WHERE name = ? AND area = ?")
        .bind(name)
        .bind(area)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(leader_from_row).transpose()?)
}

pub async fn get_leader(pool: &SqlitePool, leader_id: i64) -> Result<Leader, StoreError> {
    let row = sqlx::query("SELECT id, name, area FROM grid_leaders WHERE id = ?")
        .bind(leader_id)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::LeaderNotFound(leader_id))?;
    Ok(leader_from_row(&row)?)
}

/// Rejects the whole score map if any key is unknown or any value falls
/// outside [0, 100].
pub fn validate_scores(scores: &Scores, registry: &DimensionRegistry) -> Result<(), ValidationError> {
    for (key, value) in scores {
        if !registry.contains_key(key) {
            return Err(ValidationError::UnknownDimension(key.clone()));
        }
        if !value.is_finite() || !(0.0..=100.0).contains(value) {
            return Err(ValidationError::ScoreOutOfRange {
                key: key.clone(),
                value: *value,
            });
        }
    }
    Ok(())
}

/// Adds an assessment for an existing leader, stamped with today's import date.
pub async fn add_score_record(
    pool: &SqlitePool,
    registry: &DimensionRegistry,
    leader_id: i64,
    date: NaiveDate,
    scores: &Scores,
) -> Result<ScoreRecord, StoreError> {
    validate_scores(scores, registry)?;

    let mut tx = pool.begin().await?;
    let exists = sqlx::query("SELECT 1 FROM grid_leaders WHERE id = ?")
        .bind(leader_id)
        .fetch_optional(&mut *tx)
        .await?
        .is_some();
    if !exists {
        return Err(StoreError::LeaderNotFound(leader_id));
    }

    let today = Local::now().date_naive();
    let id = insert_score_record(&mut tx, registry, leader_id, date, scores, today).await?;
    let record = fetch_record(&mut tx, registry, id).await?;
    tx.commit().await?;

    tracing::info!(record_id = id, leader_id, %date, "added score record");
    Ok(record)
}

/// Creates the leader if needed and adds one assessment in a single
/// transaction, so a rejected score leaves no new leader behind.
pub async fn record_assessment(
    pool: &SqlitePool,
    registry: &DimensionRegistry,
    name: &str,
    area: &str,
    date: NaiveDate,
    scores: &Scores,
) -> Result<(Leader, ScoreRecord), StoreError> {
    validate_scores(scores, registry)?;

    let mut tx = pool.begin().await?;
    let (leader, created) = upsert_leader_in(&mut tx, name, area).await?;
    let today = Local::now().date_naive();
    let id = insert_score_record(&mut tx, registry, leader.id, date, scores, today).await?;
    let record = fetch_record(&mut tx, registry, id).await?;
    tx.commit().await?;

    tracing::info!(record_id = id, leader_id = leader.id, created, %date, "recorded assessment");
    Ok((leader, record))
}

pub(crate) async fn insert_score_record(
    conn: &mut SqliteConnection,
    registry: &DimensionRegistry,
    leader_id: i64,
    date: NaiveDate,
    scores: &Scores,
    import_date: NaiveDate,
) -> Result<i64, StoreError> {
    validate_scores(scores, registry)?;

    let keys: Vec<&str> = registry.keys().collect();
    let sql = format!(
        "INSERT INTO assessments (leader_id, date, {}, import_date) VALUES (?, ?, {}, ?)",
        keys.join(", "),
        vec!["?"; keys.len()].join(", ")
    );

    let mut query = sqlx::query(&sql).bind(leader_id).bind(date);
    for key in &keys {
        query = query.bind(scores.get(*key).copied());
    }
    let result = query.bind(import_date).execute(&mut *conn).await?;
    Ok(result.last_insert_rowid())
}

/// Rewrites every dimension column of one record; dimensions absent from
/// `scores` are cleared.
pub async fn update_score_record(
    pool: &SqlitePool,
    registry: &DimensionRegistry,
    record_id: i64,
    scores: &Scores,
) -> Result<ScoreRecord, StoreError> {
    validate_scores(scores, registry)?;

    let keys: Vec<&str> = registry.keys().collect();
    let assignments = keys
        .iter()
        .map(|key| format!("{key} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE assessments SET {assignments} WHERE id = ?");

    let mut tx = pool.begin().await?;
    let mut query = sqlx::query(&sql);
    for key in &keys {
        query = query.bind(scores.get(*key).copied());
    }
    let affected = query.bind(record_id).execute(&mut *tx).await?.rows_affected();
    if affected == 0 {
        return Err(StoreError::RecordNotFound(record_id));
    }

    let record = fetch_record(&mut tx, registry, record_id).await?;
    tx.commit().await?;

    tracing::info!(record_id, "updated score record");
    Ok(record)
}

pub async fn get_record(
    pool: &SqlitePool,
    registry: &DimensionRegistry,
    record_id: i64,
) -> Result<ScoreRecord, StoreError> {
    let mut conn = pool.acquire().await?;
    fetch_record(&mut conn, registry, record_id).await
}

async fn fetch_record(
    conn: &mut SqliteConnection,
    registry: &DimensionRegistry,
    record_id: i64,
) -> Result<ScoreRecord, StoreError> {
    let sql = format!(
        "SELECT {} FROM assessments a WHERE a.id = ?",
        record_columns(registry)
    );
    let row = sqlx::query(&sql)
        .bind(record_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StoreError::RecordNotFound(record_id))?;
    Ok(record_from_row(&row, registry)?)
}

/// All records of one leader, most recent assessment date first.
pub async fn list_records(
    pool: &SqlitePool,
    registry: &DimensionRegistry,
    leader_id: i64,
) -> Result<Vec<ScoreRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM assessments a WHERE a.leader_id = ? ORDER BY a.date DESC, a.id DESC",
        record_columns(registry)
    );
    let rows = sqlx::query(&sql).bind(leader_id).fetch_all(pool).await?;
    let records = rows
        .iter()
        .map(|row| record_from_row(row, registry))
        .collect::<Result<_, _>>()?;
    Ok(records)
}

/// One record per leader: the latest assessment date, and among records
/// sharing that date the one inserted last.
pub async fn latest_per_leader(
    pool: &SqlitePool,
    registry: &DimensionRegistry,
) -> Result<Vec<LeaderAssessment>, StoreError> {
    let sql = format!(
        "SELECT {}, g.name AS name, g.area AS area \
         FROM assessments a \
         JOIN grid_leaders g ON g.id = a.leader_id \
         WHERE a.id = (\
             SELECT b.id FROM assessments b \
             WHERE b.leader_id = a.leader_id \
             ORDER BY b.date DESC, b.id DESC LIMIT 1) \
         ORDER BY g.name, g.area",
        record_columns(registry)
    );
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    let assessments = rows
        .iter()
        .map(|row| assessment_from_row(row, registry))
        .collect::<Result<_, _>>()?;
    Ok(assessments)
}

/// Every record joined with its leader, optionally limited to one leader, in
/// insertion order. Re-importing the rows in this order keeps the
/// same-date tie-break of `latest_per_leader`.
pub async fn all_records(
    pool: &SqlitePool,
    registry: &DimensionRegistry,
    leader_id: Option<i64>,
) -> Result<Vec<LeaderAssessment>, StoreError> {
    let mut sql = format!(
        "SELECT {}, g.name AS name, g.area AS area \
         FROM assessments a \
         JOIN grid_leaders g ON g.id = a.leader_id",
        record_columns(registry)
    );
    if leader_id.is_some() {
        sql.push_str(" WHERE a.leader_id = ?");
    }
    sql.push_str(" ORDER BY a.id");

    let mut query = sqlx::query(&sql);
    if let Some(value) = leader_id {
        query = query.bind(value);
    }

    let rows = query.fetch_all(pool).await?;
    let assessments = rows
        .iter()
        .map(|row| assessment_from_row(row, registry))
        .collect::<Result<_, _>>()?;
    Ok(assessments)
}

/// Retention purge: removes records imported before `cutoff`, whatever their
/// assessment date.
pub async fn purge_older_than(pool: &SqlitePool, cutoff: NaiveDate) -> Result<u64, StoreError> {
    let removed = sqlx::query("DELETE FROM assessments WHERE import_date < ?")
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();
    tracing::warn!(removed, %cutoff, "purged score records");
    Ok(removed)
}

pub async fn reset_all(pool: &SqlitePool) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM improvement_targets")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM assessments").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM grid_leaders").execute(&mut *tx).await?;
    tx.commit().await?;
    tracing::warn!("deleted all leaders and score records");
    Ok(())
}

/// Saves (or replaces) a leader's goal for one dimension.
pub async fn set_target(
    pool: &SqlitePool,
    registry: &DimensionRegistry,
    leader_id: i64,
    dimension: &str,
    target_score: f64,
) -> Result<ImprovementTarget, StoreError> {
    let single: Scores = [(dimension.to_string(), target_score)].into_iter().collect();
    validate_scores(&single, registry)?;
    get_leader(pool, leader_id).await?;

    sqlx::query(
        r#"
        INSERT INTO improvement_targets (leader_id, dimension, target_score)
        VALUES (?, ?, ?)
        ON CONFLICT (leader_id, dimension) DO UPDATE
        SET target_score = excluded.target_score
        "#,
    )
    .bind(leader_id)
    .bind(dimension)
    .bind(target_score)
    .execute(pool)
    .await?;

    Ok(ImprovementTarget {
        leader_id,
        dimension: dimension.to_string(),
        target_score,
    })
}

pub async fn list_targets(
    pool: &SqlitePool,
    leader_id: i64,
) -> Result<Vec<ImprovementTarget>, StoreError> {
    let rows = sqlx::query(
        "SELECT leader_id, dimension, target_score FROM improvement_targets \
         WHERE leader_id = ? ORDER BY dimension",
    )
    .bind(leader_id)
    .fetch_all(pool)
    .await?;

    let mut targets = Vec::with_capacity(rows.len());
    for row in rows {
        targets.push(ImprovementTarget {
            leader_id: row.try_get("leader_id")?,
            dimension: row.try_get("dimension")?,
            target_score: row.try_get("target_score")?,
        });
    }
    Ok(targets)
}

fn record_columns(registry: &DimensionRegistry) -> String {
    ["id", "leader_id", "date"]
        .into_iter()
        .chain(registry.keys())
        .chain(["import_date"])
        .map(|column| format!("a.{column} AS {column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn leader_from_row(row: &SqliteRow) -> Result<Leader, sqlx::Error> {
    Ok(Leader {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        area: row.try_get("area")?,
    })
}

fn record_from_row(row: &SqliteRow, registry: &DimensionRegistry) -> Result<ScoreRecord, sqlx::Error> {
    let mut scores = Scores::new();
    for key in registry.keys() {
        if let Some(value) = row.try_get::<Option<f64>, _>(key)? {
            scores.insert(key.to_string(), value);
        }
    }

    Ok(ScoreRecord {
        id: row.try_get("id")?,
        leader_id: row.try_get("leader_id")?,
        date: row.try_get("date")?,
        scores,
        import_date: row.try_get("import_date")?,
    })
}

fn assessment_from_row(
    row: &SqliteRow,
    registry: &DimensionRegistry,
) -> Result<LeaderAssessment, sqlx::Error> {
    let record = record_from_row(row, registry)?;
    Ok(LeaderAssessment {
        leader: Leader {
            id: record.leader_id,
            name: row.try_get("name")?,
            area: row.try_get("area")?,
        },
        record,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry;

    pub(crate) async fn memory_pool(registry: &DimensionRegistry) -> SqlitePool {
        let pool = connect("sqlite::memory:").await.unwrap();
        init_db(&pool, registry).await.unwrap();
        pool
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn scores(pairs: &[(&str, f64)]) -> Scores {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    async fn record_count(pool: &SqlitePool) -> i64 {
        sqlx::query("SELECT COUNT(*) AS n FROM assessments")
            .fetch_one(pool)
            .await
            .unwrap()
            .get("n")
    }

    #[tokio::test]
    async fn upsert_leader_is_idempotent_per_name_and_area() {
        let registry = registry::simplified().unwrap();
        let pool = memory_pool(&registry).await;

        let first = upsert_leader(&pool, "Avery Lee", "North").await.unwrap();
        let again = upsert_leader(&pool, "Avery Lee", "North").await.unwrap();
        let other_area = upsert_leader(&pool, "Avery Lee", "South").await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first.id, other_area.id);
        assert_eq!(list_leaders(&pool).await.unwrap().len(), 2);
        assert_eq!(
            find_leader(&pool, "Avery Lee", "South").await.unwrap(),
            Some(other_area)
        );
    }

    #[tokio::test]
    async fn add_rejects_out_of_range_scores_without_writing() {
        let registry = registry::simplified().unwrap();
        let pool = memory_pool(&registry).await;
        let leader = upsert_leader(&pool, "Jules", "Riverside").await.unwrap();

        let err = add_score_record(
            &pool,
            &registry,
            leader.id,
            date(2025, 6, 30),
            &scores(&[("professional_skill", 80.0), ("index_mastery", 101.0)]),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::ScoreOutOfRange { ref key, .. }) if key == "index_mastery"
        ));

        let err = add_score_record(
            &pool,
            &registry,
            leader.id,
            date(2025, 6, 30),
            &scores(&[("not_a_dimension", 50.0)]),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::UnknownDimension(_))
        ));
        assert_eq!(record_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn rejected_assessment_leaves_no_new_leader() {
        let registry = registry::simplified().unwrap();
        let pool = memory_pool(&registry).await;

        let err = record_assessment(
            &pool,
            &registry,
            "Ghost",
            "Nowhere",
            date(2025, 6, 30),
            &scores(&[("professional_skill", 150.0)]),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::ScoreOutOfRange { .. })
        ));
        assert_eq!(find_leader(&pool, "Ghost", "Nowhere").await.unwrap(), None);
        assert_eq!(record_count(&pool).await, 0);

        let (leader, record) = record_assessment(
            &pool,
            &registry,
            "Ghost",
            "Nowhere",
            date(2025, 6, 30),
            &scores(&[("professional_skill", 80.0)]),
        )
        .await
        .unwrap();
        assert_eq!(record.leader_id, leader.id);
        assert_eq!(list_leaders(&pool).await.unwrap(), vec![leader]);
    }

    #[tokio::test]
    async fn add_requires_existing_leader() {
        let registry = registry::simplified().unwrap();
        let pool = memory_pool(&registry).await;
        let err = add_score_record(&pool, &registry, 42, date(2025, 6, 30), &Scores::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LeaderNotFound(42)));
    }

    #[tokio::test]
    async fn add_stores_scores_and_import_date() {
        let registry = registry::simplified().unwrap();
        let pool = memory_pool(&registry).await;
        let leader = upsert_leader(&pool, "Kiara", "Old Town").await.unwrap();

        let record = add_score_record(
            &pool,
            &registry,
            leader.id,
            date(2025, 6, 30),
            &scores(&[("professional_skill", 91.5)]),
        )
        .await
        .unwrap();

        assert_eq!(record.leader_id, leader.id);
        assert_eq!(record.scores.get("professional_skill"), Some(&91.5));
        assert_eq!(record.scores.get("index_mastery"), None);
        assert_eq!(record.import_date, Local::now().date_naive());
        assert_eq!(get_record(&pool, &registry, record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn update_overwrites_every_dimension() {
        let registry = registry::simplified().unwrap();
        let pool = memory_pool(&registry).await;
        let leader = upsert_leader(&pool, "Kiara", "Old Town").await.unwrap();
        let record = add_score_record(
            &pool,
            &registry,
            leader.id,
            date(2025, 6, 30),
            &scores(&[("professional_skill", 70.0), ("index_mastery", 60.0)]),
        )
        .await
        .unwrap();

        let updated = update_score_record(
            &pool,
            &registry,
            record.id,
            &scores(&[("professional_skill", 75.0)]),
        )
        .await
        .unwrap();
        assert_eq!(updated.scores, scores(&[("professional_skill", 75.0)]));

        let rejected = update_score_record(
            &pool,
            &registry,
            record.id,
            &scores(&[("professional_skill", -1.0)]),
        )
        .await;
        assert!(rejected.is_err());
        assert_eq!(get_record(&pool, &registry, record.id).await.unwrap(), updated);

        let missing = update_score_record(&pool, &registry, 999, &Scores::new()).await;
        assert!(matches!(missing, Err(StoreError::RecordNotFound(999))));
    }

    #[tokio::test]
    async fn records_list_newest_first_and_latest_breaks_ties_by_insert_order() {
        let registry = registry::simplified().unwrap();
        let pool = memory_pool(&registry).await;
        let avery = upsert_leader(&pool, "Avery", "North").await.unwrap();
        let jules = upsert_leader(&pool, "Jules", "South").await.unwrap();

        for (day, value) in [(1, 50.0), (30, 60.0), (15, 70.0)] {
            add_score_record(
                &pool,
                &registry,
                avery.id,
                date(2025, 6, day),
                &scores(&[("professional_skill", value)]),
            )
            .await
            .unwrap();
        }
        add_score_record(
            &pool,
            &registry,
            avery.id,
            date(2025, 6, 30),
            &scores(&[("professional_skill", 65.0)]),
        )
        .await
        .unwrap();
        add_score_record(
            &pool,
            &registry,
            jules.id,
            date(2025, 5, 31),
            &scores(&[("professional_skill", 80.0)]),
        )
        .await
        .unwrap();

        let history = list_records(&pool, &registry, avery.id).await.unwrap();
        let dates: Vec<NaiveDate> = history.iter().map(|r| r.date).collect();
        assert_eq!(
            dates,
            vec![date(2025, 6, 30), date(2025, 6, 30), date(2025, 6, 15), date(2025, 6, 1)]
        );

        let latest = latest_per_leader(&pool, &registry).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].leader.name, "Avery");
        assert_eq!(latest[0].record.scores.get("professional_skill"), Some(&65.0));
        assert_eq!(latest[1].leader, jules);

        let exported = all_records(&pool, &registry, Some(jules.id)).await.unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(all_records(&pool, &registry, None).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn purge_uses_import_date_not_assessment_date() {
        let registry = registry::simplified().unwrap();
        let pool = memory_pool(&registry).await;
        let leader = upsert_leader(&pool, "Avery", "North").await.unwrap();

        {
            let mut conn = pool.acquire().await.unwrap();
            // Old assessment, imported recently.
            insert_score_record(&mut conn, &registry, leader.id, date(2020, 1, 1), &Scores::new(), date(2025, 6, 20))
                .await
                .unwrap();
            // Recent assessment, imported long ago.
            insert_score_record(&mut conn, &registry, leader.id, date(2025, 6, 1), &Scores::new(), date(2025, 1, 1))
                .await
                .unwrap();
            // Imported exactly on the cutoff.
            insert_score_record(&mut conn, &registry, leader.id, date(2025, 6, 2), &Scores::new(), date(2025, 6, 1))
                .await
                .unwrap();
        }

        let removed = purge_older_than(&pool, date(2025, 6, 1)).await.unwrap();
        assert_eq!(removed, 1);

        let remaining = list_records(&pool, &registry, leader.id).await.unwrap();
        let mut imported: Vec<NaiveDate> = remaining.iter().map(|r| r.import_date).collect();
        imported.sort();
        assert_eq!(imported, vec![date(2025, 6, 1), date(2025, 6, 20)]);
    }

    #[tokio::test]
    async fn reset_removes_everything() {
        let registry = registry::simplified().unwrap();
        let pool = memory_pool(&registry).await;
        let seeded = seed(&pool, &registry).await.unwrap();
        assert_eq!(seeded, 6);
        let leader = list_leaders(&pool).await.unwrap().remove(0);
        set_target(&pool, &registry, leader.id, "index_mastery", 90.0)
            .await
            .unwrap();

        reset_all(&pool).await.unwrap();

        assert!(list_leaders(&pool).await.unwrap().is_empty());
        assert_eq!(record_count(&pool).await, 0);
        assert!(list_targets(&pool, leader.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn init_db_adds_columns_for_new_dimensions() {
        let simplified = registry::simplified().unwrap();
        let pool = memory_pool(&simplified).await;
        let leader = upsert_leader(&pool, "Avery", "North").await.unwrap();
        add_score_record(
            &pool,
            &simplified,
            leader.id,
            date(2025, 6, 30),
            &scores(&[("professional_skill", 80.0)]),
        )
        .await
        .unwrap();

        let operational = registry::operational().unwrap();
        init_db(&pool, &operational).await.unwrap();

        let records = list_records(&pool, &operational, leader.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scores.get("professional_skill"), Some(&80.0));
        assert_eq!(records[0].scores.get("terminal_revenue"), None);
    }

    #[tokio::test]
    async fn targets_are_replaced_per_dimension() {
        let registry = registry::simplified().unwrap();
        let pool = memory_pool(&registry).await;
        let leader = upsert_leader(&pool, "Avery", "North").await.unwrap();

        set_target(&pool, &registry, leader.id, "index_mastery", 80.0)
            .await
            .unwrap();
        set_target(&pool, &registry, leader.id, "index_mastery", 85.0)
            .await
            .unwrap();
        set_target(&pool, &registry, leader.id, "marketing_ability", 70.0)
            .await
            .unwrap();

        let targets = list_targets(&pool, leader.id).await.unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].dimension, "index_mastery");
        assert_eq!(targets[0].target_score, 85.0);

        assert!(set_target(&pool, &registry, leader.id, "index_mastery", 150.0)
            .await
            .is_err());
        assert!(matches!(
            set_target(&pool, &registry, 77, "index_mastery", 50.0).await,
            Err(StoreError::LeaderNotFound(77))
        ));
    }
}
