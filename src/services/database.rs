use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::models::{
    DailyGoals, DailyTotals, DietLogEntry, HistoryEntry, MealType, Reminder, ReminderStatus,
};

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let db = Database { pool };
        db.init_tables().await?;
        Ok(db)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_history (
                id SERIAL PRIMARY KEY,
                query TEXT NOT NULL,
                product_id TEXT,
                user_id TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS diet_logs (
                id SERIAL PRIMARY KEY,
                user_id TEXT NOT NULL,
                date DATE NOT NULL,
                product_name TEXT NOT NULL,
                brand TEXT,
                meal_type TEXT NOT NULL,
                portion TEXT NOT NULL,
                calories DOUBLE PRECISION NOT NULL,
                protein DOUBLE PRECISION NOT NULL,
                carbs DOUBLE PRECISION NOT NULL,
                fat DOUBLE PRECISION NOT NULL,
                allergens TEXT[] NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reminders (
                id SERIAL PRIMARY KEY,
                user_id TEXT NOT NULL,
                message TEXT NOT NULL,
                remind_at TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled',
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_goals (
                user_id TEXT PRIMARY KEY,
                calories DOUBLE PRECISION NOT NULL,
                protein DOUBLE PRECISION NOT NULL,
                carbs DOUBLE PRECISION NOT NULL,
                fat DOUBLE PRECISION NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_history(
        &self,
        query: &str,
        product_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<HistoryEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO search_history (query, product_id, user_id, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, query, product_id, user_id, created_at
            "#,
        )
        .bind(query)
        .bind(product_id)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(history_from_row(&row)?)
    }

    pub async fn list_history(
        &self,
        user_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HistoryEntry>> {
        let rows = match user_id {
            Some(user_id) => {
                sqlx::query(
                    r#"
                    SELECT id, query, product_id, user_id, created_at
                    FROM search_history
                    WHERE user_id = $1
                    ORDER BY created_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, query, product_id, user_id, created_at
                    FROM search_history
                    ORDER BY created_at DESC
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(history_from_row).collect()
    }

    pub async fn insert_diet_log(
        &self,
        user_id: &str,
        date: NaiveDate,
        product_name: &str,
        brand: Option<&str>,
        meal_type: MealType,
        portion: &str,
        calories: f64,
        protein: f64,
        carbs: f64,
        fat: f64,
        allergens: &[String],
    ) -> Result<DietLogEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO diet_logs (
                user_id, date, product_name, brand, meal_type, portion,
                calories, protein, carbs, fat, allergens, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id, user_id, date, product_name, brand, meal_type, portion,
                      calories, protein, carbs, fat, allergens, created_at
            "#,
        )
        .bind(user_id)
        .bind(date)
        .bind(product_name)
        .bind(brand)
        .bind(meal_type.to_string())
        .bind(portion)
        .bind(calories)
        .bind(protein)
        .bind(carbs)
        .bind(fat)
        .bind(allergens)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(diet_log_from_row(&row)?)
    }

    pub async fn list_diet_logs(&self, user_id: &str, date: NaiveDate) -> Result<Vec<DietLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, date, product_name, brand, meal_type, portion,
                   calories, protein, carbs, fat, allergens, created_at
            FROM diet_logs
            WHERE user_id = $1 AND date = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(diet_log_from_row).collect()
    }

    pub async fn daily_totals(&self, user_id: &str, date: NaiveDate) -> Result<DailyTotals> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(calories), 0) as calories,
                   COALESCE(SUM(protein), 0) as protein,
                   COALESCE(SUM(carbs), 0) as carbs,
                   COALESCE(SUM(fat), 0) as fat
            FROM diet_logs
            WHERE user_id = $1 AND date = $2
            "#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;

        Ok(DailyTotals {
            calories: row.try_get("calories")?,
            protein: row.try_get("protein")?,
            carbs: row.try_get("carbs")?,
            fat: row.try_get("fat")?,
        })
    }

    pub async fn insert_reminder(
        &self,
        user_id: &str,
        message: &str,
        remind_at: DateTime<Utc>,
    ) -> Result<Reminder> {
        let row = sqlx::query(
            r#"
            INSERT INTO reminders (user_id, message, remind_at, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, message, remind_at, status, created_at
            "#,
        )
        .bind(user_id)
        .bind(message)
        .bind(remind_at)
        .bind(ReminderStatus::Scheduled.to_string())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(reminder_from_row(&row)?)
    }

    pub async fn list_reminders(&self, user_id: &str) -> Result<Vec<Reminder>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, message, remind_at, status, created_at
            FROM reminders
            WHERE user_id = $1
            ORDER BY remind_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(reminder_from_row).collect()
    }

    pub async fn delete_reminder(&self, user_id: &str, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reminders WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Flip scheduled reminders whose time has passed to `due`. Returns
    /// how many were flipped; clients observe the change when listing.
    pub async fn mark_due_reminders(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE reminders SET status = 'due' WHERE status = 'scheduled' AND remind_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn upsert_goals(&self, user_id: &str, goals: &DailyGoals) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_goals (user_id, calories, protein, carbs, fat, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                calories = EXCLUDED.calories,
                protein = EXCLUDED.protein,
                carbs = EXCLUDED.carbs,
                fat = EXCLUDED.fat,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(goals.calories)
        .bind(goals.protein)
        .bind(goals.carbs)
        .bind(goals.fat)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_goals(&self, user_id: &str) -> Result<Option<DailyGoals>> {
        let row = sqlx::query(
            "SELECT calories, protein, carbs, fat FROM user_goals WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(DailyGoals {
                calories: row.try_get("calories")?,
                protein: row.try_get("protein")?,
                carbs: row.try_get("carbs")?,
                fat: row.try_get("fat")?,
            })),
            None => Ok(None),
        }
    }
}

fn history_from_row(row: &sqlx::postgres::PgRow) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.try_get::<i32, _>("id")? as i64,
        query: row.try_get("query")?,
        product_id: row.try_get("product_id")?,
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn diet_log_from_row(row: &sqlx::postgres::PgRow) -> Result<DietLogEntry> {
    let meal_type: String = row.try_get("meal_type")?;
    Ok(DietLogEntry {
        id: row.try_get::<i32, _>("id")? as i64,
        user_id: row.try_get("user_id")?,
        date: row.try_get("date")?,
        product_name: row.try_get("product_name")?,
        brand: row.try_get("brand")?,
        meal_type: MealType::from_string(&meal_type).unwrap_or(MealType::Snack),
        portion: row.try_get("portion")?,
        calories: row.try_get("calories")?,
        protein: row.try_get("protein")?,
        carbs: row.try_get("carbs")?,
        fat: row.try_get("fat")?,
        allergens: row.try_get("allergens")?,
        created_at: row.try_get("created_at")?,
    })
}

fn reminder_from_row(row: &sqlx::postgres::PgRow) -> Result<Reminder> {
    let status: String = row.try_get("status")?;
    Ok(Reminder {
        id: row.try_get::<i32, _>("id")? as i64,
        user_id: row.try_get("user_id")?,
        message: row.try_get("message")?,
        remind_at: row.try_get("remind_at")?,
        status: ReminderStatus::from_string(&status),
        created_at: row.try_get("created_at")?,
    })
}
