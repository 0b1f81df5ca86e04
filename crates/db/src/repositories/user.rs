use sqlx::{QueryBuilder, Row};

use agenda_core::domain::user::{normalize_email, User, UserId, UserRole};

use super::{decode_timestamp, encode_timestamp, RepositoryError, UserRepository};
use crate::DbPool;

const USER_COLUMNS: &str = "id, name, email, password_hash, role, created_at, updated_at";

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let email: String =
        row.try_get("email").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let password_hash: String =
        row.try_get("password_hash").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let role: String = row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let role = UserRole::parse(&role)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown user role `{role}`")))?;

    Ok(User {
        id: UserId(id),
        name,
        email,
        password_hash,
        role,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE email = ?"))
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_builder = QueryBuilder::<sqlx::Sqlite>::new(format!(
            "SELECT {USER_COLUMNS} FROM app_user WHERE id IN ("
        ));
        let mut separated = query_builder.separated(", ");
        for id in ids {
            separated.push_bind(id.0.as_str());
        }
        query_builder.push(") ORDER BY name ASC");

        let rows = query_builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_user).collect()
    }

    async fn list_by_role(&self, role: UserRole) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM app_user WHERE role = ? ORDER BY name ASC, created_at ASC"
        ))
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_user).collect()
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO app_user (id, name, email, password_hash, role, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 password_hash = excluded.password_hash,
                 role = excluded.role,
                 updated_at = excluded.updated_at",
        )
        .bind(&user.id.0)
        .bind(&user.name)
        .bind(normalize_email(&user.email))
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(encode_timestamp(&user.created_at))
        .bind(encode_timestamp(&user.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => Err(
                RepositoryError::Conflict(format!("email `{}` is already registered", user.email)),
            ),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use agenda_core::domain::user::{User, UserId, UserRole};

    use super::SqlUserRepository;
    use crate::repositories::{RepositoryError, UserRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlUserRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlUserRepository::new(pool)
    }

    fn sample_user(id: &str, name: &str, email: &str, role: UserRole) -> User {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        User {
            id: UserId(id.to_string()),
            name: name.to_string(),
            email: email.to_string(),
            password_hash: "hmac-sha256$1000$00$00".to_string(),
            role,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_find_by_id_and_email() {
        let repo = setup().await;
        let user = sample_user("u-ava", "Ava", "ava@example.com", UserRole::User);

        repo.save(user.clone()).await.expect("save");

        let by_id = repo.find_by_id(&user.id).await.expect("find by id");
        assert_eq!(by_id, Some(user.clone()));

        let by_email = repo.find_by_email("  AVA@Example.com ").await.expect("find by email");
        assert_eq!(by_email.map(|found| found.id), Some(user.id));
    }

    #[tokio::test]
    async fn duplicate_email_for_another_id_is_a_conflict() {
        let repo = setup().await;
        repo.save(sample_user("u-1", "Ava", "ava@example.com", UserRole::User)).await.expect("save");

        let error = repo
            .save(sample_user("u-2", "Impostor", "ava@example.com", UserRole::Friend))
            .await
            .expect_err("duplicate email");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn save_is_an_upsert_by_id() {
        let repo = setup().await;
        let mut user = sample_user("u-1", "Ava", "ava@example.com", UserRole::User);
        repo.save(user.clone()).await.expect("insert");

        user.name = "Ava Lind".to_string();
        repo.save(user.clone()).await.expect("update");

        let found = repo.find_by_id(&user.id).await.expect("find").expect("exists");
        assert_eq!(found.name, "Ava Lind");
    }

    #[tokio::test]
    async fn list_by_role_returns_only_friends() {
        let repo = setup().await;
        repo.save(sample_user("u-1", "Ava", "ava@example.com", UserRole::User)).await.expect("1");
        repo.save(sample_user("u-2", "Ben", "ben@example.com", UserRole::Friend)).await.expect("2");
        repo.save(sample_user("u-3", "Cleo", "cleo@example.com", UserRole::Friend))
            .await
            .expect("3");

        let friends = repo.list_by_role(UserRole::Friend).await.expect("list");
        let names: Vec<&str> = friends.iter().map(|user| user.name.as_str()).collect();
        assert_eq!(names, vec!["Ben", "Cleo"]);
    }

    #[tokio::test]
    async fn find_many_skips_unknown_ids() {
        let repo = setup().await;
        repo.save(sample_user("u-1", "Ava", "ava@example.com", UserRole::User)).await.expect("1");
        repo.save(sample_user("u-2", "Ben", "ben@example.com", UserRole::Friend)).await.expect("2");

        let found = repo
            .find_many(&[UserId("u-2".to_string()), UserId("u-missing".to_string())])
            .await
            .expect("find many");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, UserId("u-2".to_string()));

        assert!(repo.find_many(&[]).await.expect("empty").is_empty());
    }
}
