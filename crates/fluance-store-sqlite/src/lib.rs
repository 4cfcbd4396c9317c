use chrono::{DateTime, Utc};
use fluance_audit::{
    AuditAction, AuditEvent, AuditLog, AuditLogError, AuditLogFilter, AuditLogId, AuditResult,
};
use fluance_storage::{
    CloseTokenParams, CreateRecordParams, CreateTokenParams, EntitlementRecord, Grants,
    ProductGrant, RegistrationToken, Store, StoreError, TokenFilter, UpdateProductsParams, UserId,
    MAX_BATCH_OPS,
};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// `~/.fluance/ledger.db` (creates dir with 0700 perms on unix)
    pub async fn open_default() -> Result<Self, StoreError> {
        let dir = dirs::home_dir()
            .ok_or_else(|| StoreError::Backend("no home dir".into()))?
            .join(".fluance");
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Backend(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let path = dir.join("ledger.db");
        let url = format!("sqlite://{}?mode=rwc", path.to_string_lossy());
        Self::open(&url).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tracing::debug!(url, "ledger store opened");
        Ok(Self { pool })
    }
}

// ───────────────────────────── Row mapping ─────────────────────────────

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn insert_error(e: sqlx::Error) -> StoreError {
    let s = e.to_string();
    if s.contains("UNIQUE") {
        StoreError::AlreadyExists
    } else {
        StoreError::Backend(s)
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {ms}")))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(from_millis).transpose()
}

#[derive(FromRow)]
struct RecordRow {
    user_id: String,
    email: String,
    products: String,
    legacy_product: Option<String>,
    registration_date: Option<i64>,
    created_at: i64,
    updated_at: i64,
    revision: i64,
}

impl TryFrom<RecordRow> for EntitlementRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let products: Vec<ProductGrant> = serde_json::from_str(&row.products).map_err(backend)?;
        Ok(EntitlementRecord {
            user_id: UserId(row.user_id),
            email: row.email,
            products,
            legacy_product: row.legacy_product,
            registration_date: opt_from_millis(row.registration_date)?,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
            revision: row.revision,
        })
    }
}

const RECORD_COLUMNS: &str =
    "user_id, email, products, legacy_product, registration_date, created_at, updated_at, revision";

#[derive(FromRow)]
struct TokenRow {
    token: String,
    email: String,
    product: Option<String>,
    products: Option<String>,
    created_at: i64,
    expires_at: i64,
    used: bool,
    used_at: Option<i64>,
    user_id: Option<String>,
    note: Option<String>,
    invalidated_at: Option<i64>,
}

impl TryFrom<TokenRow> for RegistrationToken {
    type Error = StoreError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        let grants = match (row.product, row.products) {
            (_, Some(json)) => Grants::Multiple(serde_json::from_str(&json).map_err(backend)?),
            (Some(name), None) => Grants::Single(name),
            (None, None) => {
                return Err(StoreError::Backend(format!(
                    "token {} has no product",
                    row.token
                )))
            }
        };
        Ok(RegistrationToken {
            token: row.token,
            email: row.email,
            grants,
            created_at: from_millis(row.created_at)?,
            expires_at: from_millis(row.expires_at)?,
            used: row.used,
            used_at: opt_from_millis(row.used_at)?,
            user_id: row.user_id.map(UserId),
            note: row.note,
            invalidated_at: opt_from_millis(row.invalidated_at)?,
        })
    }
}

const TOKEN_COLUMNS: &str =
    "token, email, product, products, created_at, expires_at, used, used_at, user_id, note, invalidated_at";

/// Splits grants into the `product`/`products` column pair.
fn grant_columns(grants: &Grants) -> Result<(Option<String>, Option<String>), StoreError> {
    match grants {
        Grants::Single(name) => Ok((Some(name.clone()), None)),
        Grants::Multiple(names) => Ok((None, Some(serde_json::to_string(names).map_err(backend)?))),
    }
}

const CLOSE_TOKEN_SQL: &str = "UPDATE registration_tokens
     SET used = 1, used_at = ?1, user_id = ?2, note = COALESCE(?3, note), invalidated_at = ?4
     WHERE token = ?5 AND used = 0";

#[async_trait::async_trait]
impl Store for SqliteStore {
    // ───────────────────────────── Entitlement records ─────────────────────────────

    async fn create_record(
        &self,
        params: &CreateRecordParams,
    ) -> Result<EntitlementRecord, StoreError> {
        let now = Utc::now().timestamp_millis();
        let products = serde_json::to_string(&params.products).map_err(backend)?;
        sqlx::query(
            "INSERT INTO entitlement_records(user_id, email, products, legacy_product, registration_date, created_at, updated_at, revision)
             VALUES(?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(params.user_id.as_str())
        .bind(&params.email)
        .bind(products)
        .bind(&params.legacy_product)
        .bind(params.registration_date.map(|d| d.timestamp_millis()))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(insert_error)?;

        self.get_record(&params.user_id).await
    }

    async fn get_record(&self, user_id: &UserId) -> Result<EntitlementRecord, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM entitlement_records WHERE user_id = ?"
        ))
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            None => Err(StoreError::NotFound),
            Some(row) => row.try_into(),
        }
    }

    async fn find_records_by_email(
        &self,
        email: &str,
    ) -> Result<Vec<EntitlementRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM entitlement_records WHERE email = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(EntitlementRecord::try_from).collect()
    }

    async fn list_records(&self) -> Result<Vec<EntitlementRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM entitlement_records ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(EntitlementRecord::try_from).collect()
    }

    async fn update_products(
        &self,
        params: &UpdateProductsParams,
    ) -> Result<EntitlementRecord, StoreError> {
        let products = serde_json::to_string(&params.products).map_err(backend)?;
        let result = sqlx::query(
            "UPDATE entitlement_records
             SET products = ?, legacy_product = ?, updated_at = ?, revision = revision + 1
             WHERE user_id = ? AND revision = ?",
        )
        .bind(products)
        .bind(&params.legacy_product)
        .bind(Utc::now().timestamp_millis())
        .bind(params.user_id.as_str())
        .bind(params.expected_revision)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            // Either the record is gone or someone else wrote first.
            return match self.get_record(&params.user_id).await {
                Ok(_) => Err(StoreError::Conflict),
                Err(e) => Err(e),
            };
        }
        self.get_record(&params.user_id).await
    }

    // ───────────────────────────── Registration tokens ─────────────────────────────

    async fn create_token(
        &self,
        params: &CreateTokenParams,
    ) -> Result<RegistrationToken, StoreError> {
        let (product, products) = grant_columns(&params.grants)?;
        sqlx::query(
            "INSERT INTO registration_tokens(token, email, product, products, created_at, expires_at, used, note)
             VALUES(?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&params.token)
        .bind(&params.email)
        .bind(product)
        .bind(products)
        .bind(Utc::now().timestamp_millis())
        .bind(params.expires_at.timestamp_millis())
        .bind(&params.note)
        .execute(&self.pool)
        .await
        .map_err(insert_error)?;

        self.get_token(&params.token).await
    }

    async fn get_token(&self, token: &str) -> Result<RegistrationToken, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM registration_tokens WHERE token = ?"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            None => Err(StoreError::NotFound),
            Some(row) => row.try_into(),
        }
    }

    async fn list_tokens(
        &self,
        filter: &TokenFilter,
    ) -> Result<Vec<RegistrationToken>, StoreError> {
        // LIMIT -1 means unbounded in SQLite
        let rows = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM registration_tokens
             WHERE (?1 IS NULL OR email = ?1)
               AND (?2 IS NULL OR used = ?2)
               AND (?3 IS NULL OR created_at >= ?3)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?4"
        ))
        .bind(&filter.email)
        .bind(filter.used)
        .bind(filter.created_since.map(|d| d.timestamp_millis()))
        .bind(filter.limit.map(i64::from).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(RegistrationToken::try_from).collect()
    }

    async fn close_token(
        &self,
        token: &str,
        params: &CloseTokenParams,
    ) -> Result<RegistrationToken, StoreError> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(CLOSE_TOKEN_SQL)
            .bind(now)
            .bind(params.user_id.as_ref().map(UserId::as_str))
            .bind(&params.note)
            .bind(params.invalidated.then_some(now))
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return match self.get_token(token).await {
                Ok(_) => Err(StoreError::Conflict),
                Err(e) => Err(e),
            };
        }
        self.get_token(token).await
    }

    async fn close_tokens(
        &self,
        tokens: &[String],
        params: &CloseTokenParams,
    ) -> Result<u64, StoreError> {
        let mut closed = 0;
        for chunk in tokens.chunks(MAX_BATCH_OPS) {
            let now = Utc::now().timestamp_millis();
            let mut tx = self.pool.begin().await.map_err(backend)?;
            for token in chunk {
                let result = sqlx::query(CLOSE_TOKEN_SQL)
                    .bind(now)
                    .bind(params.user_id.as_ref().map(UserId::as_str))
                    .bind(&params.note)
                    .bind(params.invalidated.then_some(now))
                    .bind(token)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                closed += result.rows_affected();
            }
            tx.commit().await.map_err(backend)?;
        }
        Ok(closed)
    }
}

// ───────────────────────────────── Audit log ─────────────────────────────────

#[derive(FromRow)]
struct AuditRow {
    id: String,
    timestamp: i64,
    actor: String,
    user_id: Option<String>,
    action: String,
    resource_type: String,
    resource_id: String,
    result: String,
    reason: Option<String>,
    details: Option<String>,
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = AuditLogError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let db = |e: String| AuditLogError::Database(e);
        Ok(AuditEvent {
            id: row.id.parse().map_err(|e: uuid::Error| db(e.to_string()))?,
            timestamp: DateTime::from_timestamp_millis(row.timestamp)
                .ok_or_else(|| db(format!("timestamp out of range: {}", row.timestamp)))?,
            actor: row.actor,
            user_id: row.user_id.map(UserId),
            action: row.action.parse::<AuditAction>().map_err(db)?,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            result: row.result.parse::<AuditResult>().map_err(db)?,
            reason: row.reason,
            details: row
                .details
                .map(|d| serde_json::from_str(&d))
                .transpose()
                .map_err(|e| db(e.to_string()))?,
        })
    }
}

const AUDIT_FILTER: &str = "WHERE (?1 IS NULL OR actor = ?1)
       AND (?2 IS NULL OR user_id = ?2)
       AND (?3 IS NULL OR resource_id = ?3)
       AND (?4 IS NULL OR action = ?4)
       AND (?5 IS NULL OR result = ?5)
       AND (?6 IS NULL OR timestamp >= ?6)
       AND (?7 IS NULL OR timestamp < ?7)";

fn check_filter(filter: &AuditLogFilter) -> Result<(), AuditLogError> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(AuditLogError::InvalidFilter(
                "`from` must not be after `to`".into(),
            ));
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl AuditLog for SqliteStore {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditLogError> {
        let details = event
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AuditLogError::Database(e.to_string()))?;
        sqlx::query(
            "INSERT INTO audit_log(id, timestamp, actor, user_id, action, resource_type, resource_id, result, reason, details)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.timestamp.timestamp_millis())
        .bind(&event.actor)
        .bind(event.user_id.as_ref().map(UserId::as_str))
        .bind(event.action.to_string())
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(event.result.to_string())
        .bind(&event.reason)
        .bind(details)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditLogError::Database(e.to_string()))?;
        Ok(())
    }

    async fn query(&self, filter: AuditLogFilter) -> Result<Vec<AuditEvent>, AuditLogError> {
        check_filter(&filter)?;
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT id, timestamp, actor, user_id, action, resource_type, resource_id, result, reason, details
             FROM audit_log {AUDIT_FILTER}
             ORDER BY timestamp DESC, id DESC
             LIMIT ?8 OFFSET ?9"
        ))
        .bind(&filter.actor)
        .bind(filter.user_id.as_ref().map(UserId::as_str))
        .bind(&filter.resource_id)
        .bind(filter.action.map(|a| a.to_string()))
        .bind(filter.result.map(|r| r.to_string()))
        .bind(filter.from.map(|d| d.timestamp_millis()))
        .bind(filter.to.map(|d| d.timestamp_millis()))
        .bind(filter.limit.map(i64::from).unwrap_or(-1))
        .bind(i64::from(filter.offset.unwrap_or(0)))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuditLogError::Database(e.to_string()))?;

        rows.into_iter().map(AuditEvent::try_from).collect()
    }

    async fn get(&self, id: AuditLogId) -> Result<AuditEvent, AuditLogError> {
        let row = sqlx::query_as::<_, AuditRow>(
            "SELECT id, timestamp, actor, user_id, action, resource_type, resource_id, result, reason, details
             FROM audit_log WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuditLogError::Database(e.to_string()))?;

        match row {
            None => Err(AuditLogError::NotFound(id)),
            Some(row) => row.try_into(),
        }
    }

    async fn count(&self, filter: AuditLogFilter) -> Result<u64, AuditLogError> {
        check_filter(&filter)?;
        let (n,) = sqlx::query_as::<_, (i64,)>(&format!(
            "SELECT COUNT(*) FROM audit_log {AUDIT_FILTER}"
        ))
        .bind(&filter.actor)
        .bind(filter.user_id.as_ref().map(UserId::as_str))
        .bind(&filter.resource_id)
        .bind(filter.action.map(|a| a.to_string()))
        .bind(filter.result.map(|r| r.to_string()))
        .bind(filter.from.map(|d| d.timestamp_millis()))
        .bind(filter.to.map(|d| d.timestamp_millis()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AuditLogError::Database(e.to_string()))?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record_params(user: &str, email: &str) -> CreateRecordParams {
        CreateRecordParams {
            user_id: UserId::from(user),
            email: email.to_string(),
            products: vec![],
            legacy_product: None,
            registration_date: None,
        }
    }

    fn token_params(token: &str, grants: Grants) -> CreateTokenParams {
        CreateTokenParams {
            token: token.to_string(),
            email: "user@example.com".to_string(),
            grants,
            expires_at: Utc::now() + Duration::days(30),
            note: None,
        }
    }

    #[tokio::test]
    async fn duplicate_record_maps_to_alreadyexists() {
        let s = SqliteStore::open_in_memory().await.unwrap();
        s.create_record(&record_params("U1", "a@example.com"))
            .await
            .unwrap();
        let err = s
            .create_record(&record_params("U1", "b@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn get_missing_record_is_notfound() {
        let s = SqliteStore::open_in_memory().await.unwrap();
        let err = s.get_record(&UserId::from("nobody")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn update_products_bumps_revision_and_rejects_stale_writes() {
        let s = SqliteStore::open_in_memory().await.unwrap();
        let r = s
            .create_record(&record_params("U1", "a@example.com"))
            .await
            .unwrap();
        assert_eq!(r.revision, 1);

        let now = Utc::now();
        let products = vec![ProductGrant::new("21jours", now, now)];
        let updated = s
            .update_products(&UpdateProductsParams {
                user_id: r.user_id.clone(),
                expected_revision: 1,
                products: products.clone(),
                legacy_product: Some("21jours".into()),
            })
            .await
            .unwrap();
        assert_eq!(updated.revision, 2);
        assert_eq!(updated.products.len(), 1);
        assert_eq!(updated.legacy_product.as_deref(), Some("21jours"));

        // Stale revision loses
        let err = s
            .update_products(&UpdateProductsParams {
                user_id: r.user_id.clone(),
                expected_revision: 1,
                products: vec![],
                legacy_product: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        let err = s
            .update_products(&UpdateProductsParams {
                user_id: UserId::from("ghost"),
                expected_revision: 1,
                products,
                legacy_product: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn product_timestamps_survive_storage() {
        let s = SqliteStore::open_in_memory().await.unwrap();
        let start = DateTime::from_timestamp_millis(1_740_000_000_123).unwrap();
        let mut params = record_params("U1", "a@example.com");
        params.products = vec![ProductGrant::new("complet", start, start)];
        let r = s.create_record(&params).await.unwrap();
        assert_eq!(r.products[0].start_date, start);
    }

    #[tokio::test]
    async fn token_grants_keep_their_shape() {
        let s = SqliteStore::open_in_memory().await.unwrap();
        let single = s
            .create_token(&token_params("t1", Grants::Single("21jours".into())))
            .await
            .unwrap();
        assert_eq!(single.grants, Grants::Single("21jours".into()));

        let multi = s
            .create_token(&token_params(
                "t2",
                Grants::Multiple(vec!["21jours".into(), "complet".into()]),
            ))
            .await
            .unwrap();
        assert_eq!(multi.grants.names(), vec!["21jours", "complet"]);

        let err = s
            .create_token(&token_params("t1", Grants::Single("complet".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn close_token_only_once() {
        let s = SqliteStore::open_in_memory().await.unwrap();
        s.create_token(&token_params("t1", Grants::Single("21jours".into())))
            .await
            .unwrap();

        let closed = s
            .close_token("t1", &CloseTokenParams::redeemed_by(UserId::from("U1")))
            .await
            .unwrap();
        assert!(closed.used);
        assert!(closed.used_at.is_some());
        assert_eq!(closed.user_id, Some(UserId::from("U1")));
        assert!(closed.invalidated_at.is_none());

        let err = s
            .close_token("t1", &CloseTokenParams::redeemed_by(UserId::from("U2")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        let after = s.get_token("t1").await.unwrap();
        assert_eq!(after.user_id, Some(UserId::from("U1")));

        let err = s
            .close_token("missing", &CloseTokenParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn invalidation_sets_note_and_stamp() {
        let s = SqliteStore::open_in_memory().await.unwrap();
        s.create_token(&token_params("t1", Grants::Single("21jours".into())))
            .await
            .unwrap();
        let t = s
            .close_token("t1", &CloseTokenParams::invalidated("sent to wrong address"))
            .await
            .unwrap();
        assert!(t.used);
        assert!(t.user_id.is_none());
        assert!(t.invalidated_at.is_some());
        assert_eq!(t.note.as_deref(), Some("sent to wrong address"));
    }

    #[tokio::test]
    async fn list_tokens_filters_and_orders_newest_first() {
        let s = SqliteStore::open_in_memory().await.unwrap();
        for i in 0..3 {
            s.create_token(&token_params(&format!("t{i}"), Grants::Single("21jours".into())))
                .await
                .unwrap();
        }
        s.close_token("t1", &CloseTokenParams::manual("done by hand"))
            .await
            .unwrap();

        let all = s.list_tokens(&TokenFilter::new()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|t| t.token.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t1", "t0"]);

        let unused = s.list_tokens(&TokenFilter::new().used(false)).await.unwrap();
        assert_eq!(unused.len(), 2);

        let limited = s.list_tokens(&TokenFilter::new().limit(1)).await.unwrap();
        assert_eq!(limited.len(), 1);

        let other = s
            .list_tokens(&TokenFilter::new().email("other@example.com"))
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn close_tokens_spans_batches_and_skips_closed() {
        let s = SqliteStore::open_in_memory().await.unwrap();
        let tokens: Vec<String> = (0..MAX_BATCH_OPS + 3).map(|i| format!("t{i:04}")).collect();
        for t in &tokens {
            s.create_token(&token_params(t, Grants::Single("21jours".into())))
                .await
                .unwrap();
        }
        s.close_token(&tokens[0], &CloseTokenParams::default())
            .await
            .unwrap();

        let closed = s
            .close_tokens(&tokens, &CloseTokenParams::invalidated("superseded"))
            .await
            .unwrap();
        assert_eq!(closed as usize, tokens.len() - 1);

        let pending = s.list_tokens(&TokenFilter::new().used(false)).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn audit_record_query_count() {
        let s = SqliteStore::open_in_memory().await.unwrap();
        let user = UserId::from("U1");
        s.record(
            AuditEvent::builder("cli", AuditAction::TokenRedeem)
                .user_id(Some(&user))
                .resource("token", "t1")
                .details(serde_json::json!({ "products": ["21jours"] }))
                .build(),
        )
        .await
        .unwrap();
        s.record(
            AuditEvent::builder("cli", AuditAction::ProductGrant)
                .user_id(Some(&user))
                .resource("record", "U1")
                .result(AuditResult::NoOp)
                .build(),
        )
        .await
        .unwrap();

        let all = s.query(AuditLogFilter::new()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].timestamp >= all[1].timestamp);

        let redeems = s
            .query(AuditLogFilter::new().action(AuditAction::TokenRedeem))
            .await
            .unwrap();
        assert_eq!(redeems.len(), 1);
        assert_eq!(redeems[0].details.as_ref().unwrap()["products"][0], "21jours");

        let fetched = s.get(redeems[0].id).await.unwrap();
        assert_eq!(fetched.resource_id, "t1");

        assert_eq!(
            s.count(AuditLogFilter::new().user_id(user)).await.unwrap(),
            2
        );
        assert_eq!(
            s.count(AuditLogFilter::new().result(AuditResult::NoOp))
                .await
                .unwrap(),
            1
        );

        let err = s.get(AuditLogId::new()).await.unwrap_err();
        assert!(matches!(err, AuditLogError::NotFound(_)));
    }

    #[tokio::test]
    async fn audit_rejects_inverted_range() {
        let s = SqliteStore::open_in_memory().await.unwrap();
        let now = Utc::now();
        let err = s
            .query(AuditLogFilter::new().from(now).to(now - Duration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditLogError::InvalidFilter(_)));
    }
}
