use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use orchestra_config::ControllerConfig;
use orchestra_domain::{
    Controller, Instruction, JobInfo, JobStatus, Lease, LogCategory, Message, Progress,
    QueueEntry, Token,
};
use orchestra_errors::{OrchestraError, OrchestraResult};
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::instance_name;

/// SQLite 控制器
///
/// 队列与登记簿坐落在一张 `jobs` 表上，编排消息在 `messages` 表中。
/// 所有状态迁移都通过 `UPDATE … WHERE lease_id = ? AND lease_expires_at
/// >= now` 保证同一令牌同一时刻至多一个有效租约。基于文件的数据库可
/// 被多个副本共享；内存模式限制为单连接，仅适用于单进程。
pub struct SqliteController {
    pool: SqlitePool,
    name: String,
    requeue: bool,
    requeue_limit: u32,
    lock_ttl_millis: i64,
    token_ttl: Option<chrono::Duration>,
    message_ttl_millis: Option<i64>,
}

impl SqliteController {
    pub async fn open(config: &ControllerConfig) -> OrchestraResult<Self> {
        let pool = match &config.path {
            Some(path) => {
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .busy_timeout(config.timeout)
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
                SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(options)
                    .await?
            }
            None => {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect("sqlite::memory:")
                    .await?
            }
        };
        Self::with_pool(pool, config).await
    }

    async fn with_pool(pool: SqlitePool, config: &ControllerConfig) -> OrchestraResult<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                token TEXT NOT NULL PRIMARY KEY,
                state TEXT NOT NULL CHECK(
                    state IN ('queued', 'running', 'completed', 'aborted')
                ),
                payload TEXT NOT NULL,
                lease_id TEXT,
                lease_owner TEXT,
                lease_expires_at INTEGER,
                report_blob TEXT,
                requeue_count INTEGER NOT NULL DEFAULT 0,
                enqueued_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                expires_at INTEGER
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL CHECK(topic IN ('abort')),
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            name: instance_name("Controller"),
            requeue: config.requeue,
            requeue_limit: config.requeue_limit,
            lock_ttl_millis: config.lock_ttl.as_millis() as i64,
            token_ttl: config
                .token_ttl
                .map(|ttl| chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())),
            message_ttl_millis: config.message_ttl.map(|ttl| ttl.as_millis() as i64),
        })
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
    }

    /// 把 `JobInfo` 拆成 `payload`（不含报告）与 `report_blob` 两列。
    fn split_info(info: &JobInfo) -> OrchestraResult<(String, Option<String>)> {
        let report_blob = info
            .report
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let mut stripped = info.clone();
        stripped.report = None;
        Ok((serde_json::to_string(&stripped)?, report_blob))
    }

    fn assemble_info(payload: &str, report_blob: Option<&str>) -> OrchestraResult<JobInfo> {
        let mut info: JobInfo = serde_json::from_str(payload)?;
        if let Some(blob) = report_blob {
            info.report = Some(serde_json::from_str(blob)?);
        }
        Ok(info)
    }

    fn token_from_columns(token: &str, expires_at: Option<i64>) -> Token {
        Token {
            value: token.to_string(),
            expires: expires_at.is_some(),
            expires_at: expires_at.map(Self::millis_to_datetime),
        }
    }

    /// 将一个失去租约的运行中作业重新排队或终结。
    async fn handle_orphan(
        &self,
        token: &str,
        payload: &str,
        report_blob: Option<&str>,
        requeue_count: u32,
    ) -> OrchestraResult<()> {
        let requeue = self.requeue && requeue_count < self.requeue_limit;
        let (state, payload, report_blob) =
            match Self::assemble_info(payload, report_blob) {
                Ok(mut orphan) => {
                    let token_obj = orphan.token.clone();
                    let report = orphan
                        .report
                        .get_or_insert_with(|| orchestra_domain::Report::new("", token_obj));
                    if requeue {
                        orphan.metadata.requeue();
                        report.progress = Progress {
                            status: JobStatus::Queued,
                            verbose: format!("requeued by controller '{}'", self.name),
                            numeric: 0,
                        };
                        report.log.log(
                            LogCategory::Event,
                            &self.name,
                            format!(
                                "Requeued by controller '{}' due to failed state.",
                                self.name
                            ),
                        );
                    } else {
                        orphan.metadata.abort(&self.name);
                        report.progress.abort();
                        report.progress.verbose =
                            format!("aborted by controller '{}'", self.name);
                        report.log.log(
                            LogCategory::Error,
                            &self.name,
                            format!(
                                "Aborted by controller '{}' due to failed state (worker \
                                 crash or lost lease).",
                                self.name
                            ),
                        );
                    }
                    let (payload, report_blob) = Self::split_info(&orphan)?;
                    (
                        if requeue { "queued" } else { "aborted" },
                        Some(payload),
                        report_blob,
                    )
                }
                Err(err) => {
                    // 无法解析的记录只迁移状态
                    error!(
                        "控制器 '{}' 处理失败作业 '{}' 的报告时出错: {}",
                        self.name, token, err
                    );
                    (if requeue { "queued" } else { "aborted" }, None, None)
                }
            };

        sqlx::query(
            "UPDATE jobs SET
                state = $2,
                payload = COALESCE($3, payload),
                report_blob = COALESCE($4, report_blob),
                lease_id = NULL,
                lease_owner = NULL,
                lease_expires_at = NULL,
                requeue_count = requeue_count + 1,
                updated_at = $5
             WHERE token = $1 AND state = 'running'",
        )
        .bind(token)
        .bind(state)
        .bind(payload)
        .bind(report_blob)
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;
        info!(
            "控制器 '{}' 将失败的作业 '{}' {}。",
            self.name,
            token,
            if requeue { "重新排队" } else { "终结" }
        );
        Ok(())
    }
}

#[async_trait]
impl Controller for SqliteController {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, token: &str, mut info: JobInfo) -> OrchestraResult<Token> {
        self.cleanup().await?;

        let token_obj = Token::with_value(
            token.to_string(),
            self.token_ttl,
        );
        info.token = Some(token_obj.clone());
        info.metadata.produce(&self.name);
        if let Some(report) = info.report.as_mut() {
            report.token = Some(token_obj.clone());
        }
        let (payload, report_blob) = Self::split_info(&info)?;

        let now = Self::now_millis();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO jobs
                (token, state, payload, report_blob, enqueued_at, updated_at, expires_at)
             VALUES ($1, 'queued', $2, $3, $4, $4, $5)",
        )
        .bind(token)
        .bind(&payload)
        .bind(&report_blob)
        .bind(now)
        .bind(token_obj.expires_at.map(|at| at.timestamp_millis()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!("控制器 '{}' 接受了作业 '{}'。", self.name, token);
            return Ok(token_obj);
        }

        // 重复提交：请求体一致时返回既有令牌
        let existing = self.get_info(token).await?;
        let submitted = info.config.original_body.clone();
        if existing.config.original_body != submitted {
            return Err(OrchestraError::ConflictingResubmission {
                token: token.to_string(),
            });
        }
        self.get_token(token).await
    }

    async fn lease(&self, owner: &str) -> OrchestraResult<Option<Lease>> {
        self.cleanup().await?;

        let now = Self::now_millis();
        let expires_at = now + self.lock_ttl_millis;
        let lease_id = Uuid::new_v4().to_string();
        let row = sqlx::query(
            "UPDATE jobs SET
                lease_id = $1, lease_owner = $2, lease_expires_at = $3, updated_at = $4
             WHERE token = (
                SELECT token FROM jobs
                WHERE state = 'queued'
                    AND (lease_expires_at IS NULL OR lease_expires_at < $4)
                ORDER BY enqueued_at ASC, token ASC
                LIMIT 1)
             RETURNING token",
        )
        .bind(&lease_id)
        .bind(owner)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Lease {
            id: lease_id,
            owner: owner.to_string(),
            token: row.get("token"),
            expires_at: Self::millis_to_datetime(expires_at),
        }))
    }

    async fn refresh_lease(&self, lease_id: &str) -> OrchestraResult<Lease> {
        let now = Self::now_millis();
        let expires_at = now + self.lock_ttl_millis;
        let row = sqlx::query(
            "UPDATE jobs SET lease_expires_at = $2
             WHERE lease_id = $1 AND lease_expires_at >= $3
             RETURNING token, lease_owner",
        )
        .bind(lease_id)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchestraError::lease_lost("续约被拒绝，租约已过期或不存在"))?;

        Ok(Lease {
            id: lease_id.to_string(),
            owner: row.get("lease_owner"),
            token: row.get("token"),
            expires_at: Self::millis_to_datetime(expires_at),
        })
    }

    async fn release_lease(&self, lease_id: &str) -> OrchestraResult<()> {
        sqlx::query(
            "UPDATE jobs SET lease_id = NULL, lease_owner = NULL, lease_expires_at = NULL
             WHERE lease_id = $1",
        )
        .bind(lease_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_token(&self, token: &str) -> OrchestraResult<Token> {
        self.cleanup().await?;
        let row = sqlx::query("SELECT expires_at FROM jobs WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestraError::unknown_token(token))?;
        Ok(Self::token_from_columns(token, row.get("expires_at")))
    }

    async fn get_info(&self, token: &str) -> OrchestraResult<JobInfo> {
        self.cleanup().await?;
        let row = sqlx::query("SELECT payload, report_blob FROM jobs WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestraError::unknown_token(token))?;
        let payload: String = row.get("payload");
        let report_blob: Option<String> = row.get("report_blob");
        Self::assemble_info(&payload, report_blob.as_deref())
    }

    async fn get_status(&self, token: &str) -> OrchestraResult<JobStatus> {
        self.cleanup().await?;
        let row = sqlx::query("SELECT state FROM jobs WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestraError::unknown_token(token))?;
        let state: String = row.get("state");
        JobStatus::parse(&state)
            .ok_or_else(|| OrchestraError::Fatal(format!("登记簿中出现未知状态 '{state}'")))
    }

    async fn registry_push(
        &self,
        lease_id: &str,
        status: Option<JobStatus>,
        info: Option<&JobInfo>,
    ) -> OrchestraResult<()> {
        if status.is_none() && info.is_none() {
            return Ok(());
        }
        let (payload, report_blob) = match info {
            Some(info) => {
                let (payload, report_blob) = Self::split_info(info)?;
                (Some(payload), report_blob)
            }
            None => (None, None),
        };

        let result = sqlx::query(
            "UPDATE jobs SET
                state = COALESCE($2, state),
                payload = COALESCE($3, payload),
                report_blob = COALESCE($4, report_blob),
                updated_at = $5
             WHERE lease_id = $1 AND lease_expires_at >= $5",
        )
        .bind(lease_id)
        .bind(status.map(|s| s.as_str()))
        .bind(payload)
        .bind(report_blob)
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestraError::lease_lost(
                "登记簿更新被拒绝，租约已过期或不存在",
            ));
        }
        Ok(())
    }

    async fn message_push(
        &self,
        token: &str,
        instruction: Instruction,
        origin: &str,
        content: &str,
        re_queue: bool,
    ) -> OrchestraResult<()> {
        let exists = sqlx::query("SELECT 1 FROM jobs WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !exists {
            // 令牌已被清理或从未存在，消息直接丢弃
            info!(
                "控制器 '{}' 收到了未知令牌 '{}' 的消息。",
                self.name, token
            );
            return Ok(());
        }

        let now = Self::now_millis();
        sqlx::query(
            "INSERT INTO messages (topic, payload, created_at, expires_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(instruction.as_str())
        .bind(
            serde_json::to_string(&json!({
                "token": token,
                "origin": origin,
                "content": content,
                "reQueue": re_queue,
            }))?,
        )
        .bind(now)
        .bind(self.message_ttl_millis.map(|ttl| now + ttl))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn message_get(&self, since: DateTime<Utc>) -> OrchestraResult<Vec<Message>> {
        self.cleanup().await?;
        let rows = sqlx::query(
            "SELECT topic, payload, created_at, expires_at FROM messages
             WHERE created_at >= $1 ORDER BY id",
        )
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let topic: String = row.get("topic");
            let Some(instruction) = Instruction::parse(&topic) else {
                continue;
            };
            let payload: serde_json::Value = serde_json::from_str(&row.get::<String, _>("payload"))?;
            messages.push(Message {
                token: payload
                    .get("token")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                instruction,
                origin: payload
                    .get("origin")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                content: payload
                    .get("content")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                re_queue: payload
                    .get("reQueue")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false),
                received_at: Self::millis_to_datetime(row.get("created_at")),
                expires_at: row
                    .get::<Option<i64>, _>("expires_at")
                    .map(Self::millis_to_datetime),
            });
        }
        Ok(messages)
    }

    async fn queue_entries(&self) -> OrchestraResult<Vec<QueueEntry>> {
        self.cleanup().await?;
        let rows = sqlx::query(
            "SELECT token, enqueued_at, lease_owner, lease_expires_at, requeue_count
             FROM jobs WHERE state = 'queued'
             ORDER BY enqueued_at ASC, token ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| QueueEntry {
                token: row.get("token"),
                enqueued_at: Self::millis_to_datetime(row.get("enqueued_at")),
                lease_owner: row.get("lease_owner"),
                lease_expires_at: row
                    .get::<Option<i64>, _>("lease_expires_at")
                    .map(Self::millis_to_datetime),
                requeue_count: row.get::<i64, _>("requeue_count") as u32,
            })
            .collect())
    }

    async fn registry_size(&self) -> OrchestraResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    async fn cleanup(&self) -> OrchestraResult<()> {
        let now = Self::now_millis();
        sqlx::query("DELETE FROM jobs WHERE expires_at IS NOT NULL AND expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM messages WHERE expires_at IS NOT NULL AND expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        // 运行中但租约已失效的作业：按策略重新排队或终结
        let orphans = sqlx::query(
            "SELECT token, payload, report_blob, requeue_count FROM jobs
             WHERE state = 'running'
                AND (lease_expires_at IS NULL OR lease_expires_at < $1)",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        for row in orphans {
            let token: String = row.get("token");
            let payload: String = row.get("payload");
            let report_blob: Option<String> = row.get("report_blob");
            let requeue_count = row.get::<i64, _>("requeue_count") as u32;
            self.handle_orphan(&token, &payload, report_blob.as_deref(), requeue_count)
                .await?;
        }
        Ok(())
    }
}
