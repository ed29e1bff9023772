use std::collections::HashMap;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::error::CoordinatorError;
use crate::types::{FileRecord, FileType, MigrationRecord};

#[derive(Debug, Clone, Default)]
pub struct TlsIdentity {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Clone)]
pub struct CoordinatorClient {
    http: Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>, tls: &TlsIdentity) -> Result<Self, CoordinatorError> {
        let mut builder = Client::builder().danger_accept_invalid_certs(true);

        if let (Some(cert_path), Some(key_path)) = (&tls.cert_path, &tls.key_path) {
            if let (Ok(cert), Ok(key)) = (std::fs::read(cert_path), std::fs::read(key_path)) {
                let mut pem = cert;
                pem.extend_from_slice(&key);
                if let Ok(identity) = reqwest::Identity::from_pem(&pem) {
                    builder = builder.identity(identity);
                }
            }
        }

        let http = builder.build().map_err(|source| CoordinatorError::Transport {
            op: "build_client",
            source,
        })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/migrations/{path}", self.base_url)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        op: &'static str,
        path: &str,
        body: &B,
    ) -> Result<Value, CoordinatorError> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|source| CoordinatorError::Transport { op, source })?;
        self.decode(op, resp).await
    }

    async fn decode(&self, op: &'static str, resp: reqwest::Response) -> Result<Value, CoordinatorError> {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|source| CoordinatorError::Transport { op, source })?;

        if !status.is_success() {
            return Err(CoordinatorError::Status {
                op,
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|source| CoordinatorError::InvalidMigration { op, source })
    }

    async fn post_id(&self, op: &'static str, path: &str, id: i64) -> Result<MigrationRecord, CoordinatorError> {
        let value = self.post_json(op, path, &serde_json::json!({ "id": id })).await?;
        serde_json::from_value(value).map_err(|source| CoordinatorError::InvalidMigration { op, source })
    }

    #[instrument(skip(self))]
    pub async fn staged(&self) -> Result<Vec<MigrationRecord>, CoordinatorError> {
        let resp = self
            .http
            .get(self.url("staged"))
            .send()
            .await
            .map_err(|source| CoordinatorError::Transport {
                op: "staged",
                source,
            })?;
        let value = self.decode("staged", resp).await?;
        serde_json::from_value(value).map_err(|source| CoordinatorError::InvalidMigration {
            op: "staged",
            source,
        })
    }

    /// Success with no `id` present = another runner stole the migration.
    #[instrument(skip(self))]
    pub async fn unstage(&self, id: i64) -> Result<MigrationRecord, CoordinatorError> {
        let value = self
            .post_json("unstage", "unstage", &serde_json::json!({ "id": id }))
            .await?;
        let has_id = value.get("id").is_some_and(|v| !v.is_null());
        if !has_id {
            return Err(CoordinatorError::Stolen(id));
        }
        serde_json::from_value(value).map_err(|source| CoordinatorError::InvalidMigration {
            op: "unstage",
            source,
        })
    }

    pub async fn next_step(&self, id: i64) -> Result<MigrationRecord, CoordinatorError> {
        self.post_id("next_step", "next_step", id).await
    }

    pub async fn complete(&self, id: i64) -> Result<MigrationRecord, CoordinatorError> {
        self.post_id("complete", "complete", id).await
    }

    pub async fn cancel(&self, id: i64) -> Result<MigrationRecord, CoordinatorError> {
        self.post_id("cancel", "cancel", id).await
    }

    pub async fn fail(&self, id: i64, error_message: &str) -> Result<MigrationRecord, CoordinatorError> {
        let value = self
            .post_json(
                "fail",
                "fail",
                &serde_json::json!({ "id": id, "error_message": error_message }),
            )
            .await?;
        serde_json::from_value(value).map_err(|source| CoordinatorError::InvalidMigration { op: "fail", source })
    }

    pub async fn error(&self, id: i64, error_message: &str) -> Result<MigrationRecord, CoordinatorError> {
        let value = self
            .post_json(
                "error",
                "error",
                &serde_json::json!({ "id": id, "error_message": error_message }),
            )
            .await?;
        serde_json::from_value(value).map_err(|source| CoordinatorError::InvalidMigration { op: "error", source })
    }

    pub async fn offer(&self, id: i64) -> Result<MigrationRecord, CoordinatorError> {
        self.post_id("offer", "offer", id).await
    }

    pub async fn unpin_run_host(&self, id: i64) -> Result<MigrationRecord, CoordinatorError> {
        self.post_id("unpin_run_host", "unpin_run_host", id).await
    }

    /// `PUT {id}` with flat string fields, `id` stripped from the body.
    pub async fn update(
        &self,
        id: i64,
        mut fields: HashMap<String, String>,
    ) -> Result<MigrationRecord, CoordinatorError> {
        fields.remove("id");
        let resp = self
            .http
            .put(self.url(&id.to_string()))
            .json(&fields)
            .send()
            .await
            .map_err(|source| CoordinatorError::Transport {
                op: "update",
                source,
            })?;
        let value = self.decode("update", resp).await?;
        serde_json::from_value(value).map_err(|source| CoordinatorError::InvalidMigration {
            op: "update",
            source,
        })
    }

    pub async fn append_to_file(
        &self,
        migration_id: i64,
        file_type: FileType,
        contents: &str,
    ) -> Result<(), CoordinatorError> {
        self.post_json(
            "append_to_file",
            "append_to_file",
            &serde_json::json!({
                "migration_id": migration_id,
                "file_type": file_type.as_wire(),
                "contents": contents,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn write_file(
        &self,
        migration_id: i64,
        file_type: FileType,
        contents: &str,
    ) -> Result<(), CoordinatorError> {
        self.post_json(
            "write_file",
            "write_file",
            &serde_json::json!({
                "migration_id": migration_id,
                "file_type": file_type.as_wire(),
                "contents": contents,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn get_file(&self, migration_id: i64, file_type: FileType) -> Result<String, CoordinatorError> {
        let resp = self
            .http
            .get(self.url("get_file"))
            .json(&serde_json::json!({
                "migration_id": migration_id,
                "file_type": file_type.as_wire(),
            }))
            .send()
            .await
            .map_err(|source| CoordinatorError::Transport {
                op: "get_file",
                source,
            })?;
        let value = self.decode("get_file", resp).await?;
        let record: FileRecord = serde_json::from_value(value).map_err(|source| CoordinatorError::InvalidMigration {
            op: "get_file",
            source,
        })?;
        Ok(record.contents)
    }
}
