use std::sync::Arc;

use audience_core::protocol::{AudienceRequest, AudienceResponse};
use audience_core::{classify, extract_all, ObservationStore};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sqlx::PgPool;

use crate::subsystems::pipeline::{local_date, Pipeline};

/// What every request needs: the pipeline, its store, and the pool when the store is Postgres.
#[derive(Clone)]
pub struct AppContext {
    pub pipeline: Arc<Pipeline>,
    pub pool: Option<PgPool>,
    pub timezone_offset_hours: i32,
}

impl AppContext {
    pub fn store(&self) -> &Arc<dyn ObservationStore> {
        self.pipeline.store()
    }
}

pub async fn handle_request(request: AudienceRequest, ctx: &AppContext) -> AudienceResponse {
    match request {
        AudienceRequest::Ping => AudienceResponse::pong(),
        AudienceRequest::Health => match &ctx.pool {
            Some(pool) => match audience_core::db::health_check(pool).await {
                Ok(pg_ver) => AudienceResponse::ok(serde_json::json!({
                    "postgresql": pg_ver,
                    "store": ctx.store().name(),
                    "status": "healthy"
                })),
                Err(e) => AudienceResponse::err(format!("DB Health Check failed: {}", e)),
            },
            None => AudienceResponse::ok(serde_json::json!({
                "store": ctx.store().name(),
                "status": "healthy"
            })),
        },
        AudienceRequest::Submit {
            identity,
            image_base64,
            date,
        } => {
            let image = match STANDARD.decode(image_base64.trim()) {
                Ok(bytes) => bytes,
                Err(e) => return AudienceResponse::err(format!("image_base64 is not valid base64: {}", e)),
            };
            let date = date.unwrap_or_else(|| local_date(ctx.timezone_offset_hours));
            let report = ctx.pipeline.process_image(&image, &identity, date).await;
            match serde_json::to_value(&report) {
                Ok(data) => AudienceResponse::ok(data),
                Err(e) => AudienceResponse::err(e.to_string()),
            }
        }
        AudienceRequest::Analyze { text } => {
            let accounts = extract_all(&text);
            AudienceResponse::ok(serde_json::json!({
                "platform": classify(&text),
                "count": accounts.len(),
                "accounts": accounts,
            }))
        }
        AudienceRequest::History { account, identity } => {
            match ctx.store().query_by_identity(&account, &identity).await {
                Ok(observations) => AudienceResponse::ok(serde_json::json!({
                    "account": account,
                    "identity": identity,
                    "count": observations.len(),
                    "observations": observations,
                })),
                Err(e) => AudienceResponse::err(e.to_string()),
            }
        }
    }
}
