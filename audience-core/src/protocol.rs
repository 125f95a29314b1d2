use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AudienceRequest {
    Ping,
    Health,
    Submit {
        identity: String,
        image_base64: String,
        /// `YYYY-MM-DD`; today in the configured timezone when absent.
        date: Option<chrono::NaiveDate>,
    },
    Analyze {
        text: String,
    },
    History {
        account: String,
        identity: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AudienceResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl AudienceResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_tagged_by_action() {
        let req: AudienceRequest = serde_json::from_value(serde_json::json!({
            "action": "history",
            "account": "@brand",
            "identity": "Lea"
        }))
        .unwrap();
        match req {
            AudienceRequest::History { account, identity } => {
                assert_eq!(account, "@brand");
                assert_eq!(identity, "Lea");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_submit_date_is_optional() {
        let req: AudienceRequest = serde_json::from_value(serde_json::json!({
            "action": "submit",
            "identity": "Lea",
            "image_base64": "AAAA"
        }))
        .unwrap();
        assert!(matches!(req, AudienceRequest::Submit { date: None, .. }));
    }

    #[test]
    fn test_response_constructors() {
        assert!(AudienceResponse::pong().is_ok());
        let err = AudienceResponse::err("boom");
        assert!(!err.is_ok());
        assert_eq!(err.error.as_deref(), Some("boom"));
    }
}
