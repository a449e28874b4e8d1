use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One newline-delimited request to the mutation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct CommandResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }

    pub fn into_response(self, id: String) -> Response {
        Response {
            id,
            success: self.success,
            result: self.data,
            error: self.error,
        }
    }
}

/// Command names understood by the mutation layer
pub mod commands {
    pub const INFO: &str = "info";
    pub const SET_BLOCK: &str = "set_block";
    pub const READ_BLOCK: &str = "read_block";
    pub const BULK: &str = "bulk";
    pub const MOVE_TO: &str = "move_to";
    pub const POSITION: &str = "position";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_omits_empty_fields() {
        let resp = CommandResult::ok_empty().into_response("r1".into());
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({"id": "r1", "success": true}));

        let resp = CommandResult::err("chunk busy").into_response("r2".into());
        assert_eq!(resp.error.as_deref(), Some("chunk busy"));
    }

    #[test]
    fn test_request_args_default() {
        let req: Request = serde_json::from_str(r#"{"id": "1", "command": "position"}"#).unwrap();
        assert_eq!(req.command, commands::POSITION);
        assert!(req.args.is_null());
    }
}
