//! Response envelopes shared by every operation the dashboard calls into.

use serde::{Deserialize, Serialize};

/// Outcome of a mutating operation (create, replace, delete).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

/// Outcome of an evaluation or filtering operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterResult<R> {
    pub success: bool,
    pub data: Vec<R>,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_total: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<R> FilterResult<R> {
    pub fn matched(data: Vec<R>, original_total: usize) -> Self {
        Self {
            success: true,
            total: data.len(),
            data,
            original_total: Some(original_total),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            total: 0,
            original_total: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_result_wire_shape() {
        let result = FilterResult::matched(vec![1, 2], 5);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["originalTotal"], 5);
        assert!(json.get("error").is_none());

        let failed: FilterResult<u8> = FilterResult::failed("Segment not found");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["data"], serde_json::json!([]));
        assert_eq!(json["error"], "Segment not found");
    }

    #[test]
    fn test_api_response_omits_absent_data() {
        let resp: ApiResponse<()> = ApiResponse::failure("there are no rules");
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"success":false,"message":"there are no rules"}"#);
    }
}
