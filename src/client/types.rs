use crate::registry::task::{Projection, TileKind, TileRef};
use serde::{Deserialize, Serialize};

/// Body of `POST /tianditu/download/tiles`
#[derive(Debug, Clone, Serialize)]
pub struct StartRequest {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: TileKind,
    pub zoom: u8,
    pub projection: Projection,
    pub nw: [f64; 2],
    pub ne: [f64; 2],
    pub se: [f64; 2],
    pub sw: [f64; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Success,
    Failed,
}

/// Envelope every backend response is wrapped in
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub status: ApiStatus,
    #[serde(default)]
    pub message: String,
}

/// Download state tags used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireState {
    #[serde(rename = "ing")]
    Downloading,
    #[serde(rename = "un")]
    Paused,
    #[serde(rename = "ed")]
    Finished,
    #[serde(rename = "err")]
    Errored,
}

/// `data` of `GET /tianditu/download/progress/{uuid}`
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    #[serde(default)]
    pub uuid: Option<String>,
    pub current: u64,
    pub total: u64,
    #[serde(default)]
    pub zoom: Option<u8>,
    #[serde(rename = "type", default)]
    pub kind: Option<TileKind>,
    pub state: WireState,
    #[serde(default)]
    pub failed: Vec<TileRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_serialization() {
        let request = StartRequest {
            uuid: "a1b2c3d4e5f6a7b8".to_string(),
            kind: TileKind::Imagery,
            zoom: 12,
            projection: Projection::Epsg3857,
            nw: [116.0, 40.0],
            ne: [117.0, 40.0],
            se: [117.0, 39.0],
            sw: [116.0, 39.0],
        };

        let serialized = serde_json::to_string(&request).expect("Failed to serialize");
        assert!(serialized.contains("\"type\":\"img\""));
        assert!(serialized.contains("\"zoom\":12"));
        assert!(serialized.contains("\"projection\":\"EPSG:3857\""));
        assert!(serialized.contains("\"nw\":[116.0,40.0]"));
    }

    #[test]
    fn test_progress_response_deserialization() {
        let json = r#"{
            "data": {
                "uuid": "a1b2c3d4e5f6a7b8",
                "current": 40,
                "total": 64,
                "zoom": 12,
                "type": "vec",
                "state": "ing",
                "failed": [{"zoom": 12, "row": 100, "col": 200}]
            },
            "status": "success",
            "message": "操作成功"
        }"#;

        let response: ApiResponse<ProgressData> =
            serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(response.status, ApiStatus::Success);
        let data = response.data.unwrap();
        assert_eq!(data.current, 40);
        assert_eq!(data.total, 64);
        assert_eq!(data.kind, Some(TileKind::Vector));
        assert_eq!(data.state, WireState::Downloading);
        assert_eq!(data.failed.len(), 1);
    }

    #[test]
    fn test_failed_response_without_data() {
        let json = r#"{"data": null, "status": "failed", "message": "操作失败"}"#;

        let response: ApiResponse<ProgressData> =
            serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(response.status, ApiStatus::Failed);
        assert!(response.data.is_none());
        assert_eq!(response.message, "操作失败");
    }

    #[test]
    fn test_response_without_data_field() {
        let json = r#"{"status": "success", "message": "操作成功"}"#;

        let response: ApiResponse<serde_json::Value> =
            serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(response.status, ApiStatus::Success);
        assert!(response.data.is_none());
    }

    #[test]
    fn test_minimal_progress_data() {
        let json = r#"{"current": 0, "total": 0, "state": "un"}"#;

        let data: ProgressData = serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(data.state, WireState::Paused);
        assert!(data.failed.is_empty());
        assert!(data.uuid.is_none());
    }
}
