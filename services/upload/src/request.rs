use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Optional description of how a clip was captured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    /// Clip duration in seconds
    pub duration_secs: Option<f64>,
    /// Recording frame rate
    pub frame_rate: Option<f64>,
    /// Camera angle relative to the shooter (e.g. "side", "front")
    pub angle: Option<String>,
}

/// A single video the caller wants uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    path: PathBuf,
    content_type: String,
    metadata: CaptureMetadata,
    deadline: Option<Duration>,
}

impl UploadRequest {
    pub fn new(path: impl Into<PathBuf>, content_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_type: content_type.into(),
            metadata: CaptureMetadata::default(),
            deadline: None,
        }
    }

    /// Build a request whose content type is inferred from the file extension
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content_type = content_type_for_path(&path);
        Self::new(path, content_type)
    }

    pub fn with_metadata(mut self, metadata: CaptureMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.metadata.duration_secs = Some(secs);
        self
    }

    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.metadata.frame_rate = Some(fps);
        self
    }

    pub fn with_angle(mut self, angle: impl Into<String>) -> Self {
        self.metadata.angle = Some(angle.into());
        self
    }

    /// Bound the whole upload, retries included. Exceeding it cancels the upload.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn metadata(&self) -> &CaptureMetadata {
        &self.metadata
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// Get content type for a video file based on its extension
pub fn content_type_for_path(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();

    match extension.as_str() {
        "mp4" => "video/mp4".to_string(),
        "mov" | "qt" => "video/quicktime".to_string(),
        "m4v" => "video/x-m4v".to_string(),
        "webm" => "video/webm".to_string(),
        "avi" => "video/x-msvideo".to_string(),
        "3gp" => "video/3gpp".to_string(),
        "mkv" => "video/x-matroska".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for_path() {
        assert_eq!(content_type_for_path(Path::new("shot.mp4")), "video/mp4");
        assert_eq!(content_type_for_path(Path::new("SHOT.MOV")), "video/quicktime");
        assert_eq!(content_type_for_path(Path::new("a/b/drill.webm")), "video/webm");
        assert_eq!(
            content_type_for_path(Path::new("notes")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_builder_sets_metadata() {
        let request = UploadRequest::from_path("/videos/free-throw.mov")
            .with_duration(12.5)
            .with_frame_rate(60.0)
            .with_angle("side")
            .with_deadline(Duration::from_secs(120));

        assert_eq!(request.content_type(), "video/quicktime");
        assert_eq!(request.metadata().duration_secs, Some(12.5));
        assert_eq!(request.metadata().frame_rate, Some(60.0));
        assert_eq!(request.metadata().angle.as_deref(), Some("side"));
        assert_eq!(request.deadline(), Some(Duration::from_secs(120)));
    }
}
