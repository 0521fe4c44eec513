//! Recorded sessions: `{"samples": [...]}` as plain or gzip-compressed JSON.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::types::{RawSample, SampleKind};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionLog {
    /// RFC 3339 start time, when known.
    #[serde(default)]
    pub started_at: Option<String>,
    pub samples: Vec<RawSample>,
}

impl SessionLog {
    pub fn new(started_at: Option<String>, samples: Vec<RawSample>) -> Self {
        Self { started_at, samples }
    }

    pub fn count(&self, kind: SampleKind) -> usize {
        self.samples.iter().filter(|s| s.kind == kind).count()
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

pub fn load_session(path: &Path) -> EngineResult<SessionLog> {
    let file = File::open(path)?;
    if is_gzip(path) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

pub fn save_session(path: &Path, session: &SessionLog) -> EngineResult<()> {
    let file = File::create(path)?;
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, session)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, session)?;
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::types::SensorAccuracy;

    fn sample_session() -> SessionLog {
        SessionLog::new(
            Some("2024-01-01T00:00:00Z".to_string()),
            vec![
                RawSample::new(SampleKind::RotationVector, &[0.0, 0.0, 0.0, 1.0], Some(0.0)),
                RawSample::new(SampleKind::Gravity, &[0.0, 0.0, 9.8], Some(0.02))
                    .with_accuracy(SensorAccuracy::Medium),
            ],
        )
    }

    #[test]
    fn test_plain_and_gzip_files() {
        let dir = std::env::temp_dir().join(format!("orientation_session_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        for name in ["session.json", "session.json.gz"] {
            let path = dir.join(name);
            save_session(&path, &sample_session()).unwrap();
            let loaded = load_session(&path).unwrap();
            assert_eq!(loaded.samples, sample_session().samples);
            assert_eq!(loaded.count(SampleKind::Gravity), 1);
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_minimal_json_defaults() {
        let session: SessionLog = serde_json::from_str(
            r#"{"samples": [{"kind": "gyroscope", "values": [0.1, 0.2, 0.3]}]}"#,
        )
        .unwrap();
        assert_eq!(session.started_at, None);
        assert_eq!(session.samples[0].timestamp, None);
        assert_eq!(session.samples[0].accuracy, SensorAccuracy::High);
    }

    #[test]
    fn test_missing_file_is_session_error() {
        let err = load_session(Path::new("/nonexistent/session.json")).unwrap_err();
        assert!(matches!(err, EngineError::Session(_)));
    }
}
