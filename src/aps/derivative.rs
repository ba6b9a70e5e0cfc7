use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ApsClient, ApsError};

/// URL-safe, unpadded base64 of an object id, as expected by the viewer and
/// the derivative service.
pub fn to_urn(object_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(object_id.as_bytes())
}

/// Submitted translation request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationJob {
    pub urn: String,
}

/// Translation manifest summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationStatus {
    pub status: String,
    pub progress: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<serde_json::Value>,
}

impl TranslationStatus {
    /// Placeholder for a model that has never been translated.
    pub fn not_started() -> Self {
        Self {
            status: "n/a".to_string(),
            progress: "0%".to_string(),
            messages: None,
        }
    }

    pub fn is_not_started(&self) -> bool {
        self.status == "n/a"
    }

    pub fn is_complete(&self) -> bool {
        self.progress == crate::common::TRANSLATION_COMPLETE
    }

    pub fn is_failed(&self) -> bool {
        self.status == "failed"
    }
}

#[rocket::async_trait]
pub trait DerivativeApi: Send + Sync {
    /// Submit `urn` for conversion to a viewer format. `root_filename` picks
    /// the entry point inside a zipped upload.
    async fn submit_translation(
        &self,
        token: &str,
        urn: &str,
        root_filename: Option<&str>,
    ) -> Result<TranslationJob, ApsError>;
    async fn manifest(&self, token: &str, urn: &str) -> Result<TranslationStatus, ApsError>;
}

#[rocket::async_trait]
impl DerivativeApi for ApsClient {
    async fn submit_translation(
        &self,
        token: &str,
        urn: &str,
        root_filename: Option<&str>,
    ) -> Result<TranslationJob, ApsError> {
        let url = self.endpoint(&["modelderivative", "v2", "designdata", "job"])?;
        let input = match root_filename {
            Some(root) => json!({ "urn": urn, "compressedUrn": true, "rootFilename": root }),
            None => json!({ "urn": urn }),
        };
        let body = json!({
            "input": input,
            "output": { "formats": [{ "type": "svf2", "views": ["2d", "3d"] }] }
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        ApsClient::json(response).await
    }

    async fn manifest(&self, token: &str, urn: &str) -> Result<TranslationStatus, ApsError> {
        let url = self.endpoint(&["modelderivative", "v2", "designdata", urn, "manifest"])?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        ApsClient::json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urn_is_url_safe_without_padding() {
        let urn = to_urn("urn:adsk.objects:os.object:bucket/out?.dwg");
        assert!(!urn.contains('='));
        assert!(!urn.contains('+'));
        assert!(!urn.contains('/'));
        let decoded = URL_SAFE_NO_PAD.decode(urn).unwrap();
        assert_eq!(decoded, b"urn:adsk.objects:os.object:bucket/out?.dwg");
    }

    #[test]
    fn manifest_progress_flags() {
        let status: TranslationStatus =
            serde_json::from_str(r#"{"status":"success","progress":"complete","type":"manifest"}"#)
                .unwrap();
        assert!(status.is_complete());
        assert!(!status.is_failed());
        assert!(TranslationStatus::not_started().is_not_started());
    }
}
