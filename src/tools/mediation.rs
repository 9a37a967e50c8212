//! 调解台：损坏纠纷与收件人协调相关的工具
//!
//! MediationDesk 在进程内保存每个订单的证据引用；analyze_evidence 把照片本身（data URL、
//! 本地文件读成 base64、或 http(s) 链接）交给视觉模型，得出责任方与退款建议。
//! 其余操作（退款、免责、包装反馈、聊天、代收建议）是本地记账。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::core::ToolError;
use crate::llm::{extract_json, ImageInput, LlmClient};
use crate::tools::params::{
    self, ContactRecipientParams, DriverParams, EvidenceParams, OrderParams, PackagingFeedbackParams,
    SafeDropParams,
};
use crate::tools::{Observation, Tool};

const ANALYSIS_PROMPT: &str = r#"You are reviewing a delivery damage dispute.
Analyze the referenced photos of the package. If the package looks spilled or opened, refund_reasonable should be true, otherwise false, with a rationale.
Favour a refund when the package is clearly open or spilled.

Return ONLY valid JSON like:
{
  "fault": "merchant|driver|unclear",
  "confidence": 0.0-1.0,
  "refund_reasonable": true|false,
  "rationale": "short text",
  "packaging_feedback": "short text"
}
"#;

/// 每个订单最多回显的证据条数
const MAX_FILES_ECHO: usize = 5;

pub struct MediationDesk {
    evidence: RwLock<HashMap<String, Vec<String>>>,
    llm: Arc<dyn LlmClient>,
}

impl MediationDesk {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            evidence: RwLock::new(HashMap::new()),
            llm,
        }
    }

    /// 重新开始调解：清空该订单旧证据，返回清除条数
    pub async fn purge(&self, order_id: &str) -> usize {
        self.evidence
            .write()
            .await
            .remove(order_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// 追加证据（去重），返回该订单全部证据
    pub async fn store(&self, order_id: &str, images: &[String]) -> Vec<String> {
        let mut guard = self.evidence.write().await;
        let files = guard.entry(order_id.to_string()).or_default();
        for img in images.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            if !files.iter().any(|f| f == img) {
                files.push(img.to_string());
            }
        }
        files.clone()
    }

    pub async fn files(&self, order_id: &str) -> Vec<String> {
        self.evidence.read().await.get(order_id).cloned().unwrap_or_default()
    }

    /// 证据分析；模型失败时返回 status=ERROR 的结论而不是错误
    pub async fn analyze(&self, order_id: &str, images: &[String], notes: Option<&str>) -> Observation {
        let references = if images.is_empty() {
            self.files(order_id).await
        } else {
            images.to_vec()
        };
        let mut loaded = Vec::with_capacity(references.len());
        for reference in &references {
            if let Some(image) = load_image(reference).await {
                loaded.push(image);
            }
        }
        if loaded.is_empty() {
            return Observation::from_value(json!({
                "order_id": order_id,
                "status": "NO_EVIDENCE",
                "fault": null,
                "confidence": 0.0,
                "rationale": "No images provided.",
                "refund_reasonable": false,
            }));
        }

        let mut prompt = ANALYSIS_PROMPT.to_string();
        if let Some(n) = notes.filter(|n| !n.trim().is_empty()) {
            prompt.push_str(&format!("\nCustomer notes: {n}\n"));
        }

        let raw = match self.llm.complete_with_images(&prompt, &loaded).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "evidence analysis model failed");
                return Observation::from_value(json!({
                    "order_id": order_id,
                    "status": "ERROR",
                    "fault": null,
                    "confidence": 0.0,
                    "rationale": format!("Model error: {e}"),
                    "refund_reasonable": false,
                }));
            }
        };
        let data = extract_json(&raw).unwrap_or_else(|| json!({}));
        let fault = data
            .get("fault")
            .and_then(Value::as_str)
            .map(|f| f.trim().to_lowercase())
            .filter(|f| matches!(f.as_str(), "merchant" | "driver" | "unclear"))
            .unwrap_or_else(|| "unclear".to_string());
        let confidence = data
            .get("confidence")
            .and_then(Value::as_f64)
            .filter(|c| c.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let refund_reasonable = data.get("refund_reasonable").map(|v| crate::assertion::truthy(Some(v))).unwrap_or(false);
        let rationale = data
            .get("rationale")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or(raw);
        let packaging = data
            .get("packaging_feedback")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("Improve packaging/seal.");

        Observation::from_value(json!({
            "order_id": order_id,
            "status": "OK",
            "fault": fault,
            "confidence": confidence,
            "rationale": rationale,
            "refund_reasonable": refund_reasonable,
            "packaging_feedback": packaging,
        }))
    }
}

/// 把一条证据引用读成可交给模型的图片；无法读取的引用记 warn 后跳过
async fn load_image(reference: &str) -> Option<ImageInput> {
    let reference = reference.trim();
    if let Some(rest) = reference.strip_prefix("data:") {
        let (_, payload) = rest.split_once(',')?;
        return match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
            Ok(_) => Some(ImageInput::from_url(reference)),
            Err(e) => {
                tracing::warn!(error = %e, "evidence image has invalid base64, skipped");
                None
            }
        };
    }
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Some(ImageInput::from_url(reference));
    }
    match tokio::fs::read(reference).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(reference).first_or(mime_guess::mime::IMAGE_JPEG);
            Some(ImageInput::from_bytes(mime.essence_str(), &bytes))
        }
        Err(e) => {
            tracing::warn!(path = %reference, error = %e, "evidence image not readable, skipped");
            None
        }
    }
}

/// 调解台上的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeskOp {
    InitiateMediation,
    CollectEvidence,
    AnalyzeEvidence,
    IssueRefund,
    ExonerateDriver,
    PackagingFeedback,
    ContactRecipient,
    SuggestSafeDrop,
}

impl DeskOp {
    pub const ALL: [DeskOp; 8] = [
        DeskOp::InitiateMediation,
        DeskOp::CollectEvidence,
        DeskOp::AnalyzeEvidence,
        DeskOp::IssueRefund,
        DeskOp::ExonerateDriver,
        DeskOp::PackagingFeedback,
        DeskOp::ContactRecipient,
        DeskOp::SuggestSafeDrop,
    ];
}

/// 以 DeskOp 区分的调解工具
pub struct DeskTool {
    op: DeskOp,
    desk: Arc<MediationDesk>,
}

impl DeskTool {
    pub fn new(op: DeskOp, desk: Arc<MediationDesk>) -> Self {
        Self { op, desk }
    }

    /// 调解台的全部工具
    pub fn all(desk: Arc<MediationDesk>) -> Vec<DeskTool> {
        DeskOp::ALL
            .into_iter()
            .map(|op| DeskTool::new(op, desk.clone()))
            .collect()
    }
}

#[async_trait]
impl Tool for DeskTool {
    fn name(&self) -> &str {
        match self.op {
            DeskOp::InitiateMediation => "initiate_mediation_flow",
            DeskOp::CollectEvidence => "collect_evidence",
            DeskOp::AnalyzeEvidence => "analyze_evidence",
            DeskOp::IssueRefund => "issue_instant_refund",
            DeskOp::ExonerateDriver => "exonerate_driver",
            DeskOp::PackagingFeedback => "log_merchant_packaging_feedback",
            DeskOp::ContactRecipient => "contact_recipient_via_chat",
            DeskOp::SuggestSafeDrop => "suggest_safe_drop_off",
        }
    }

    fn description(&self) -> &str {
        match self.op {
            DeskOp::InitiateMediation => "Start mediation flow (purges old evidence for a fresh review).",
            DeskOp::CollectEvidence => "Collect evidence photos & notes.",
            DeskOp::AnalyzeEvidence => "Analyze evidence photos with a vision-capable model.",
            DeskOp::IssueRefund => "Refund instantly.",
            DeskOp::ExonerateDriver => "Clear driver fault.",
            DeskOp::PackagingFeedback => "Feedback to merchant packaging.",
            DeskOp::ContactRecipient => "Chat recipient.",
            DeskOp::SuggestSafeDrop => "Suggest safe place.",
        }
    }

    fn parameters_schema(&self) -> Value {
        match self.op {
            DeskOp::InitiateMediation | DeskOp::IssueRefund => params::schema::<OrderParams>(),
            DeskOp::CollectEvidence | DeskOp::AnalyzeEvidence => params::schema::<EvidenceParams>(),
            DeskOp::ExonerateDriver => params::schema::<DriverParams>(),
            DeskOp::PackagingFeedback => params::schema::<PackagingFeedbackParams>(),
            DeskOp::ContactRecipient => params::schema::<ContactRecipientParams>(),
            DeskOp::SuggestSafeDrop => params::schema::<SafeDropParams>(),
        }
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let obs = match self.op {
            DeskOp::InitiateMediation => {
                let p: OrderParams = params::parse(params)?;
                let removed = self.desk.purge(&p.order_id).await;
                json!({"order_id": p.order_id, "flow": "started", "purgedFiles": removed})
            }
            DeskOp::CollectEvidence => {
                let p: EvidenceParams = params::parse(params)?;
                let files = self.desk.store(&p.order_id, &p.images).await;
                let echo: Vec<&String> = files.iter().skip(files.len().saturating_sub(MAX_FILES_ECHO)).collect();
                let notes = p.notes.unwrap_or_default();
                json!({
                    "order_id": p.order_id,
                    "photos": files.len(),
                    "files": echo,
                    "questionnaireCompleted": !notes.trim().is_empty(),
                    "notes": notes,
                })
            }
            DeskOp::AnalyzeEvidence => {
                let p: EvidenceParams = params::parse(params)?;
                return Ok(self.desk.analyze(&p.order_id, &p.images, p.notes.as_deref()).await);
            }
            DeskOp::IssueRefund => {
                let p: OrderParams = params::parse(params)?;
                tracing::info!(order_id = %p.order_id, "instant refund issued");
                json!({"order_id": p.order_id, "refunded": true})
            }
            DeskOp::ExonerateDriver => {
                let p: DriverParams = params::parse(params)?;
                json!({"driver_id": p.driver_id, "cleared": true})
            }
            DeskOp::PackagingFeedback => {
                let p: PackagingFeedbackParams = params::parse(params)?;
                tracing::info!(merchant_id = %p.merchant_id, feedback = %p.feedback, "packaging feedback logged");
                json!({"merchant_id": p.merchant_id, "feedbackLogged": true})
            }
            DeskOp::ContactRecipient => {
                let p: ContactRecipientParams = params::parse(params)?;
                json!({"recipient_id": p.recipient_id, "messageSent": p.message})
            }
            DeskOp::SuggestSafeDrop => {
                let p: SafeDropParams = params::parse(params)?;
                json!({"address": p.address, "suggested": true})
            }
        };
        Ok(Observation::from_value(obs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn desk(llm: MockLlmClient) -> Arc<MediationDesk> {
        Arc::new(MediationDesk::new(Arc::new(llm)))
    }

    #[tokio::test]
    async fn test_collect_then_restart_purges() {
        let desk = desk(MockLlmClient::new());
        let collect = DeskTool::new(DeskOp::CollectEvidence, desk.clone());
        let obs = collect
            .invoke(json!({"order_id": "o1", "images": ["a.jpg", "b.jpg", "a.jpg"], "notes": "seal broken"}))
            .await
            .unwrap();
        assert_eq!(obs.get("photos"), Some(&json!(2)));
        assert_eq!(obs.get("questionnaireCompleted"), Some(&json!(true)));

        let start = DeskTool::new(DeskOp::InitiateMediation, desk.clone());
        let obs = start.invoke(json!({"order_id": "o1"})).await.unwrap();
        assert_eq!(obs.get("flow"), Some(&json!("started")));
        assert_eq!(obs.get("purgedFiles"), Some(&json!(2)));
        assert!(desk.files("o1").await.is_empty());
    }

    #[tokio::test]
    async fn test_analysis_without_evidence() {
        let obs = desk(MockLlmClient::new()).analyze("o1", &[], None).await;
        assert_eq!(obs.get("status"), Some(&json!("NO_EVIDENCE")));
        assert_eq!(obs.get("refund_reasonable"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_analysis_parses_and_clamps_model_reply() {
        let llm = MockLlmClient::new().with_reply(
            "```json\n{\"fault\": \"Merchant\", \"confidence\": 1.7, \"refund_reasonable\": true, \"rationale\": \"lid open\"}\n```",
        );
        let obs = desk(llm).analyze("o1", &["data:image/png;base64,AAAA".to_string()], None).await;
        assert_eq!(obs.get("status"), Some(&json!("OK")));
        assert_eq!(obs.get("fault"), Some(&json!("merchant")));
        assert_eq!(obs.get("confidence"), Some(&json!(1.0)));
        assert_eq!(obs.get("packaging_feedback"), Some(&json!("Improve packaging/seal.")));
    }

    #[tokio::test]
    async fn test_analysis_model_failure_is_not_an_error_observation() {
        let obs = desk(MockLlmClient::new().with_error("quota"))
            .analyze("o1", &["https://cdn.example.com/a.jpg".into()], None)
            .await;
        assert_eq!(obs.get("status"), Some(&json!("ERROR")));
        assert!(!obs.is_error());
    }

    #[tokio::test]
    async fn test_analysis_sends_photo_content_to_model() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("spill.png");
        std::fs::write(&photo, b"\x89PNG fake bytes").unwrap();

        let llm = Arc::new(MockLlmClient::new().with_reply(r#"{"fault": "merchant", "confidence": 0.9, "refund_reasonable": true}"#));
        let desk = MediationDesk::new(llm.clone());
        let images = vec![
            photo.display().to_string(),
            "data:image/jpeg;base64,AAAA".to_string(),
            "missing/nowhere.jpg".to_string(),
        ];
        let obs = desk.analyze("o1", &images, Some("lid popped")).await;
        assert_eq!(obs.get("status"), Some(&json!("OK")));

        let requests = llm.vision_requests();
        assert_eq!(requests.len(), 1);
        let (prompt, sent) = &requests[0];
        assert!(prompt.contains("lid popped"));
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(ImageInput::is_inline));
        assert!(sent[0].url.starts_with("data:image/png;base64,"));
        assert_eq!(sent[1].url, "data:image/jpeg;base64,AAAA");
    }

    #[tokio::test]
    async fn test_unreadable_evidence_counts_as_none() {
        let llm = Arc::new(MockLlmClient::new());
        let desk = MediationDesk::new(llm.clone());
        let obs = desk
            .analyze("o1", &["missing/nowhere.jpg".into(), "data:image/png;base64,@@@".into()], None)
            .await;
        assert_eq!(obs.get("status"), Some(&json!("NO_EVIDENCE")));
        assert!(llm.vision_requests().is_empty());
    }

    #[test]
    fn test_every_op_has_a_distinct_name() {
        let tools = DeskTool::all(desk(MockLlmClient::new()));
        let mut names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), DeskOp::ALL.len());
    }
}
