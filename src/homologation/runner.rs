use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Response, StatusCode};
use serde_json::{json, Value};
use tokio::time::Instant;

use super::{HomologationReport, LogEntry, RunError, StepTag, HASH_HEADER};
use crate::config::HomologationSettings;
use crate::models::token::preview;

/// Mutable state of one homologation run. Lives for a single request.
struct Run {
    id: String,
    started: Instant,
    budget: Duration,
    steps: Vec<LogEntry>,
    current_hash: Option<String>,
    product_id: Option<Value>,
}

impl Run {
    fn new(budget: Duration) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("hml_{}_{}", chrono::Utc::now().timestamp_millis(), &suffix[..10]),
            started: Instant::now(),
            budget,
            steps: Vec::new(),
            current_hash: None,
            product_id: None,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn log(&mut self, step: StepTag, message: impl Into<String>, data: Value) {
        let message = message.into();
        tracing::info!(run_id = %self.id, step = step.as_str(), "{}", message);
        self.steps.push(LogEntry {
            step,
            message,
            timestamp: self.elapsed_ms(),
            data,
        });
    }

    /// Time left in the budget, or the timeout failure once it is spent.
    fn remaining(&self) -> Result<Duration, RunError> {
        let elapsed = self.started.elapsed();
        if elapsed >= self.budget {
            return Err(self.exceeded());
        }
        Ok(self.budget - elapsed)
    }

    fn exceeded(&self) -> RunError {
        RunError::BudgetExceeded {
            budget_ms: self.budget.as_millis() as u64,
            elapsed_ms: self.elapsed_ms(),
        }
    }

    fn into_report(self, outcome: Result<(), RunError>) -> HomologationReport {
        let total_time = self.elapsed_ms();
        let (success, message, error) = match outcome {
            Ok(()) => (
                true,
                Some("homologation completed as documented by Bling".to_string()),
                None,
            ),
            Err(e) => (false, None, Some(e.to_string())),
        };
        HomologationReport {
            success,
            homologacao_id: self.id,
            total_time,
            message,
            error,
            steps: self.steps,
            final_hash: self.current_hash,
            product_id: self.product_id,
        }
    }
}

/// Drives the fixed homologation sequence against the Bling sandbox.
///
/// Calls are strictly sequential: each step needs what the previous one
/// returned, and the provider rate-gates the flow with the pacing delay.
#[derive(Clone)]
pub struct ComplianceRunner {
    http: reqwest::Client,
    settings: HomologationSettings,
}

impl ComplianceRunner {
    pub fn new(http: reqwest::Client, settings: HomologationSettings) -> Self {
        Self { http, settings }
    }

    pub fn settings(&self) -> &HomologationSettings {
        &self.settings
    }

    pub async fn run(&self, access_token: &str, refresh_token: Option<&str>) -> HomologationReport {
        let mut run = Run::new(self.settings.budget);
        run.log(StepTag::Start, "starting homologation", json!({}));

        let refresh_token = refresh_token.filter(|t| !t.trim().is_empty());
        let outcome = self.execute(&mut run, access_token, refresh_token).await;

        match &outcome {
            Ok(()) => {
                let total = run.elapsed_ms();
                run.log(
                    StepTag::Success,
                    format!("homologation completed in {}ms", total),
                    json!({}),
                );
            }
            Err(e) => {
                let total = run.elapsed_ms();
                tracing::error!(run_id = %run.id, error = %e, total_ms = total, "homologation failed");
                run.log(StepTag::Error, e.to_string(), json!({ "totalTime": total }));
            }
        }

        run.into_report(outcome)
    }

    async fn execute(
        &self,
        run: &mut Run,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), RunError> {
        // STEP 1: fetch the reference product
        self.enter(run, StepTag::FetchProduct, "GET /homologacao/produtos")?;
        let resp = self.send(run, "1", Method::GET, "/produtos", None, access_token).await?;
        let fetched = read_success(run, "1", resp).await?;
        let product = fetched.get("data").cloned().unwrap_or(Value::Null);
        run.log(StepTag::FetchProduct, "product data fetched", product.clone());

        // STEP 2: create it
        self.pause().await;
        self.enter(run, StepTag::CreateProduct, "POST /homologacao/produtos")?;
        let resp = self
            .send(run, "2", Method::POST, "/produtos", Some(&product), access_token)
            .await?;
        let created = read_success(run, "2", resp).await?;
        let product_id = created
            .pointer("/data/id")
            .filter(|id| !id.is_null())
            .cloned()
            .ok_or_else(|| RunError::Malformed {
                step: "2",
                message: "response has no data.id".into(),
            })?;
        let id = path_segment(&product_id);
        run.product_id = Some(product_id.clone());
        run.log(StepTag::CreateProduct, "product created", json!({ "id": product_id }));

        // STEP 3: rename to "Copo"
        self.pause().await;
        self.enter(run, StepTag::UpdateProduct, format!("PUT /homologacao/produtos/{}", id))?;
        let update = renamed(&product, "Copo");
        let resp = self
            .send(run, "3", Method::PUT, &format!("/produtos/{}", id), Some(&update), access_token)
            .await?;
        ensure_success(run, "3", resp).await?;
        run.log(StepTag::UpdateProduct, "product updated", json!({}));

        // STEP 4: deactivate; the only step allowed a reauth retry
        self.pause().await;
        let situation_path = format!("/produtos/{}/situacoes", id);
        self.enter(run, StepTag::Deactivate, format!("PATCH /homologacao{}", situation_path))?;
        let situation = json!({ "situacao": "I" });
        let resp = self
            .send(run, "4", Method::PATCH, &situation_path, Some(&situation), access_token)
            .await?;
        match refresh_token {
            Some(refresh) if resp.status() == StatusCode::UNAUTHORIZED => {
                run.log(
                    StepTag::Refresh,
                    "access token rejected, retrying with refresh token",
                    json!({}),
                );
                let retry = self
                    .send(run, "4 (retry)", Method::PATCH, &situation_path, Some(&situation), refresh)
                    .await?;
                ensure_success(run, "4 (retry)", retry).await?;
            }
            _ => ensure_success(run, "4", resp).await?,
        }
        run.log(StepTag::Deactivate, "product status set to inactive", json!({}));

        // STEP 5: delete
        self.pause().await;
        self.enter(run, StepTag::Delete, format!("DELETE /homologacao/produtos/{}", id))?;
        let resp = self
            .send(run, "5", Method::DELETE, &format!("/produtos/{}", id), None, access_token)
            .await?;
        ensure_success(run, "5", resp).await?;
        run.log(StepTag::Delete, "product removed", json!({}));

        Ok(())
    }

    /// Budget gate in front of every step.
    fn enter(&self, run: &mut Run, step: StepTag, message: impl Into<String>) -> Result<(), RunError> {
        run.remaining()?;
        run.log(step, message, json!({}));
        Ok(())
    }

    async fn pause(&self) {
        if !self.settings.pacing.is_zero() {
            tokio::time::sleep(self.settings.pacing).await;
        }
    }

    /// One outbound call, bounded by what is left of the budget. Carries the
    /// current compliance hash and captures a rotated one from the response.
    async fn send(
        &self,
        run: &mut Run,
        step: &'static str,
        method: Method,
        path: &str,
        body: Option<&Value>,
        bearer: &str,
    ) -> Result<Response, RunError> {
        let remaining = run.remaining()?;
        let url = format!("{}{}", self.settings.base_url, path);

        let mut req = self
            .http
            .request(method, &url)
            .bearer_auth(bearer)
            .header(CONTENT_TYPE, "application/json");
        if let Some(hash) = &run.current_hash {
            req = req.header(HASH_HEADER, hash.as_str());
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = match tokio::time::timeout(remaining, req.send()).await {
            Err(_) => return Err(run.exceeded()),
            Ok(Err(e)) => {
                return Err(RunError::Transport {
                    step,
                    message: e.to_string(),
                })
            }
            Ok(Ok(resp)) => resp,
        };

        if let Some(hash) = resp.headers().get(HASH_HEADER).and_then(|v| v.to_str().ok()) {
            let hash = hash.to_string();
            run.log(StepTag::Hash, format!("new hash captured: {}", hash), json!({}));
            run.current_hash = Some(hash);
        }

        Ok(resp)
    }
}

async fn read_body(run: &Run, step: &'static str, resp: Response) -> Result<String, RunError> {
    let remaining = run.remaining()?;
    match tokio::time::timeout(remaining, resp.text()).await {
        Err(_) => Err(run.exceeded()),
        Ok(Err(e)) => Err(RunError::Transport {
            step,
            message: e.to_string(),
        }),
        Ok(Ok(text)) => Ok(text),
    }
}

async fn ensure_success(run: &Run, step: &'static str, resp: Response) -> Result<(), RunError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = read_body(run, step, resp).await?;
    Err(RunError::Rejected {
        step,
        status: status.as_u16(),
        body: preview(&body, 500),
    })
}

async fn read_success(run: &Run, step: &'static str, resp: Response) -> Result<Value, RunError> {
    let status = resp.status();
    let body = read_body(run, step, resp).await?;
    if !status.is_success() {
        return Err(RunError::Rejected {
            step,
            status: status.as_u16(),
            body: preview(&body, 500),
        });
    }
    serde_json::from_str(&body).map_err(|e| RunError::Malformed {
        step,
        message: e.to_string(),
    })
}

/// Step 1 data with `nome` overwritten.
fn renamed(product: &Value, name: &str) -> Value {
    let mut update = product.clone();
    match update.as_object_mut() {
        Some(fields) => {
            fields.insert("nome".into(), Value::from(name));
            update
        }
        None => json!({ "nome": name }),
    }
}

fn path_segment(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn runner(server: &MockServer, budget_ms: u64) -> ComplianceRunner {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        ComplianceRunner::new(
            http,
            HomologationSettings {
                base_url: format!("{}/homologacao", server.uri()),
                budget: Duration::from_millis(budget_ms),
                pacing: Duration::from_millis(5),
            },
        )
    }

    async fn mount_steps_1_to_3(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/homologacao/produtos"))
            .and(header("authorization", "Bearer acc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(HASH_HEADER, "h1")
                    .set_body_string(r#"{"data":{"nome":"Copo do Bling","codigo":"COD-1","preco":32.56}}"#),
            )
            .expect(1)
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(path("/homologacao/produtos"))
            .and(header(HASH_HEADER, "h1"))
            .and(body_partial_json(serde_json::json!({"codigo": "COD-1"})))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header(HASH_HEADER, "h2")
                    .set_body_string(r#"{"data":{"id":16171045022}}"#),
            )
            .expect(1)
            .mount(server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/homologacao/produtos/16171045022"))
            .and(header(HASH_HEADER, "h2"))
            .and(body_partial_json(serde_json::json!({"nome": "Copo", "codigo": "COD-1"})))
            .respond_with(ResponseTemplate::new(200).insert_header(HASH_HEADER, "h3"))
            .expect(1)
            .mount(server)
            .await;
    }

    #[test]
    fn test_renamed_overwrites_only_nome() {
        let product = serde_json::json!({"nome": "Copo do Bling", "preco": 1.5});
        let update = renamed(&product, "Copo");
        assert_eq!(update["nome"], "Copo");
        assert_eq!(update["preco"], 1.5);
        assert_eq!(renamed(&Value::Null, "Copo"), serde_json::json!({"nome": "Copo"}));
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(path_segment(&Value::from(42)), "42");
        assert_eq!(path_segment(&Value::from("abc")), "abc");
    }

    #[tokio::test]
    async fn test_full_run_propagates_hash() {
        let server = MockServer::start().await;
        mount_steps_1_to_3(&server).await;

        Mock::given(method("PATCH"))
            .and(path("/homologacao/produtos/16171045022/situacoes"))
            .and(header(HASH_HEADER, "h3"))
            .and(body_partial_json(serde_json::json!({"situacao": "I"})))
            .respond_with(ResponseTemplate::new(204).insert_header(HASH_HEADER, "h4"))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/homologacao/produtos/16171045022"))
            .and(header(HASH_HEADER, "h4"))
            .respond_with(ResponseTemplate::new(204).insert_header(HASH_HEADER, "h5"))
            .expect(1)
            .mount(&server)
            .await;

        let report = runner(&server, 5_000).run("acc", None).await;

        assert!(report.success, "run failed: {:?}", report.error);
        assert_eq!(report.final_hash.as_deref(), Some("h5"));
        assert_eq!(report.product_id, Some(Value::from(16171045022u64)));
        assert!(report.homologacao_id.starts_with("hml_"));
        assert!(report.reached(StepTag::Delete));
        assert!(report.reached(StepTag::Success));
        assert!(!report.reached(StepTag::Refresh));
        assert_eq!(report.steps.iter().filter(|e| e.step == StepTag::Hash).count(), 5);

        // timestamps follow causal order
        let stamps: Vec<u64> = report.steps.iter().map(|e| e.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_step4_401_retries_once_with_refresh_token() {
        let server = MockServer::start().await;
        mount_steps_1_to_3(&server).await;

        Mock::given(method("PATCH"))
            .and(path("/homologacao/produtos/16171045022/situacoes"))
            .and(header("authorization", "Bearer acc"))
            .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"invalid_token"}"#))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/homologacao/produtos/16171045022/situacoes"))
            .and(header("authorization", "Bearer ref"))
            .and(header(HASH_HEADER, "h3"))
            .respond_with(ResponseTemplate::new(200).insert_header(HASH_HEADER, "h4"))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/homologacao/produtos/16171045022"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let report = runner(&server, 5_000).run("acc", Some("ref")).await;
        assert!(report.success, "run failed: {:?}", report.error);
        assert!(report.reached(StepTag::Refresh));
        assert_eq!(report.final_hash.as_deref(), Some("h4"));
    }

    #[tokio::test]
    async fn test_step4_401_without_refresh_token_fails() {
        let server = MockServer::start().await;
        mount_steps_1_to_3(&server).await;

        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let report = runner(&server, 5_000).run("acc", None).await;
        assert!(!report.success);
        assert!(report.error.unwrap().starts_with("step 4 failed: 401"));
    }

    #[tokio::test]
    async fn test_step4_403_is_not_retried() {
        let server = MockServer::start().await;
        mount_steps_1_to_3(&server).await;

        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let report = runner(&server, 5_000).run("acc", Some("ref")).await;
        assert!(!report.success);
        assert!(!report.reached(StepTag::Refresh));
        assert!(!report.reached(StepTag::Delete));
        assert_eq!(report.error.as_deref(), Some("step 4 failed: 403 - forbidden"));
    }

    #[tokio::test]
    async fn test_failed_retry_fails_the_run() {
        let server = MockServer::start().await;
        mount_steps_1_to_3(&server).await;

        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let report = runner(&server, 5_000).run("acc", Some("ref")).await;
        assert!(!report.success);
        assert!(report.error.unwrap().starts_with("step 4 (retry) failed: 401"));
    }

    #[tokio::test]
    async fn test_hung_create_exceeds_budget() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/homologacao/produtos"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":{"nome":"Copo"}}"#))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/homologacao/produtos"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_string(r#"{"data":{"id":1}}"#)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let report = runner(&server, 400).run("acc", None).await;

        assert!(!report.success);
        assert!(started.elapsed() < Duration::from_secs(3), "run did not stop at the budget");
        assert!(report.error.as_deref().unwrap().starts_with("time limit of 400ms exceeded"));
        assert!(report.reached(StepTag::CreateProduct));
        assert!(!report.reached(StepTag::UpdateProduct));
        assert!(!report.reached(StepTag::Deactivate));
        assert!(!report.reached(StepTag::Delete));
        assert!(report.reached(StepTag::Error));
    }

    #[tokio::test]
    async fn test_step1_rejection_stops_run() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let report = runner(&server, 5_000).run("acc", None).await;
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("step 1 failed: 500 - boom"));
        assert!(report.final_hash.is_none());
    }

    #[tokio::test]
    async fn test_create_without_id_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":{}}"#))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"data":{}}"#))
            .expect(1)
            .mount(&server)
            .await;

        let report = runner(&server, 5_000).run("acc", None).await;
        assert!(!report.success);
        assert!(report.error.unwrap().contains("data.id"));
    }
}
