use crate::config::{LlmConfig, ModelTransport, RemoteConfig};
use crate::error::{ModelError, TransportError};
use crate::executor::{run_process, SshExecutor};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Sends one prompt to a language model and returns its raw text.
pub trait ModelClient {
    fn invoke(&self, prompt: &str) -> Result<String, ModelError>;

    fn model_name(&self) -> &str;
}

impl<T: ModelClient + ?Sized> ModelClient for Box<T> {
    fn invoke(&self, prompt: &str) -> Result<String, ModelError> {
        (**self).invoke(prompt)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

#[derive(Serialize)]
struct OllamaGenerate<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Ollama's REST API.
pub struct OllamaClient {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self, ModelError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(ModelError::Http)?;
        Ok(Self {
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: config.timeout(),
            client,
        })
    }

    pub fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        self.client
            .get(&url)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn request_error(&self, err: reqwest::Error) -> ModelError {
        if err.is_timeout() {
            ModelError::Timeout(self.timeout)
        } else {
            ModelError::Http(err)
        }
    }
}

impl ModelClient for OllamaClient {
    fn invoke(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerate {
            model: &self.model,
            prompt,
            stream: false,
        };
        debug!(%url, model = %self.model, prompt_len = prompt.len(), "calling model");

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.request_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ModelError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let resp: OllamaGenerateResponse = resp.json().map_err(|e| self.request_error(e))?;
        Ok(resp.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// `ollama run` on the remote host, prompt piped through ssh stdin.
pub struct SshOllamaClient {
    ssh: SshExecutor,
    model: String,
    timeout: Duration,
}

impl SshOllamaClient {
    pub fn new(remote: &RemoteConfig, llm: &LlmConfig) -> Self {
        Self {
            ssh: SshExecutor::new(remote),
            model: llm.model.clone(),
            timeout: llm.timeout(),
        }
    }
}

impl ModelClient for SshOllamaClient {
    fn invoke(&self, prompt: &str) -> Result<String, ModelError> {
        let command = format!("ollama run {}", self.model);
        debug!(model = %self.model, prompt_len = prompt.len(), "calling model over ssh");

        let output = run_process(self.ssh.command(&command), Some(prompt), self.timeout)
            .map_err(|err| match err {
                TransportError::Timeout(d) => ModelError::Timeout(d),
                other => ModelError::Transport(other),
            })?;
        let output = self.ssh.check_connection(output)?;

        if !output.succeeded() {
            return Err(ModelError::Remote {
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

pub fn from_config(
    remote: &RemoteConfig,
    llm: &LlmConfig,
) -> Result<Box<dyn ModelClient>, ModelError> {
    Ok(match llm.transport {
        ModelTransport::Http => Box::new(OllamaClient::new(llm)?),
        ModelTransport::Ssh => Box::new(SshOllamaClient::new(remote, llm)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> OllamaClient {
        let config = LlmConfig {
            endpoint: format!("{}/", server.url()),
            model: "phi3".to_string(),
            timeout_secs: 5,
            ..LlmConfig::default()
        };
        OllamaClient::new(&config).unwrap()
    }

    #[test]
    fn invoke_returns_response_text() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/generate")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "phi3",
                "prompt": "say ok",
                "stream": false,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"model":"phi3","response":"{\"type\":\"answer\",\"text\":\"ok\"}","done":true}"#)
            .create();

        let client = client_for(&server);
        let text = client.invoke("say ok").unwrap();

        mock.assert();
        assert_eq!(text, r#"{"type":"answer","text":"ok"}"#);
        assert_eq!(client.model_name(), "phi3");
    }

    #[test]
    fn error_status_is_model_unavailable() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/generate")
            .with_status(404)
            .with_body(r#"{"error":"model 'phi3' not found"}"#)
            .create();

        let err = client_for(&server).invoke("hi").unwrap_err();
        match err {
            ModelError::Status { code, body } => {
                assert_eq!(code, 404);
                assert!(body.contains("not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn availability_check_uses_tags() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[]}"#)
            .create();

        assert!(client_for(&server).is_available());
        mock.assert();
    }

    #[test]
    fn unreachable_endpoint_is_an_error() {
        let config = LlmConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..LlmConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        assert!(client.invoke("hi").is_err());
        assert!(!client.is_available());
    }

    #[cfg(unix)]
    fn ssh_client(dir: &tempfile::TempDir, body: &str, timeout_secs: u64) -> SshOllamaClient {
        let remote = RemoteConfig {
            host: "nas.lan".to_string(),
            user: "admin".to_string(),
            ssh_program: crate::executor::testutil::fake_program(dir.path(), "ssh", body),
            ..RemoteConfig::default()
        };
        let llm = LlmConfig {
            transport: ModelTransport::Ssh,
            model: "phi3".to_string(),
            timeout_secs,
            ..LlmConfig::default()
        };
        SshOllamaClient::new(&remote, &llm)
    }

    #[cfg(unix)]
    #[test]
    fn ssh_model_reads_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let client = ssh_client(
            &dir,
            r#"cat > /dev/null; printf '{"type":"answer","text":"ok"}'"#,
            10,
        );
        assert_eq!(client.invoke("say ok").unwrap(), r#"{"type":"answer","text":"ok"}"#);
    }

    #[cfg(unix)]
    #[test]
    fn ssh_model_failure_is_remote_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = ssh_client(
            &dir,
            "cat > /dev/null; echo 'pull model manifest: file does not exist' >&2; exit 1",
            10,
        );
        match client.invoke("hi").unwrap_err() {
            ModelError::Remote { exit_code, stderr } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "pull model manifest: file does not exist");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn ssh_connection_failure_keeps_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let client = ssh_client(
            &dir,
            "echo 'ssh: connect to host nas.lan port 22: Connection refused' >&2; exit 255",
            10,
        );
        // larger than a pipe buffer, so the write hits a closed pipe
        let prompt = "x".repeat(1 << 20);
        match client.invoke(&prompt).unwrap_err() {
            ModelError::Transport(TransportError::Connection { stderr, .. }) => {
                assert!(stderr.contains("Connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn slow_ssh_model_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let client = ssh_client(&dir, "exec sleep 5", 1);
        assert!(matches!(
            client.invoke("hi").unwrap_err(),
            ModelError::Timeout(_)
        ));
    }
}
