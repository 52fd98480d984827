//! ElevenLabs text-to-speech over its REST API.
//!
//! `POST {api_base}/text-to-speech/{voice_id}?output_format=pcm_<rate>`
//! returns headerless 16-bit mono PCM.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::{PipelineError, ServiceError};
use crate::service::{AudioEncoding, SpeechAudio, SpeechRequest, SpeechService, VoiceInfo};

const XI_API_KEY_HEADER: &str = "xi-api-key";

#[derive(Serialize)]
struct SynthesisBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettingsBody,
}

#[derive(Serialize)]
struct VoiceSettingsBody {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Deserialize)]
struct VoicesResponse {
    voices: Vec<VoiceInfo>,
}

pub struct ElevenLabsService {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model_id: String,
    output_format: String,
    encoding: AudioEncoding,
    max_text_chars: usize,
}

impl ElevenLabsService {
    pub fn new(config: &ServiceConfig, api_key: impl Into<String>) -> Result<Self, PipelineError> {
        let encoding = parse_output_format(&config.output_format).ok_or_else(|| {
            PipelineError::ConfigError(format!(
                "Unsupported output format '{}', expected pcm_<sample rate>",
                config.output_format
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| {
                PipelineError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model_id: config.model_id.clone(),
            output_format: config.output_format.clone(),
            encoding,
            max_text_chars: config.max_text_chars,
        })
    }
}

#[async_trait]
impl SpeechService for ElevenLabsService {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechAudio, ServiceError> {
        let chars = request.text.chars().count();
        if chars > self.max_text_chars {
            return Err(ServiceError::TextTooLong {
                chars,
                limit: self.max_text_chars,
            });
        }

        let body = SynthesisBody {
            text: &request.text,
            model_id: &self.model_id,
            voice_settings: VoiceSettingsBody {
                stability: request.stability,
                similarity_boost: request.similarity,
            },
        };

        let response = self
            .client
            .post(format!("{}/text-to-speech/{}", self.api_base, request.voice_id))
            .header(XI_API_KEY_HEADER, &self.api_key)
            .query(&[("output_format", self.output_format.as_str())])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let bytes = response.bytes().await?;
        debug!(
            voice_id = %request.voice_id,
            chars,
            bytes = bytes.len(),
            "ElevenLabs synthesis complete"
        );

        Ok(SpeechAudio {
            bytes: bytes.to_vec(),
            encoding: self.encoding,
        })
    }

    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, ServiceError> {
        let response = self
            .client
            .get(format!("{}/voices", self.api_base))
            .header(XI_API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let voices: VoicesResponse = response.json().await?;
        Ok(voices.voices)
    }

    fn name(&self) -> &str {
        "elevenlabs"
    }
}

/// Map an `output_format` such as `pcm_24000` to its encoding.
pub fn parse_output_format(format: &str) -> Option<AudioEncoding> {
    let sample_rate = format.strip_prefix("pcm_")?.parse::<u32>().ok()?;
    (sample_rate > 0).then_some(AudioEncoding::Pcm16 {
        sample_rate,
        channels: 1,
    })
}

/// Read `Retry-After` as delta-seconds.
///
/// The HTTP-date form is not honoured and yields `None`, which leaves the
/// wait to the retry policy's backoff schedule.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Turn a non-success response into a service error.
///
/// A body that cannot be read is reported in the message rather than
/// silently replaced by an empty one.
async fn error_from_response(response: reqwest::Response) -> ServiceError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let message = match response.text().await {
        Ok(body) => error_message(&body),
        Err(e) => format!("failed to read error body: {}", e),
    };
    classify_status(status, retry_after, message)
}

/// Classify a non-success HTTP status.
fn classify_status(status: u16, retry_after: Option<Duration>, message: String) -> ServiceError {
    match status {
        429 => ServiceError::RateLimited { retry_after },
        401 | 403 => ServiceError::Unauthorized { status, message },
        500..=599 => ServiceError::Server { status, message },
        _ => ServiceError::BadRequest { status, message },
    }
}

/// Pull a readable message out of an error body.
///
/// Bodies look like `{"detail": {"status": "...", "message": "..."}}` or
/// `{"detail": "..."}`; anything else is returned as-is, shortened.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let detail = &value["detail"];
        if let Some(message) = detail["message"].as_str() {
            return message.to_string();
        }
        if let Some(message) = detail.as_str() {
            return message.to_string();
        }
    }
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service_for(server: &MockServer) -> ElevenLabsService {
        let config = ServiceConfig {
            api_base: server.uri(),
            ..ServiceConfig::default()
        };
        ElevenLabsService::new(&config, "key").unwrap()
    }

    fn request(voice_id: &str) -> SpeechRequest {
        SpeechRequest {
            text: "Welcome back to the show.".to_string(),
            voice_id: voice_id.to_string(),
            stability: 0.5,
            similarity: 0.75,
        }
    }

    async fn mount_status(server: &MockServer, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/text-to-speech/voice-1"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[test]
    fn test_parse_output_format() {
        assert_eq!(
            parse_output_format("pcm_24000"),
            Some(AudioEncoding::Pcm16 {
                sample_rate: 24000,
                channels: 1
            })
        );
        assert!(parse_output_format("mp3_44100_128").is_none());
        assert!(parse_output_format("pcm_0").is_none());
        assert!(parse_output_format("pcm_fast").is_none());
    }

    #[test]
    fn test_classify_status() {
        let limited = classify_status(429, Some(Duration::from_secs(2)), String::new());
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));

        assert!(classify_status(503, None, "overloaded".to_string()).is_retryable());
        assert!(matches!(
            classify_status(401, None, String::new()),
            ServiceError::Unauthorized { status: 401, .. }
        ));
        assert!(matches!(
            classify_status(422, None, String::new()),
            ServiceError::BadRequest { status: 422, .. }
        ));
        assert!(!classify_status(400, None, String::new()).is_retryable());
    }

    #[test]
    fn test_retry_after_reads_delta_seconds_only() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(r#"{"detail":{"status":"quota_exceeded","message":"Quota exceeded"}}"#),
            "Quota exceeded"
        );
        assert_eq!(error_message(r#"{"detail":"Invalid API key"}"#), "Invalid API key");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
        assert_eq!(error_message(&"x".repeat(500)).len(), 200);
    }

    #[test]
    fn test_rejects_unsupported_output_format() {
        let config = ServiceConfig {
            output_format: "mp3_44100_128".to_string(),
            ..ServiceConfig::default()
        };
        assert!(matches!(
            ElevenLabsService::new(&config, "key"),
            Err(PipelineError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_text_rejected_before_request() {
        let config = ServiceConfig {
            // Unroutable; the request must never be sent.
            api_base: "http://127.0.0.1:9".to_string(),
            max_text_chars: 10,
            ..ServiceConfig::default()
        };
        let service = ElevenLabsService::new(&config, "key").unwrap();
        let request = SpeechRequest {
            text: "this text is far too long".to_string(),
            voice_id: "v".to_string(),
            stability: 0.5,
            similarity: 0.75,
        };
        let err = service.synthesize(&request).await.unwrap_err();
        assert!(matches!(err, ServiceError::TextTooLong { chars: 25, limit: 10 }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_synthesize_sends_request_and_decodes_pcm() {
        let server = MockServer::start().await;
        let pcm: Vec<u8> = (0..480i16).flat_map(|s| (s * 16).to_le_bytes()).collect();
        Mock::given(method("POST"))
            .and(path("/text-to-speech/voice-1"))
            .and(header("xi-api-key", "key"))
            .and(query_param("output_format", "pcm_24000"))
            .and(body_partial_json(json!({
                "text": "Welcome back to the show.",
                "model_id": ServiceConfig::default().model_id,
                "voice_settings": { "stability": 0.5, "similarity_boost": 0.75 },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm))
            .expect(1)
            .mount(&server)
            .await;

        let audio = service_for(&server).synthesize(&request("voice-1")).await.unwrap();
        assert_eq!(
            audio.encoding,
            AudioEncoding::Pcm16 {
                sample_rate: 24000,
                channels: 1
            }
        );
        let decoded = decode(&audio).unwrap();
        assert_eq!(decoded.samples.len(), 480);
        assert_eq!(decoded.sample_rate, 24000);
        assert_eq!(decoded.channels, 1);
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        mount_status(&server, ResponseTemplate::new(429).insert_header("Retry-After", "3")).await;

        let err = service_for(&server).synthesize(&request("voice-1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited { .. }));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_rate_limit_with_http_date_falls_back_to_backoff() {
        let server = MockServer::start().await;
        mount_status(
            &server,
            ResponseTemplate::new(429).insert_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT"),
        )
        .await;

        let err = service_for(&server).synthesize(&request("voice-1")).await.unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited { retry_after: None }));
    }

    #[tokio::test]
    async fn test_unauthorized_is_terminal() {
        let server = MockServer::start().await;
        mount_status(
            &server,
            ResponseTemplate::new(401).set_body_json(json!({
                "detail": { "status": "invalid_api_key", "message": "Invalid API key" }
            })),
        )
        .await;

        let err = service_for(&server).synthesize(&request("voice-1")).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(matches!(
            err,
            ServiceError::Unauthorized { status: 401, ref message } if message == "Invalid API key"
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        mount_status(&server, ResponseTemplate::new(503).set_body_string("overloaded")).await;

        let err = service_for(&server).synthesize(&request("voice-1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            ServiceError::Server { status: 503, ref message } if message == "overloaded"
        ));
    }

    #[tokio::test]
    async fn test_unreadable_error_body_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            // Promise more body than is sent, then hang up.
            socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\npartial")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let config = ServiceConfig {
            api_base: format!("http://{}", addr),
            ..ServiceConfig::default()
        };
        let service = ElevenLabsService::new(&config, "key").unwrap();
        let err = service.synthesize(&request("voice-1")).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Server { status: 500, ref message } if message.starts_with("failed to read error body")
        ));
    }

    #[tokio::test]
    async fn test_list_voices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/voices"))
            .and(header("xi-api-key", "key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "voices": [
                    { "voice_id": "v1", "name": "Rachel", "category": "premade" },
                    { "voice_id": "v2", "name": "Adam" }
                ]
            })))
            .mount(&server)
            .await;

        let voices = service_for(&server).list_voices().await.unwrap();
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].voice_id, "v1");
        assert_eq!(voices[0].category.as_deref(), Some("premade"));
        assert_eq!(voices[1].category, None);
    }

    #[tokio::test]
    async fn test_list_voices_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/voices"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "detail": "Forbidden" })))
            .mount(&server)
            .await;

        let err = service_for(&server).list_voices().await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Unauthorized { status: 403, ref message } if message == "Forbidden"
        ));
    }
}
