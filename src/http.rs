use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use reqwest::Method;
use serde_json::Value;

use crate::cmd::{Headers, HttpMethod, HttpResponseType};

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Option<Headers>,
    pub body: Option<String>,
    pub response_type: HttpResponseType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

/// Executes `HTTP_REQUEST` commands. Any status code is a response; only
/// transport and decode problems are errors.
pub trait HttpTransport: Send + Sync {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    /// Whole-request deadline; `None` leaves requests unbounded.
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone)]
pub struct Client {
    http: HttpClient,
    user_agent: String,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("http: user agent required");
        }

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout)
                .build()
                .context("http: build client")?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
        })
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

impl HttpTransport for Client {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        if request.method == HttpMethod::Delete && request.body.is_some() {
            bail!("http: DELETE with body is not supported");
        }

        let mut builder = self
            .http
            .request(to_method(request.method), &request.url)
            .header(USER_AGENT, &self.user_agent);
        if let Some(headers) = &request.headers {
            for (name, value) in headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .with_context(|| format!("http: {} {}", request.method.as_str(), request.url))?;
        let status = response.status().as_u16();
        let text = response.text().context("http: read body")?;

        let body = match request.response_type {
            HttpResponseType::Text => Value::String(text),
            HttpResponseType::Json if text.trim().is_empty() => Value::Null,
            HttpResponseType::Json => serde_json::from_str(&text)
                .with_context(|| format!("http: decode json from {}", request.url))?,
        };

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tiny_http::{Header, Response, Server};

    fn serve(responses: Vec<(u16, &'static str)>) -> (String, thread::JoinHandle<Vec<String>>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr().to_ip().unwrap());
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let request = server.recv().unwrap();
                let agent = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("User-Agent"))
                    .map(|h| h.value.to_string())
                    .unwrap_or_default();
                seen.push(format!("{} {} {}", request.method(), request.url(), agent));
                let response = Response::from_string(body).with_status_code(status).with_header(
                    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap(),
                );
                request.respond(response).unwrap();
            }
            seen
        });
        (addr, handle)
    }

    fn client() -> Client {
        Client::new(ClientConfig {
            user_agent: "xeg-test/1.0".into(),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn requires_user_agent() {
        assert!(Client::new(ClientConfig::default()).is_err());
    }

    #[test]
    fn decodes_json_and_keeps_error_statuses() {
        let (addr, server) = serve(vec![(200, r#"{"ok":true}"#), (404, r#"{"error":"nope"}"#)]);
        let client = client();
        let ok = client
            .request(&HttpRequest {
                url: format!("{addr}/settings"),
                method: HttpMethod::Get,
                headers: None,
                body: None,
                response_type: HttpResponseType::Json,
            })
            .unwrap();
        assert_eq!(ok.status, 200);
        assert_eq!(ok.body["ok"], true);

        let missing = client
            .request(&HttpRequest {
                url: format!("{addr}/missing"),
                method: HttpMethod::Get,
                headers: None,
                body: None,
                response_type: HttpResponseType::Text,
            })
            .unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(missing.body, Value::String(r#"{"error":"nope"}"#.into()));

        let seen = server.join().unwrap();
        assert_eq!(seen[0], "GET /settings xeg-test/1.0");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let (addr, server) = serve(vec![(200, "not json")]);
        let err = client()
            .request(&HttpRequest {
                url: format!("{addr}/broken"),
                method: HttpMethod::Get,
                headers: None,
                body: None,
                response_type: HttpResponseType::Json,
            })
            .unwrap_err();
        assert!(format!("{err:#}").contains("decode json"));
        server.join().unwrap();
    }

    #[test]
    fn request_deadline_applies() {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", server.server_addr().to_ip().unwrap());
        let handle = thread::spawn(move || {
            let request = server.recv().unwrap();
            thread::sleep(Duration::from_millis(500));
            let _ = request.respond(tiny_http::Response::from_string("late"));
        });
        let client = Client::new(ClientConfig {
            user_agent: "xeg-test/1.0".into(),
            timeout: Some(Duration::from_millis(100)),
            http_client: None,
        })
        .unwrap();
        let result = client.request(&HttpRequest {
            url: format!("{addr}/slow"),
            method: HttpMethod::Get,
            headers: None,
            body: None,
            response_type: HttpResponseType::Text,
        });
        assert!(result.is_err());
        handle.join().unwrap();
    }

    #[test]
    fn rejects_delete_with_body() {
        let err = client()
            .request(&HttpRequest {
                url: "http://127.0.0.1:9/never".into(),
                method: HttpMethod::Delete,
                headers: None,
                body: Some("{}".into()),
                response_type: HttpResponseType::Json,
            })
            .unwrap_err();
        assert!(err.to_string().contains("DELETE"));
    }
}
