use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use super::driver::{ElementHandle, Locator, PageDriver};
use super::error::DriverError;

/// W3C key under which element references travel on the wire.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    value: Value,
}

/// A WebDriver session attached to an already running Chrome.
pub struct WebDriverPage {
    client: reqwest::Client,
    endpoint: String,
    session_id: String,
}

impl WebDriverPage {
    /// Opens a session on `endpoint` that drives the Chrome listening on
    /// `debugger_address` (host:port of its remote-debugging socket).
    pub async fn connect(endpoint: &str, debugger_address: &str) -> Result<Self, DriverError> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        if !webdriver_reachable(&endpoint) {
            return Err(DriverError::Unreachable {
                endpoint,
                reason: "connection refused".to_string(),
            });
        }

        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let caps = attach_capabilities(debugger_address);
        let res = client
            .post(format!("{endpoint}/session"))
            .json(&caps)
            .send()
            .await
            .map_err(|err| DriverError::Unreachable {
                endpoint: endpoint.clone(),
                reason: err.to_string(),
            })?;
        let value = read_response(res).await?;
        let session_id = value
            .pointer("/sessionId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                DriverError::Malformed(format!(
                    "session id missing in response: {}",
                    truncate_for_log(&value.to_string(), 220)
                ))
            })?;

        info!(%endpoint, %debugger_address, session = %session_id, "attached to browser");
        Ok(Self {
            client,
            endpoint,
            session_id,
        })
    }

    /// Ends the WebDriver session. The attached browser keeps running.
    pub async fn close(self) -> Result<(), DriverError> {
        self.command(Method::DELETE, "", None).await?;
        debug!(session = %self.session_id, "webdriver session closed");
        Ok(())
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        let url = format!("{}/session/{}{path}", self.endpoint, self.session_id);
        let mut req = self.client.request(method, url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req.send().await?;
        read_response(res).await
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn perform_actions(&self, actions: Value) -> Result<(), DriverError> {
        self.command(Method::POST, "/actions", Some(json!({ "actions": [actions] })))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PageDriver for WebDriverPage {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String, DriverError> {
        let value = self.command(Method::GET, "/source", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn find_all(
        &mut self,
        scope: Option<&ElementHandle>,
        locator: &Locator,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let path = match scope {
            Some(element) => format!("/element/{}/elements", element.id()),
            None => "/elements".to_string(),
        };
        let body = match locator {
            Locator::Css(selector) => json!({ "using": "css selector", "value": selector }),
            Locator::Text(needle) => {
                let prefix = if scope.is_some() { "." } else { "" };
                json!({
                    "using": "xpath",
                    "value": format!("{prefix}//*[text()[contains(., {})]]", xpath_literal(needle)),
                })
            }
        };
        let value = self.command(Method::POST, &path, Some(body)).await?;
        Ok(value
            .as_array()
            .map(|arr| arr.iter().filter_map(element_from_value).collect::<Vec<_>>())
            .unwrap_or_default())
    }

    async fn next_sibling(
        &mut self,
        element: &ElementHandle,
    ) -> Result<Option<ElementHandle>, DriverError> {
        let value = self
            .execute(
                "return arguments[0].nextElementSibling;",
                vec![element_to_value(element)],
            )
            .await?;
        Ok(element_from_value(&value))
    }

    async fn text(&mut self, element: &ElementHandle) -> Result<String, DriverError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element.id()), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let value = self
            .command(
                Method::GET,
                &format!("/element/{}/attribute/{name}", element.id()),
                None,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn clear(&mut self, element: &ElementHandle) -> Result<(), DriverError> {
        self.execute(
            "arguments[0].value = ''; arguments[0].dispatchEvent(new Event('input', { bubbles: true }));",
            vec![element_to_value(element)],
        )
        .await?;
        Ok(())
    }

    async fn click(&mut self, element: &ElementHandle) -> Result<(), DriverError> {
        self.command(
            Method::POST,
            &format!("/element/{}/click", element.id()),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    async fn hover(&mut self, element: &ElementHandle) -> Result<(), DriverError> {
        self.perform_actions(json!({
            "type": "pointer",
            "id": "mouse",
            "parameters": { "pointerType": "mouse" },
            "actions": [{
                "type": "pointerMove",
                "duration": 150,
                "origin": element_to_value(element),
                "x": 0,
                "y": 0,
            }],
        }))
        .await
    }

    async fn move_pointer_by(
        &mut self,
        dx: i64,
        dy: i64,
        duration: Duration,
    ) -> Result<(), DriverError> {
        self.perform_actions(json!({
            "type": "pointer",
            "id": "mouse",
            "parameters": { "pointerType": "mouse" },
            "actions": [{
                "type": "pointerMove",
                "duration": duration.as_millis() as u64,
                "origin": "pointer",
                "x": dx,
                "y": dy,
            }],
        }))
        .await
    }

    async fn type_text(&mut self, text: &str) -> Result<(), DriverError> {
        let keys = text
            .chars()
            .flat_map(|ch| {
                let key = ch.to_string();
                [
                    json!({ "type": "keyDown", "value": key.as_str() }),
                    json!({ "type": "keyUp", "value": key.as_str() }),
                ]
            })
            .collect::<Vec<_>>();
        self.perform_actions(json!({
            "type": "key",
            "id": "keyboard",
            "actions": keys,
        }))
        .await
    }

    async fn scroll_by(&mut self, dy: i64) -> Result<(), DriverError> {
        self.execute("window.scrollBy(0, arguments[0]);", vec![json!(dy)])
            .await?;
        Ok(())
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), DriverError> {
        self.execute(
            "window.scrollTo(0, document.body ? document.body.scrollHeight : 0);",
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    async fn scroll_into_view(&mut self, element: &ElementHandle) -> Result<(), DriverError> {
        self.execute(
            "arguments[0].scrollIntoView({ block: 'center', inline: 'nearest' });",
            vec![element_to_value(element)],
        )
        .await?;
        Ok(())
    }
}

/// Capabilities asking chromedriver to adopt an existing Chrome instead of
/// launching a fresh one.
fn attach_capabilities(debugger_address: &str) -> Value {
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "debuggerAddress": debugger_address,
                },
            },
        },
    })
}

async fn read_response(res: reqwest::Response) -> Result<Value, DriverError> {
    let status = res.status();
    let body = res.text().await?;
    let parsed = serde_json::from_str::<WireResponse>(&body);

    if let Ok(wire) = &parsed
        && let Some(err) = wire.value.pointer("/error").and_then(|v| v.as_str())
    {
        let message = wire
            .value
            .pointer("/message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown webdriver error");
        return Err(DriverError::protocol(err, truncate_for_log(message, 260)));
    }
    if !status.is_success() {
        return Err(DriverError::protocol(
            format!("http {}", status.as_u16()),
            truncate_for_log(&body, 260),
        ));
    }

    parsed
        .map(|wire| wire.value)
        .map_err(|err| DriverError::Malformed(format!("{err}: {}", truncate_for_log(&body, 200))))
}

fn element_to_value(element: &ElementHandle) -> Value {
    json!({ ELEMENT_KEY: element.id() })
}

fn element_from_value(value: &Value) -> Option<ElementHandle> {
    value
        .get(ELEMENT_KEY)
        .and_then(|v| v.as_str())
        .map(|id| ElementHandle(id.to_string()))
}

/// Quotes `needle` as an XPath string literal, whatever quotes it contains.
fn xpath_literal(needle: &str) -> String {
    if !needle.contains('"') {
        return format!("\"{needle}\"");
    }
    if !needle.contains('\'') {
        return format!("'{needle}'");
    }
    let parts = needle
        .split('"')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(", '\"', ");
    format!("concat({parts})")
}

pub fn webdriver_reachable(endpoint: &str) -> bool {
    let parsed = match Url::parse(endpoint) {
        Ok(u) => u,
        Err(_) => return false,
    };
    let host = match parsed.host_str() {
        Some(h) => h,
        None => return false,
    };
    let port = parsed.port_or_known_default().unwrap_or(9515);
    let Ok(addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok())
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut out = input.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}
